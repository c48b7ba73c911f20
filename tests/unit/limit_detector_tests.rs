//! Provider-limit marker detection.

use std::sync::Arc;

use shellwire::models::chunk::StreamKind;
use shellwire::orchestrator::limit_detector::{LimitDetector, LimitKind, LimitPatterns};

fn detector() -> LimitDetector {
    LimitDetector::new(Arc::new(LimitPatterns::new().expect("patterns compile")))
}

#[test]
fn detects_token_limit_marker() {
    let mut detector = detector();
    let hits = detector.scan(
        StreamKind::Stderr,
        "working...\nError: output token maximum reached for this request\n",
    );
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, LimitKind::Token);
    assert_eq!(
        hits[0].message,
        "Error: output token maximum reached for this request"
    );
}

#[test]
fn detection_is_case_insensitive() {
    let mut detector = detector();
    let hits = detector.scan(StreamKind::Stdout, "TOO MANY REQUESTS\n");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, LimitKind::Rate);
}

#[test]
fn http_429_matches_as_word_only() {
    let mut detector = detector();
    assert!(detector.scan(StreamKind::Stdout, "processed 14290 rows\n").is_empty());
    let hits = detector.scan(StreamKind::Stdout, "HTTP 429 returned\n");
    assert_eq!(hits[0].kind, LimitKind::Rate);
}

#[test]
fn exceeded_token_pattern_spans_words() {
    let mut detector = detector();
    let hits = detector.scan(StreamKind::Stdout, "request exceeded the context token budget");
    assert_eq!(hits[0].kind, LimitKind::Token);
}

#[test]
fn marker_split_across_chunks_is_found() {
    let mut detector = detector();
    assert!(detector.scan(StreamKind::Stdout, "error: rate li").is_empty());
    let hits = detector.scan(StreamKind::Stdout, "mit exceeded\n");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, LimitKind::Rate);
    assert_eq!(hits[0].message, "error: rate limit exceeded");
}

#[test]
fn streams_have_separate_tails() {
    let mut detector = detector();
    assert!(detector.scan(StreamKind::Stdout, "rate li").is_empty());
    assert!(detector.scan(StreamKind::Stderr, "mit").is_empty());
}

#[test]
fn each_kind_reported_once() {
    let mut detector = detector();
    assert_eq!(detector.scan(StreamKind::Stdout, "rate limit\n").len(), 1);
    assert!(detector.has_reported(LimitKind::Rate));
    assert!(detector.scan(StreamKind::Stdout, "rate limit again\n").is_empty());
    assert!(detector.scan(StreamKind::Stderr, "rate limit\n").is_empty());
    assert_eq!(detector.scan(StreamKind::Stdout, "token limit\n").len(), 1);
}

#[test]
fn both_kinds_in_one_chunk() {
    let mut detector = detector();
    let hits = detector.scan(StreamKind::Stdout, "rate limit hit\nthen token limit hit\n");
    let kinds: Vec<LimitKind> = hits.iter().map(|hit| hit.kind).collect();
    assert_eq!(kinds, vec![LimitKind::Token, LimitKind::Rate]);
}

#[test]
fn message_is_bounded() {
    let mut detector = detector();
    let line = format!("token limit {}", "x".repeat(2000));
    let hits = detector.scan(StreamKind::Stdout, &line);
    assert_eq!(hits[0].message.chars().count(), 500);
}

#[test]
fn ordinary_output_is_ignored() {
    let mut detector = detector();
    assert!(detector
        .scan(StreamKind::Stdout, "compiled 12 crates, tokens parsed: 1044\n")
        .is_empty());
}
