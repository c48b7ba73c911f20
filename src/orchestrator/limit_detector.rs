//! Provider-limit detection in captured output.
//!
//! Commands that wrap rate-limited providers print recognisable markers
//! ("token limit", "429", ...) long before any timeout would fire. The
//! detector scans each chunk together with a short tail of the previous
//! one so a marker split across two reads still matches.

use std::sync::Arc;

use regex::Regex;

use crate::models::chunk::StreamKind;
use crate::{AppError, Result};

const TOKEN_PATTERN: &str = r"(?i)token limit|exceeded.*token|output token maximum";
const RATE_PATTERN: &str = r"(?i)rate limit|too many requests|\b429\b";

/// Characters of the previous chunk kept for cross-boundary matching.
const TAIL_CHARS: usize = 256;

/// Longest `message` reported in a limit notification.
const MAX_MESSAGE_CHARS: usize = 500;

/// Kind of provider limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Output or context token limit.
    Token,
    /// Request rate limit.
    Rate,
}

impl LimitKind {
    fn index(self) -> usize {
        match self {
            Self::Token => 0,
            Self::Rate => 1,
        }
    }
}

/// One detected marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitHit {
    /// Which limit was hit.
    pub kind: LimitKind,
    /// The output line containing the marker, trimmed and bounded.
    pub message: String,
}

/// Compiled marker patterns, shared by every execution.
#[derive(Debug)]
pub struct LimitPatterns {
    token: Regex,
    rate: Regex,
}

impl LimitPatterns {
    /// Compile the built-in patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|err| AppError::Config(format!("invalid limit pattern: {err}")))
        };
        Ok(Self {
            token: compile(TOKEN_PATTERN)?,
            rate: compile(RATE_PATTERN)?,
        })
    }

    fn pattern(&self, kind: LimitKind) -> &Regex {
        match kind {
            LimitKind::Token => &self.token,
            LimitKind::Rate => &self.rate,
        }
    }
}

/// Per-execution scanner; reports each limit kind at most once.
#[derive(Debug)]
pub struct LimitDetector {
    patterns: Arc<LimitPatterns>,
    tails: [String; 2],
    reported: [bool; 2],
}

impl LimitDetector {
    /// Create a detector using `patterns`.
    #[must_use]
    pub fn new(patterns: Arc<LimitPatterns>) -> Self {
        Self {
            patterns,
            tails: [String::new(), String::new()],
            reported: [false; 2],
        }
    }

    /// Scan one chunk from `stream`, returning newly detected limits.
    pub fn scan(&mut self, stream: StreamKind, data: &str) -> Vec<LimitHit> {
        let tail = &mut self.tails[stream.index()];
        let mut window = std::mem::take(tail);
        window.push_str(data);

        let mut hits = Vec::new();
        for kind in [LimitKind::Token, LimitKind::Rate] {
            if self.reported[kind.index()] {
                continue;
            }
            if let Some(found) = self.patterns.pattern(kind).find(&window) {
                self.reported[kind.index()] = true;
                hits.push(LimitHit {
                    kind,
                    message: line_around(&window, found.start(), found.end()),
                });
            }
        }

        *tail = keep_tail(window);
        hits
    }

    /// Whether `kind` has already been reported.
    #[must_use]
    pub fn has_reported(&self, kind: LimitKind) -> bool {
        self.reported[kind.index()]
    }
}

fn line_around(text: &str, start: usize, end: usize) -> String {
    let line_start = text[..start].rfind('\n').map_or(0, |pos| pos + 1);
    let line_end = text[end..].find('\n').map_or(text.len(), |pos| end + pos);
    text[line_start..line_end]
        .trim()
        .chars()
        .take(MAX_MESSAGE_CHARS)
        .collect()
}

fn keep_tail(window: String) -> String {
    let count = window.chars().count();
    if count <= TAIL_CHARS {
        return window;
    }
    window.chars().skip(count - TAIL_CHARS).collect()
}
