//! Timeout resolution and rule-based suggestions.

use std::time::Duration;

use shellwire::config::TimeoutRule;
use shellwire::models::execution::CommandSpec;
use shellwire::timing::{resolve_timeout, RuleTimeoutAdvisor, TimeoutAdvisor};
use shellwire::AppError;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn request_beats_advisor_beats_default() {
    assert_eq!(
        resolve_timeout(Some(secs(1)), Some(secs(2)), Some(secs(3))),
        Some(secs(1))
    );
    assert_eq!(
        resolve_timeout(None, Some(secs(2)), Some(secs(3))),
        Some(secs(2))
    );
    assert_eq!(resolve_timeout(None, None, Some(secs(3))), Some(secs(3)));
    assert_eq!(resolve_timeout(None, None, None), None);
}

#[test]
fn zero_means_no_deadline() {
    assert_eq!(
        resolve_timeout(Some(Duration::ZERO), Some(secs(2)), Some(secs(3))),
        None
    );
    assert_eq!(resolve_timeout(None, None, Some(Duration::ZERO)), None);
}

fn rule(pattern: &str, seconds: u64) -> TimeoutRule {
    TimeoutRule {
        pattern: pattern.into(),
        seconds,
    }
}

#[test]
fn first_matching_rule_wins() {
    let advisor = RuleTimeoutAdvisor::from_rules(&[
        rule(r"^cargo test", 600),
        rule(r"^cargo", 300),
    ])
    .unwrap();
    let test = CommandSpec::Argv(vec!["cargo".into(), "test".into()]);
    let build = CommandSpec::Shell("cargo build --release".into());
    assert_eq!(advisor.suggest(&test), Some(secs(600)));
    assert_eq!(advisor.suggest(&build), Some(secs(300)));
    assert_eq!(advisor.suggest(&CommandSpec::Shell("ls".into())), None);
}

#[test]
fn default_advisor_suggests_nothing() {
    let advisor = RuleTimeoutAdvisor::default();
    assert_eq!(advisor.suggest(&CommandSpec::Shell("make".into())), None);
}

#[test]
fn invalid_pattern_is_config_error() {
    let err = RuleTimeoutAdvisor::from_rules(&[rule("(unclosed", 5)]).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("(unclosed")));
}
