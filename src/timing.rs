//! Suggested total timeouts by command classification.

use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::config::TimeoutRule;
use crate::models::execution::CommandSpec;
use crate::{AppError, Result};

/// Supplies a suggested total timeout for a command.
pub trait TimeoutAdvisor: Send + Sync {
    /// Suggested deadline, or `None` to defer to the server default.
    fn suggest(&self, command: &CommandSpec) -> Option<Duration>;
}

/// Classifies commands with `[[timeout_rules]]`; first match wins.
#[derive(Debug, Default)]
pub struct RuleTimeoutAdvisor {
    rules: Vec<(Regex, Duration)>,
}

impl RuleTimeoutAdvisor {
    /// Compile `rules` in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid pattern.
    pub fn from_rules(rules: &[TimeoutRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| (regex, Duration::from_secs(rule.seconds)))
                    .map_err(|err| {
                        AppError::Config(format!(
                            "invalid timeout rule pattern '{}': {err}",
                            rule.pattern
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }
}

impl TimeoutAdvisor for RuleTimeoutAdvisor {
    fn suggest(&self, command: &CommandSpec) -> Option<Duration> {
        let text = command.display();
        let suggestion = self
            .rules
            .iter()
            .find(|(regex, _)| regex.is_match(&text))
            .map(|(_, seconds)| *seconds);
        if let Some(seconds) = suggestion {
            debug!(command = %text, seconds = seconds.as_secs(), "timeout rule matched");
        }
        suggestion
    }
}

/// Pick the effective total timeout.
///
/// Precedence is the request, then the advisor, then the server default.
/// A zero duration at any level means no deadline.
#[must_use]
pub fn resolve_timeout(
    requested: Option<Duration>,
    suggested: Option<Duration>,
    default: Option<Duration>,
) -> Option<Duration> {
    requested
        .or(suggested)
        .or(default)
        .filter(|limit| !limit.is_zero())
}
