//! Session model: one client connection and its active execution slot.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::orchestrator::execution::Execution;
use crate::{AppError, Result};

/// A connected client.
///
/// The `active` slot enforces the one-non-terminal-execution invariant:
/// [`try_attach`](Self::try_attach) checks and fills it under a single
/// lock acquisition.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier, echoed in `connected`.
    pub id: String,
    /// Remote address of the connection, when known.
    pub peer: Option<String>,
    /// Connection timestamp.
    pub created_at: DateTime<Utc>,
    active: Mutex<Option<Arc<Execution>>>,
}

impl Session {
    /// Construct a new session with a generated identifier.
    #[must_use]
    pub fn new(peer: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer,
            created_at: Utc::now(),
            active: Mutex::new(None),
        }
    }

    /// Current non-terminal execution, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<Execution>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether an execution is attached.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    /// Attach `execution` as the session's active execution.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Busy` if another execution is still attached.
    pub fn try_attach(&self, execution: Arc<Execution>) -> Result<()> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            return Err(AppError::Busy(format!(
                "execution {} is still {}",
                current.id,
                current.state().as_str()
            )));
        }
        *slot = Some(execution);
        Ok(())
    }

    /// Clear the slot if it still holds `execution_id`.
    ///
    /// Returns whether anything was detached.
    pub fn detach(&self, execution_id: &str) -> bool {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|e| e.id == execution_id) {
            *slot = None;
            true
        } else {
            false
        }
    }
}
