//! Output chunk model.

use serde::{Deserialize, Serialize};

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Child's standard output.
    Stdout,
    /// Child's standard error.
    Stderr,
}

impl StreamKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    /// Dense index for per-stream bookkeeping arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Stdout => 0,
            Self::Stderr => 1,
        }
    }
}

/// One decoded slice of a child's output.
///
/// `seq` is monotonic per stream starting at zero; chunks of different
/// streams carry independent counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Owning execution.
    pub execution_id: String,
    /// Source pipe.
    pub stream: StreamKind,
    /// Per-stream sequence number.
    pub seq: u64,
    /// Decoded text (lossy on invalid UTF-8).
    pub data: String,
}
