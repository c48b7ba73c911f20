//! Per-connection outbound queue.
//!
//! Responses and notifications for one connection share a single bounded
//! channel drained by the connection's writer task. Sharing the channel
//! keeps a response ahead of the notifications it precedes; the bound
//! turns a slow client into backpressure on the stream drains.

use tokio::sync::mpsc;

use super::protocol::{Notification, RpcResponse};
use crate::Result;

/// One message queued for the WebSocket writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Reply to a request.
    Response(RpcResponse),
    /// Server-initiated notification.
    Notification(Notification),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl Outbound {
    /// Short label for logs: the notification method, or the frame kind.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Response(_) => "response",
            Self::Notification(notification) => notification.method(),
            Self::Close { .. } => "close",
        }
    }

    /// Serialise a response or notification frame.
    ///
    /// Returns `Ok(None)` for [`Outbound::Close`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialisation fails.
    pub fn to_json(&self) -> Result<Option<String>> {
        match self {
            Self::Response(response) => Ok(Some(serde_json::to_string(response)?)),
            Self::Notification(notification) => notification.to_json().map(Some),
            Self::Close { .. } => Ok(None),
        }
    }
}

/// Cloneable sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<Outbound>,
}

impl NotificationSink {
    /// Wrap the sending half of an outbound channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Queue a notification, waiting for capacity.
    ///
    /// Returns `false` once the connection's writer has gone away.
    pub async fn notify(&self, notification: Notification) -> bool {
        self.tx.send(Outbound::Notification(notification)).await.is_ok()
    }

    /// Queue a response, waiting for capacity.
    pub async fn respond(&self, response: RpcResponse) -> bool {
        self.tx.send(Outbound::Response(response)).await.is_ok()
    }

    /// Queue a close frame.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .await
            .is_ok()
    }
}
