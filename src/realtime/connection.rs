// Per-viewer output: the connection seam plus its bounded outbound queue
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::board::events::BoardEvent;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// A connected viewer's outbound half.
#[async_trait]
pub trait ViewerConnection: Send + Sync {
    async fn write_event(&self, event: &BoardEvent) -> Result<(), ConnectionError>;

    async fn close(&self);
}

/// Identifies one attached connection; a viewer may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OfferError {
    Full,
    Closed,
}

/// Sending half of a viewer's queue. Dropping it lets the writer flush what
/// is queued and then close the connection.
pub(crate) struct Outbound {
    tx: mpsc::Sender<Arc<BoardEvent>>,
}

impl Outbound {
    /// Enqueue without waiting.
    pub(crate) fn offer(&self, event: Arc<BoardEvent>) -> Result<(), OfferError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => OfferError::Full,
            TrySendError::Closed(_) => OfferError::Closed,
        })
    }
}

/// Spawn the task that drains a viewer's queue into its connection.
///
/// Each write is bounded by `write_timeout`. The first failed write calls
/// `on_failure` and stops the writer; either way the connection is closed
/// once the writer exits.
pub(crate) fn spawn_writer<F>(
    id: ConnectionId,
    connection: Arc<dyn ViewerConnection>,
    capacity: usize,
    write_timeout: Duration,
    on_failure: F,
) -> Outbound
where
    F: FnOnce(ConnectionError) + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Arc<BoardEvent>>(capacity.max(1));

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let written =
                match tokio::time::timeout(write_timeout, connection.write_event(&event)).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectionError::Timeout(write_timeout)),
                };

            if let Err(err) = written {
                tracing::warn!(connection = %id, kind = event.kind(), error = %err, "Viewer write failed");
                on_failure(err);
                break;
            }
        }
        connection.close().await;
        tracing::debug!(connection = %id, "Viewer writer stopped");
    });

    Outbound { tx }
}
