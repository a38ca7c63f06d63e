// Connection bookkeeping owned outside the hub
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::board::events::BoardEvent;
use crate::board::models::{BoardId, UserId};
use crate::db::{BoardStore, StoreError};
use crate::realtime::broker::EventBroker;

/// Told when a viewer's connection comes and goes. Called once per attach
/// and at most once per detach.
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    async fn participant_connected(&self, board: BoardId, user: UserId);

    async fn participant_disconnected(&self, board: BoardId, user: UserId);
}

/// Flips the participant's `connected` flag and announces the change.
pub struct StoreSessionNotifier {
    store: Arc<dyn BoardStore>,
    broker: Arc<dyn EventBroker>,
}

impl StoreSessionNotifier {
    pub fn new(store: Arc<dyn BoardStore>, broker: Arc<dyn EventBroker>) -> Self {
        Self { store, broker }
    }

    async fn mark(&self, board: BoardId, user: UserId, connected: bool) {
        let participant = match self.store.set_participant_connected(board, user, connected).await {
            Ok(p) => p,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(%board, %user, "Viewer is not a participant, nothing to mark");
                return;
            }
            Err(e) => {
                tracing::error!(%board, %user, error = %e, "Failed to update participant connection");
                return;
            }
        };

        if let Err(e) = self
            .broker
            .publish_event(board, &BoardEvent::ParticipantUpdated(participant))
            .await
        {
            tracing::warn!(%board, %user, error = %e, "Failed to publish participant update");
        }
    }
}

#[async_trait]
impl SessionNotifier for StoreSessionNotifier {
    async fn participant_connected(&self, board: BoardId, user: UserId) {
        self.mark(board, user, true).await;
    }

    async fn participant_disconnected(&self, board: BoardId, user: UserId) {
        self.mark(board, user, false).await;
    }
}

enum SessionChange {
    Connected(BoardId, UserId),
    Disconnected(BoardId, UserId),
}

/// Hands connection changes to the notifier one at a time, in the order the
/// board tasks produced them. Shared by every board so a board that restarts
/// after going idle cannot overtake its own earlier notifications.
#[derive(Clone)]
pub(crate) struct SessionQueue {
    tx: mpsc::UnboundedSender<SessionChange>,
}

impl SessionQueue {
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(notifier: Arc<dyn SessionNotifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                match change {
                    SessionChange::Connected(board, user) => {
                        notifier.participant_connected(board, user).await
                    }
                    SessionChange::Disconnected(board, user) => {
                        notifier.participant_disconnected(board, user).await
                    }
                }
            }
        });
        Self { tx }
    }

    pub(crate) fn connected(&self, board: BoardId, user: UserId) {
        let _ = self.tx.send(SessionChange::Connected(board, user));
    }

    pub(crate) fn disconnected(&self, board: BoardId, user: UserId) {
        let _ = self.tx.send(SessionChange::Disconnected(board, user));
    }
}
