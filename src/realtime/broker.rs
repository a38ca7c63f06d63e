// Board-scoped publish/subscribe transport
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::board::events::{BoardEvent, RawBoardEvent};
use crate::board::models::BoardId;

/// Upstream events of one board, in publish order.
pub type EventStream = BoxStream<'static, RawBoardEvent>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("event channel unavailable: {0}")]
    Unavailable(String),
}

/// One logical channel per board; payloads travel as untyped envelopes.
#[async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(&self, board: BoardId, event: RawBoardEvent) -> Result<(), BrokerError>;

    async fn subscribe(&self, board: BoardId) -> Result<EventStream, BrokerError>;

    async fn publish_event(&self, board: BoardId, event: &BoardEvent) -> Result<(), BrokerError> {
        self.publish(board, event.encode()?).await
    }
}

/// In-process broker over `tokio::sync::broadcast`.
///
/// Delivery is at-most-once: events published while nobody listens are
/// dropped, and a receiver that falls more than `capacity` events behind
/// skips the overflow (logged).
pub struct BroadcastBroker {
    capacity: usize,
    channels: Mutex<HashMap<BoardId, broadcast::Sender<RawBoardEvent>>>,
}

impl BroadcastBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Boards that currently have at least one channel allocated
    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}

#[async_trait]
impl EventBroker for BroadcastBroker {
    async fn publish(&self, board: BoardId, event: RawBoardEvent) -> Result<(), BrokerError> {
        let mut channels = self.channels.lock().await;
        let Some(tx) = channels.get(&board) else {
            tracing::debug!(%board, kind = %event.kind, "No subscribers for board event");
            return Ok(());
        };

        if tx.send(event).is_err() {
            // every receiver is gone
            channels.remove(&board);
        }
        Ok(())
    }

    async fn subscribe(&self, board: BoardId) -> Result<EventStream, BrokerError> {
        let rx = {
            let mut channels = self.channels.lock().await;
            channels
                .entry(board)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let stream = BroadcastStream::new(rx).filter_map(move |item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(%board, skipped, "Board subscriber lagged, events skipped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_sees_events_in_publish_order() {
        let broker = BroadcastBroker::new(16);
        let board = BoardId::generate();
        let mut stream = broker.subscribe(board).await.unwrap();

        for i in 0..5 {
            broker
                .publish(board, RawBoardEvent::new("NOTES_SYNC", json!([i])))
                .await
                .unwrap();
        }

        for i in 0..5 {
            let event = stream.next().await.unwrap();
            assert_eq!(event.data, json!([i]));
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let broker = BroadcastBroker::new(16);
        broker
            .publish(BoardId::generate(), RawBoardEvent::new("BOARD_DELETED", json!(null)))
            .await
            .unwrap();
        assert_eq!(broker.channel_count().await, 0);
    }

    #[tokio::test]
    async fn boards_are_isolated() {
        let broker = BroadcastBroker::new(16);
        let a = BoardId::generate();
        let b = BoardId::generate();
        let mut stream_a = broker.subscribe(a).await.unwrap();
        let _stream_b = broker.subscribe(b).await.unwrap();

        broker
            .publish(b, RawBoardEvent::new("BOARD_DELETED", json!(null)))
            .await
            .unwrap();
        broker
            .publish_event(a, &BoardEvent::ColumnDeleted(crate::board::models::ColumnId::nil()))
            .await
            .unwrap();

        let event = stream_a.next().await.unwrap();
        assert_eq!(event.kind, "COLUMN_DELETED");
    }

    #[tokio::test]
    async fn dropped_subscribers_release_the_channel() {
        let broker = BroadcastBroker::new(16);
        let board = BoardId::generate();
        drop(broker.subscribe(board).await.unwrap());

        broker
            .publish(board, RawBoardEvent::new("BOARD_DELETED", json!(null)))
            .await
            .unwrap();
        assert_eq!(broker.channel_count().await, 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_overflow_and_continues() {
        let broker = BroadcastBroker::new(2);
        let board = BoardId::generate();
        let mut stream = broker.subscribe(board).await.unwrap();

        for i in 0..5 {
            broker
                .publish(board, RawBoardEvent::new("NOTES_SYNC", json!([i])))
                .await
                .unwrap();
        }

        // only the last `capacity` events survive
        assert_eq!(stream.next().await.unwrap().data, json!([3]));
        assert_eq!(stream.next().await.unwrap().data, json!([4]));
    }
}
