// Board registry - one task per board is the sole consumer of its upstream stream
use futures::StreamExt;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::board::events::{BoardEvent, RawBoardEvent};
use crate::board::models::{BoardId, UserId};
use crate::config::RealtimeConfig;
use crate::db::StoreError;
use crate::realtime::broker::{BrokerError, EventBroker, EventStream};
use crate::realtime::cache::BoardStateCache;
use crate::realtime::connection::{self, ConnectionId, OfferError, Outbound, ViewerConnection};
use crate::realtime::filter::{filter_event, Delivery};
use crate::realtime::sessions::{SessionNotifier, SessionQueue};
use crate::realtime::snapshot::{build_initial_view, SnapshotSource};

#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Per-viewer outbound queue capacity
    pub outbound_queue: usize,
    pub write_timeout: Duration,
    /// Stop a board's task once its last viewer is gone
    pub evict_idle_boards: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for HubSettings {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            outbound_queue: config.outbound_queue,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            evict_idle_boards: config.evict_idle_boards,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The client went away or asked to leave
    Closed,
    TransportError,
    /// The viewer's outbound queue overflowed
    Lagging,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to subscribe to board {board}: {source}")]
    Subscribe {
        board: BoardId,
        #[source]
        source: BrokerError,
    },

    #[error("failed to load board {board}: {source}")]
    Snapshot {
        board: BoardId,
        #[source]
        source: StoreError,
    },

    #[error("subscription for board {0} stopped before the viewer was attached")]
    Stopped(BoardId),
}

/// Proof of a successful attach, used to detach that same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub board: BoardId,
    pub viewer: UserId,
    pub connection: ConnectionId,
}

enum Command {
    Attach {
        viewer: UserId,
        connection: ConnectionId,
        sink: Arc<dyn ViewerConnection>,
        ack: oneshot::Sender<Result<(), HubError>>,
    },
    Detach {
        connection: ConnectionId,
        reason: DetachReason,
    },
    Viewers(oneshot::Sender<Vec<UserId>>),
}

struct BoardHandle {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
}

struct HubInner {
    boards: Mutex<HashMap<BoardId, BoardHandle>>,
    next_id: AtomicU64,
    broker: Arc<dyn EventBroker>,
    snapshots: Arc<dyn SnapshotSource>,
    sessions: SessionQueue,
    settings: HubSettings,
}

/// Registry of active board subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct BoardHub {
    inner: Arc<HubInner>,
}

impl BoardHub {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        broker: Arc<dyn EventBroker>,
        snapshots: Arc<dyn SnapshotSource>,
        sessions: Arc<dyn SessionNotifier>,
        settings: HubSettings,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                boards: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                broker,
                snapshots,
                sessions: SessionQueue::spawn(sessions),
                settings,
            }),
        }
    }

    /// Register a viewer connection for `board`.
    ///
    /// The first viewer of a board starts its subscription task; failing to
    /// subscribe upstream fails the attach. The board task then loads the
    /// snapshot behind the viewer's `BOARD_INIT` itself, in line with its
    /// event stream, so every event not in the snapshot reaches the viewer
    /// live.
    pub async fn attach(
        &self,
        board: BoardId,
        viewer: UserId,
        sink: Arc<dyn ViewerConnection>,
    ) -> Result<Attachment, HubError> {
        let connection = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (ack, acked) = oneshot::channel();
        let command = Command::Attach {
            viewer,
            connection,
            sink,
            ack,
        };

        {
            let mut boards = self.inner.boards.lock().await;
            let pending = match boards.get(&board) {
                Some(handle) => handle.commands.send(command).err().map(|e| e.0),
                None => Some(command),
            };

            if let Some(command) = pending {
                let upstream = self
                    .inner
                    .broker
                    .subscribe(board)
                    .await
                    .map_err(|source| HubError::Subscribe { board, source })?;

                let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::unbounded_channel();
                // rx is alive right here, so this cannot fail
                let _ = tx.send(command);
                boards.insert(
                    board,
                    BoardHandle {
                        generation,
                        commands: tx.clone(),
                    },
                );

                let task = BoardSubscription {
                    board,
                    generation,
                    upstream,
                    commands: rx,
                    commands_tx: tx,
                    cache: None,
                    viewers: HashMap::new(),
                    hub: self.inner.clone(),
                };
                tokio::spawn(task.run());
                tracing::info!(%board, "Board subscription started");
            }
        }

        acked.await.map_err(|_| HubError::Stopped(board))??;
        tracing::info!(%board, %viewer, %connection, "Viewer attached");
        Ok(Attachment {
            board,
            viewer,
            connection,
        })
    }

    /// Remove a connection. Detaching twice, or after the board task has
    /// already dropped the connection, is a no-op.
    pub async fn detach(&self, attachment: Attachment, reason: DetachReason) {
        let boards = self.inner.boards.lock().await;
        if let Some(handle) = boards.get(&attachment.board) {
            let _ = handle.commands.send(Command::Detach {
                connection: attachment.connection,
                reason,
            });
        }
    }

    /// Users currently attached to `board`, one entry per connection.
    pub async fn viewers(&self, board: BoardId) -> Vec<UserId> {
        let (tx, rx) = oneshot::channel();
        {
            let boards = self.inner.boards.lock().await;
            let Some(handle) = boards.get(&board) else {
                return Vec::new();
            };
            if handle.commands.send(Command::Viewers(tx)).is_err() {
                return Vec::new();
            }
        }
        rx.await.unwrap_or_default()
    }

    pub async fn active_boards(&self) -> usize {
        self.inner.boards.lock().await.len()
    }
}

struct ViewerSlot {
    viewer: UserId,
    outbound: Outbound,
}

/// The single consumer of one board's upstream events.
struct BoardSubscription {
    board: BoardId,
    generation: u64,
    upstream: EventStream,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_tx: mpsc::UnboundedSender<Command>,
    cache: Option<BoardStateCache>,
    viewers: HashMap<ConnectionId, ViewerSlot>,
    hub: Arc<HubInner>,
}

impl BoardSubscription {
    async fn run(mut self) {
        loop {
            if self.viewers.is_empty() && self.hub.settings.evict_idle_boards {
                match self.take_pending_or_evict().await {
                    Some(command) => {
                        self.handle_command(command).await;
                        continue;
                    }
                    None => {
                        tracing::info!(board = %self.board, "Board idle, subscription stopped");
                        return;
                    }
                }
            }

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // every sender is gone, including our own
                    None => return,
                },

                raw = self.upstream.next() => match raw {
                    Some(raw) => {
                        if self.dispatch(raw).is_break() {
                            tracing::info!(board = %self.board, "Board deleted, subscription stopped");
                            self.shutdown(false).await;
                            return;
                        }
                    }
                    None => {
                        tracing::warn!(board = %self.board, "Upstream channel closed, subscription stopped");
                        self.shutdown(true).await;
                        return;
                    }
                },
            }
        }
    }

    /// With the registry locked, either pick up a command that raced in or
    /// drop this board's registry entry.
    async fn take_pending_or_evict(&mut self) -> Option<Command> {
        let mut boards = self.hub.boards.lock().await;
        if let Ok(command) = self.commands.try_recv() {
            return Some(command);
        }
        self.unregister(&mut boards);
        None
    }

    fn unregister(&self, boards: &mut HashMap<BoardId, BoardHandle>) {
        if boards
            .get(&self.board)
            .is_some_and(|h| h.generation == self.generation)
        {
            boards.remove(&self.board);
        }
    }

    async fn shutdown(&mut self, notify: bool) {
        {
            let mut boards = self.hub.boards.lock().await;
            self.unregister(&mut boards);
        }
        let connections: Vec<ConnectionId> = self.viewers.keys().copied().collect();
        for connection in connections {
            self.remove_viewer(connection, DetachReason::Closed, notify);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Attach {
                viewer,
                connection,
                sink,
                ack,
            } => self.add_viewer(viewer, connection, sink, ack).await,
            Command::Detach { connection, reason } => {
                self.remove_viewer(connection, reason, true);
            }
            Command::Viewers(reply) => {
                let _ = reply.send(self.viewers.values().map(|s| s.viewer).collect());
            }
        }
    }

    /// Upstream events published while the snapshot loads wait in the
    /// subscription and are dispatched to this viewer afterwards. Those
    /// already reflected in the snapshot arrive again; every list-valued
    /// event replaces state, so replaying them is harmless.
    async fn add_viewer(
        &mut self,
        viewer: UserId,
        connection: ConnectionId,
        sink: Arc<dyn ViewerConnection>,
        ack: oneshot::Sender<Result<(), HubError>>,
    ) {
        let snapshot = match self.hub.snapshots.load(self.board).await {
            Ok(snapshot) => snapshot,
            Err(source) => {
                tracing::warn!(board = %self.board, %viewer, error = %source, "Failed to load board snapshot");
                let _ = ack.send(Err(HubError::Snapshot {
                    board: self.board,
                    source,
                }));
                return;
            }
        };

        if self.cache.is_none() {
            self.cache = Some(BoardStateCache::from_snapshot(&snapshot));
        }

        let commands = self.commands_tx.clone();
        let outbound = connection::spawn_writer(
            connection,
            sink,
            self.hub.settings.outbound_queue,
            self.hub.settings.write_timeout,
            move |_| {
                let _ = commands.send(Command::Detach {
                    connection,
                    reason: DetachReason::TransportError,
                });
            },
        );

        let init = BoardEvent::BoardInit(Box::new(build_initial_view(&snapshot, viewer)));
        if outbound.offer(Arc::new(init)).is_err() {
            tracing::warn!(board = %self.board, %viewer, %connection, "Could not queue initial view");
            return;
        }

        self.viewers.insert(connection, ViewerSlot { viewer, outbound });
        if ack.send(Ok(())).is_err() {
            // the attaching side gave up; it will never detach this connection
            self.remove_viewer(connection, DetachReason::Closed, false);
            return;
        }

        self.hub.sessions.connected(self.board, viewer);
    }

    /// Drop a connection. Only the call that actually removes it notifies
    /// the session collaborator.
    fn remove_viewer(&mut self, connection: ConnectionId, reason: DetachReason, notify: bool) {
        let Some(slot) = self.viewers.remove(&connection) else {
            return;
        };
        tracing::info!(board = %self.board, viewer = %slot.viewer, %connection, ?reason, "Viewer detached");

        if notify {
            self.hub.sessions.disconnected(self.board, slot.viewer);
        }
    }

    fn dispatch(&mut self, raw: RawBoardEvent) -> ControlFlow<()> {
        let event = match BoardEvent::decode(raw) {
            Ok(BoardEvent::BoardInit(_)) => {
                tracing::warn!(board = %self.board, "Dropping upstream BOARD_INIT");
                return ControlFlow::Continue(());
            }
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(board = %self.board, error = %e, "Dropping undecodable event");
                return ControlFlow::Continue(());
            }
        };

        let Some(cache) = self.cache.as_mut() else {
            return ControlFlow::Continue(());
        };
        cache.apply(&event);

        tracing::debug!(
            board = %self.board,
            kind = event.kind(),
            viewers = self.viewers.len(),
            "Dispatching event"
        );

        let shared = Arc::new(event);
        let mut failed = Vec::new();
        for (connection, slot) in &self.viewers {
            let delivery = match filter_event(&shared, slot.viewer, cache) {
                Delivery::Unchanged => shared.clone(),
                Delivery::Rewritten(event) => Arc::new(event),
                Delivery::Suppressed => continue,
            };

            if let Err(e) = slot.outbound.offer(delivery) {
                let reason = match e {
                    OfferError::Full => DetachReason::Lagging,
                    OfferError::Closed => DetachReason::TransportError,
                };
                tracing::warn!(board = %self.board, viewer = %slot.viewer, %connection, ?reason, "Viewer dropped during fan-out");
                failed.push((*connection, reason));
            }
        }

        for (connection, reason) in failed {
            self.remove_viewer(connection, reason, true);
        }

        if matches!(*shared, BoardEvent::BoardDeleted) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
