// Fan-out of board events to connected viewers
pub mod broker;
pub mod cache;
pub mod connection;
pub mod filter;
pub mod hub;
pub mod sessions;
pub mod snapshot;

pub use broker::{BroadcastBroker, BrokerError, EventBroker, EventStream};
pub use connection::{ConnectionError, ConnectionId, ViewerConnection};
pub use hub::{Attachment, BoardHub, DetachReason, HubError, HubSettings};
pub use sessions::{SessionNotifier, StoreSessionNotifier};
pub use snapshot::{SnapshotSource, StoreSnapshots};
