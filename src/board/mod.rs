// Board domain: plain data, the event union, and the pure rules over them
pub mod authz;
pub mod events;
pub mod models;
pub mod ranks;

pub use events::{BoardEvent, RawBoardEvent};
pub use models::*;
