//! Editor side of the collaboration protocol.
//!
//! - [`state`]: pure connection state machine and its inputs/outputs
//! - [`request`]: ticketed single outstanding request
//! - [`connection`]: async driver, handle and view binding

pub mod connection;
pub mod request;
pub mod state;

pub use connection::{ConnectionHandle, ConnectionParams, EditorConnection, EditorView, NullView, Status};
pub use request::{RequestSlot, Settled, Ticket};
pub use state::{
    Action, Backoff, ClientConfig, Comm, ConnState, ConnectionError, Effect, Machine, Transaction, Wake,
};
