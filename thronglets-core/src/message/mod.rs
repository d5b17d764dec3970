//! Asynchronous messaging between agents.

mod router;

pub use router::{DEFAULT_RECEIVE_LIMIT, MessageRouter, OutgoingMessage};
