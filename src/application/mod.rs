//! Application Layer
//!
//! Connection handlers that run on top of a connector.

mod discard_handler;

pub use discard_handler::DiscardHandler;
