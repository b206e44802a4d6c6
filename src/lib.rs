//! Entity validation over a message broker.
//!
//! A requester asks "does entity X exist?" by publishing a validation request;
//! the owning service answers from a background consumer; the reply is matched
//! back to the waiting call by message id, bounded by a timeout.

pub mod bus;
pub mod clients;
pub mod config;
pub mod interfaces;
pub mod messages;
pub mod services;
pub mod storage;
pub mod utils;

pub use interfaces::{EntityStore, EntityValidator, StoreError, ValidationError};
pub use messages::{ValidationRequest, ValidationResponse};
