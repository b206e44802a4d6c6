//! Abstract interfaces for entity validation components.
//!
//! These traits define the contracts for:
//! - Entity validation (the operation exposed to the rest of a service)
//! - Entity storage (the owning service's existence lookup)

pub mod entity_store;
pub mod validator;

pub use entity_store::{EntityStore, StoreError};
pub use validator::{EntityValidator, ValidationError};
