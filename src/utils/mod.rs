//! Shared helpers for binaries and startup wiring.

pub mod bootstrap;
