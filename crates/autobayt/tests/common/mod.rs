//! Shared helpers for the integration tests
//!
//! Every test gets its own host in a temp directory and a mockito server
//! standing in for the Autobayt cloud API.

mod fixtures;
mod harness;

pub use fixtures::*;
pub use harness::*;
