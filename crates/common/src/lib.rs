//! Common utilities for the test-harness allocator
//!
//! This crate provides the ambient pieces shared by the allocator and its
//! tooling: the external command runner capability, logging setup, error
//! handling, and reusable test mocks.

pub mod error;
pub mod logging;
pub mod runner;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use runner::{CommandResult, CommandRunner, CommandStatus, SystemRunner};
