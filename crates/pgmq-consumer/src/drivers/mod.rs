//! Queue driver implementations.
//!
//! This module contains concrete implementations of the `QueueDriver` trait.
//! Backend drivers for the SQL queue extension live outside this crate.

pub mod memory;

pub use memory::{DriverOperation, InMemoryConfig, InMemoryDriver};
