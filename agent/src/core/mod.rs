//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on the status
//! record and configuration values and return deterministic outputs suitable
//! for tests.

pub mod phase;
pub mod query;
pub mod schedule;
pub mod stage;
pub mod status;
pub mod test_info;
