//! Configurable, long-running test agent for the slick test manager.
//!
//! Every iteration threads a fresh status record through a fixed sequence of
//! stages whose phase lists come from configuration. Phases can be static
//! values or shell commands that read and rewrite the status through a temp
//! file. The crate is split the usual way:
//!
//! - **[`core`]**: Pure logic (status record, phases, stage table, queue
//!   queries, schedule). No I/O.
//! - **[`io`]**: Configuration loading, process execution, the queue client,
//!   and authenticated status reporting.
//!
//! [`agent`] runs the loop on top of both.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod options;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
