//! Process exit codes for the agent binary.

/// The agent stopped because a phase requested exit.
pub const OK: i32 = 0;
/// Startup failed (bad arguments or the first configuration load).
pub const FATAL: i32 = 1;
