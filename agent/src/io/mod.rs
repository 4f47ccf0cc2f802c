//! Side-effecting adapters: configuration, processes, queue, and status reporting over gRPC.

pub mod config;
pub mod grpc;
pub mod phase;
pub mod process;
pub mod queue;
pub mod reporter;
