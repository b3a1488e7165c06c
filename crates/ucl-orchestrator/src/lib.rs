//! # UCL Orchestrator - Run State Machine, Checkpoints, Retries, Control Plane
//!
//! This crate provides the orchestration manager (C6): the bounded-fan-out
//! run driver that takes a resolved connector through
//! validate → probe → plan → read → stage → sink → finalize, plus the
//! supporting checkpoint layer (C7), retry policy (C8), and the
//! in-process control surface (§6) `ucl-cli` exposes over HTTP.

pub mod checkpoint;
pub mod control;
pub mod retry;
pub mod run;

pub use checkpoint::CheckpointStore;
pub use control::{OperationStore, StartOperationRequest};
pub use retry::RetryPolicy;
pub use run::{RunDriver, RunParams};
