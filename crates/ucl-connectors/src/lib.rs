//! # UCL Connectors - Connector Registry and Source-Family Adapters
//!
//! This crate provides the connector registry (C1) and the concrete
//! per-source-family adapters (C3) implementing `ucl_core::Connector`:
//! SQL, issue tracker, wiki, source host, and object store.
//!
//! ## Source families
//!
//! - **SQL** (`adapters::sql`): parameterized cursor reads over Postgres.
//! - **Issue tracker** (`adapters::issue_tracker`): paginated HTTP API
//!   (Jira-shaped), changelog/child-collection expansion.
//! - **Wiki** (`adapters::wiki`): version-scoped page listing.
//! - **Source host** (`adapters::source_host`): repository → tree → file
//!   walking, with binary/oversized files emitted as metadata-only.
//! - **Object store** (`adapters::object_store`): doubles as source
//!   (hive-partitioned listing) and sink backing store.
//! - **Stub** (`adapters::stub`): in-memory fixture connector used to
//!   make the scenarios in spec §8 runnable without live external systems.

pub mod adapters;
pub mod pool;
pub mod registry;

pub use registry::{ConnectorFactory, ConnectorRegistry};
