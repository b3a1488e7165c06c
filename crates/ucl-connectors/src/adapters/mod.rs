//! One module per source family (§4.3), each implementing
//! `ucl_core::Connector`.

pub mod issue_tracker;
pub mod object_store;
pub mod source_host;
pub mod sql;
pub mod stub;
pub mod wiki;
