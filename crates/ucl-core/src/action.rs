//! The action plane (C9): named, schema-typed, side-effect-bearing
//! connector calls distinct from data reads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionField {
    pub name: String,
    pub field_type: String,
    pub required: bool,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub id: String,
    pub category: ActionCategory,
    pub input_schema: Vec<ActionField>,
    pub output_schema: Vec<ActionField>,
    /// Whether the connector guarantees idempotent re-execution with the
    /// same parameters (e.g. object-store `ensure_bucket`); issue-tracker
    /// `create_issue` is the canonical non-idempotent counterexample (§4.9).
    pub idempotent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}
