// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Case Definition Types
//!
//! This crate defines the design-time side of a CMMN case:
//! - [`CaseDefinition`]: the serialisable, already-parsed definition tree
//! - [`PlanItemDefinition`]: closed union of plan item definition kinds
//! - [`CaseModel`]: indexed graph used by the runtime for lookups by element id,
//!   by definition id, and for ancestor-stage queries
//!
//! JSON Schema for the definition document is available through
//! [`case_definition_schema`].

pub mod definition;
pub mod error;
pub mod graph;

pub use definition::{
    CaseDefinition, CaseTaskDefinition, DecisionTaskDefinition, GenericEventListenerDefinition,
    HumanTaskDefinition, MilestoneDefinition, PlanItem, PlanItemDefinition, PlanItemKind,
    PlanModel, ProcessTaskDefinition, ServiceTaskDefinition, StageDefinition,
    TimerEventListenerDefinition, UserEventListenerDefinition,
};
pub use error::ModelError;
pub use graph::{Ancestors, CaseModel, PlanItemNode};

// ============================================================================
// Parsing Functions
// ============================================================================

/// Parse a case definition from a JSON value.
pub fn parse_case_definition(json: &serde_json::Value) -> Result<CaseDefinition, ModelError> {
    serde_json::from_value(json.clone()).map_err(|e| ModelError::Parse(e.to_string()))
}

/// Parse a case definition from JSON text and index it.
pub fn load_case_model(json: &str) -> Result<CaseModel, ModelError> {
    let definition: CaseDefinition =
        serde_json::from_str(json).map_err(|e| ModelError::Parse(e.to_string()))?;
    CaseModel::new(&definition)
}

/// JSON Schema of the case definition document.
pub fn case_definition_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(CaseDefinition);
    // A derived schema always serialises.
    serde_json::to_value(schema).unwrap_or_default()
}
