// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for caseflow-core.
//!
//! Every variant aborts the whole operation it was raised in. The service
//! commits nothing when an error surfaces, so callers can treat the case
//! instance as unchanged.

use caseflow_model::ModelError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while loading, changing or committing a case.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Case instance was not found.
    #[error("Case instance '{case_instance_id}' not found")]
    CaseInstanceNotFound {
        /// The case instance id that was not found.
        case_instance_id: String,
    },

    /// Case definition was not found.
    #[error("Case definition '{case_definition_id}' not found")]
    CaseDefinitionNotFound {
        /// The case definition id that was not found.
        case_definition_id: String,
    },

    /// Plan item instance was not found in the case instance.
    #[error("Plan item instance '{plan_item_instance_id}' not found")]
    PlanItemInstanceNotFound {
        /// The plan item instance id that was not found.
        plan_item_instance_id: String,
    },

    /// Design-time plan item could not be resolved in the case model.
    #[error("Plan item '{plan_item_id}' not found in case definition '{case_definition_id}'")]
    PlanItemNotFound {
        /// Element id or plan item definition id that was looked up.
        plan_item_id: String,
        /// The case definition searched.
        case_definition_id: String,
    },

    /// No live instance of a plan item definition exists in the case instance.
    #[error(
        "No live plan item instances found for definition '{plan_item_definition_id}' in case instance '{case_instance_id}'"
    )]
    NoLivePlanItemInstances {
        /// The case instance searched.
        case_instance_id: String,
        /// The plan item definition id.
        plan_item_definition_id: String,
    },

    /// No active or enabled instance exists for a definition that should flip to available.
    #[error(
        "No active or enabled plan item instance found for definition '{plan_item_definition_id}' in case instance '{case_instance_id}'"
    )]
    NoActivePlanItemInstance {
        /// The case instance searched.
        case_instance_id: String,
        /// The plan item definition id.
        plan_item_definition_id: String,
    },

    /// More than one candidate instance matched where exactly one is required.
    #[error(
        "Ambiguous state: {count} active or enabled plan item instances found for definition '{plan_item_definition_id}'"
    )]
    AmbiguousState {
        /// The plan item definition id.
        plan_item_definition_id: String,
        /// Number of matching instances.
        count: usize,
    },

    /// A human task plan item instance has no task record.
    #[error("No task record found for human task plan item instance '{plan_item_instance_id}'")]
    MissingBackingRecord {
        /// The plan item instance missing its task.
        plan_item_instance_id: String,
    },

    /// A request builder was used incorrectly.
    #[error("Illegal request: {message}")]
    IllegalBuilderUsage {
        /// What was wrong with the request.
        message: String,
    },

    /// A lifecycle transition is not allowed from the current state.
    #[error("Transition '{transition}' is not possible from state '{state}' for plan item instance '{plan_item_instance_id}'")]
    IllegalTransition {
        /// The plan item instance.
        plan_item_instance_id: String,
        /// Current state, `none` for a fresh instance.
        state: String,
        /// The attempted transition.
        transition: String,
    },

    /// A state has no entry in the transition table, or could not be parsed.
    #[error("Unknown plan item state '{state}'")]
    UnknownPlanItemState {
        /// The offending state.
        state: String,
    },

    /// The case definition graph is structurally invalid.
    #[error("Invalid case model: {details}")]
    InvalidModel {
        /// Why the model was rejected.
        details: String,
    },

    /// Another operation changed the case instance after it was loaded.
    #[error("Case instance '{case_instance_id}' was modified concurrently")]
    ConcurrentModification {
        /// The case instance.
        case_instance_id: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CaseInstanceNotFound { .. } => "CASE_INSTANCE_NOT_FOUND",
            Self::CaseDefinitionNotFound { .. } => "CASE_DEFINITION_NOT_FOUND",
            Self::PlanItemInstanceNotFound { .. } => "PLAN_ITEM_INSTANCE_NOT_FOUND",
            Self::PlanItemNotFound { .. } => "PLAN_ITEM_NOT_FOUND",
            Self::NoLivePlanItemInstances { .. } => "NO_LIVE_PLAN_ITEM_INSTANCES",
            Self::NoActivePlanItemInstance { .. } => "NO_ACTIVE_PLAN_ITEM_INSTANCE",
            Self::AmbiguousState { .. } => "AMBIGUOUS_STATE",
            Self::MissingBackingRecord { .. } => "MISSING_BACKING_RECORD",
            Self::IllegalBuilderUsage { .. } => "ILLEGAL_BUILDER_USAGE",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::UnknownPlanItemState { .. } => "UNKNOWN_PLAN_ITEM_STATE",
            Self::InvalidModel { .. } => "INVALID_MODEL",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error reports a missing case, instance, definition or plan item.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CaseInstanceNotFound { .. }
                | Self::CaseDefinitionNotFound { .. }
                | Self::PlanItemInstanceNotFound { .. }
                | Self::PlanItemNotFound { .. }
                | Self::NoLivePlanItemInstances { .. }
                | Self::NoActivePlanItemInstance { .. }
        )
    }

    pub(crate) fn illegal_request(message: impl Into<String>) -> Self {
        Self::IllegalBuilderUsage {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<ModelError> for CoreError {
    fn from(err: ModelError) -> Self {
        CoreError::InvalidModel {
            details: err.to_string(),
        }
    }
}
