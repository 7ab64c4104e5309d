// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors raised while indexing a case definition.

/// Structural problems found in a case definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// An element or definition id is blank.
    #[error("blank id for {context}")]
    EmptyId {
        /// Where the blank id was found.
        context: String,
    },

    /// Two plan items share an element id.
    #[error("duplicate plan item id '{plan_item_id}'")]
    DuplicatePlanItemId {
        /// The repeated element id.
        plan_item_id: String,
    },

    /// A stage definition is placed more than once.
    #[error("stage definition '{definition_id}' is placed more than once")]
    DuplicateStageDefinition {
        /// The repeated stage definition id.
        definition_id: String,
    },

    /// The definition document could not be deserialised.
    #[error("failed to parse case definition: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_display() {
        let err = ModelError::DuplicatePlanItemId {
            plan_item_id: "pi1".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate plan item id 'pi1'");

        let err = ModelError::EmptyId {
            context: "plan model".to_string(),
        };
        assert_eq!(err.to_string(), "blank id for plan model");
    }
}
