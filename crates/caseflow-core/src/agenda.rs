// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduling agenda.
//!
//! The agenda is the single place where "do X to this plan item instance"
//! intents are queued. Operations are committed in the same transaction as
//! the state change that planned them (an outbox), and are executed later by
//! the lifecycle executor, which lives outside this crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One queued lifecycle intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum AgendaOperation {
    /// Start a plan item instance.
    StartPlanItemInstance {
        plan_item_instance_id: String,
        /// Variables handed to the child process or case of a call task
        #[serde(default, skip_serializing_if = "Option::is_none")]
        child_task_variables: Option<Map<String, Value>>,
        /// Assignee for the task record created when a human task starts
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
    },

    /// Run the create lifecycle of a freshly created instance.
    CreatePlanItemInstance { plan_item_instance_id: String },

    /// Re-evaluate entry/exit criteria of the whole case instance.
    EvaluateCriteria { case_instance_id: String },

    /// Move an active or enabled instance back to available.
    ChangePlanItemInstanceToAvailable { plan_item_instance_id: String },
}

impl AgendaOperation {
    /// Plan item instance targeted by this operation, if any.
    pub fn plan_item_instance_id(&self) -> Option<&str> {
        match self {
            Self::StartPlanItemInstance {
                plan_item_instance_id,
                ..
            }
            | Self::CreatePlanItemInstance {
                plan_item_instance_id,
            }
            | Self::ChangePlanItemInstanceToAvailable {
                plan_item_instance_id,
            } => Some(plan_item_instance_id),
            Self::EvaluateCriteria { .. } => None,
        }
    }

    /// Short operation name, as stored in the agenda table.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartPlanItemInstance { .. } => "start_plan_item_instance",
            Self::CreatePlanItemInstance { .. } => "create_plan_item_instance",
            Self::EvaluateCriteria { .. } => "evaluate_criteria",
            Self::ChangePlanItemInstanceToAvailable { .. } => {
                "change_plan_item_instance_to_available"
            }
        }
    }
}

/// Ordered queue of operations planned during one unit of work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Agenda {
    operations: Vec<AgendaOperation>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_start_plan_item_instance(
        &mut self,
        plan_item_instance_id: &str,
        child_task_variables: Option<Map<String, Value>>,
        assignee: Option<String>,
    ) {
        self.operations.push(AgendaOperation::StartPlanItemInstance {
            plan_item_instance_id: plan_item_instance_id.to_string(),
            child_task_variables,
            assignee,
        });
    }

    pub fn plan_create_plan_item_instance(&mut self, plan_item_instance_id: &str) {
        self.operations.push(AgendaOperation::CreatePlanItemInstance {
            plan_item_instance_id: plan_item_instance_id.to_string(),
        });
    }

    pub fn plan_evaluate_criteria(&mut self, case_instance_id: &str) {
        self.operations.push(AgendaOperation::EvaluateCriteria {
            case_instance_id: case_instance_id.to_string(),
        });
    }

    pub fn plan_change_plan_item_instance_to_available(&mut self, plan_item_instance_id: &str) {
        self.operations
            .push(AgendaOperation::ChangePlanItemInstanceToAvailable {
                plan_item_instance_id: plan_item_instance_id.to_string(),
            });
    }

    pub fn operations(&self) -> &[AgendaOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn into_operations(self) -> Vec<AgendaOperation> {
        self.operations
    }
}
