// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dynamic state migration of a running case instance.
//!
//! A [`ChangePlanItemStateRequest`] is expanded by the [`planner`] into
//! [`MovePlanItemInstanceEntityContainer`]s and then applied by the
//! [`executor`] in fixed phases:
//!
//! 1. terminate every move source and collapse orphaned ancestor stages
//! 2. materialise the move targets, creating missing stages on the way
//! 3. activate requested plan items
//! 4. flip requested plan items back to available
//! 5. terminate requested plan items
//!
//! All phases work on one [`crate::unit_of_work::CaseUnitOfWork`]; any error
//! discards it.

pub mod executor;
pub mod hierarchy;
pub mod planner;
pub mod request;

use std::collections::HashMap;

use caseflow_model::PlanItemNode;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::agenda::AgendaOperation;
use crate::persistence::PlanItemInstanceRecord;

pub use self::request::{
    ChangePlanItemStateBuilder, ChangePlanItemStateRequest, MovePlanItemDefinitionIdContainer,
    MovePlanItemInstanceIdContainer,
};

/// Source and target design-time plan items of one move.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItemMoveEntry {
    pub original_plan_item: PlanItemNode,
    pub new_plan_item: PlanItemNode,
}

/// One resolved migration step: sources sharing a containing stage and their targets.
#[derive(Debug, Clone, PartialEq)]
pub struct MovePlanItemInstanceEntityContainer {
    /// Source instances as loaded, before termination.
    pub plan_item_instances: Vec<PlanItemInstanceRecord>,
    pub case_instance_id: String,
    pub case_definition_id: String,
    pub tenant_id: String,
    pub move_to_plan_item_definition_ids: Vec<String>,
    /// Move entries in target order; see [`Self::move_entry`].
    pub move_entries: Vec<PlanItemMoveEntry>,
    /// Source instance id to the stage instance that keeps its place.
    pub continue_parent_plan_item_instances: HashMap<String, Option<String>>,
    pub new_assignee_id: Option<String>,
}

impl MovePlanItemInstanceEntityContainer {
    /// Move entry by target element id.
    pub fn move_entry(&self, plan_item_id: &str) -> Option<&PlanItemMoveEntry> {
        self.move_entries
            .iter()
            .find(|entry| entry.new_plan_item.id == plan_item_id)
    }

    pub fn plan_item_instance_ids(&self) -> impl Iterator<Item = &str> {
        self.plan_item_instances.iter().map(|pii| pii.id.as_str())
    }

    /// Stage instance the targets are placed under by default.
    pub fn continue_parent(&self) -> Option<&str> {
        self.plan_item_instances
            .first()
            .and_then(|pii| self.continue_parent_plan_item_instances.get(&pii.id))
            .and_then(|parent| parent.as_deref())
    }
}

/// Scratch state of one change-state operation.
#[derive(Debug, Clone, Default)]
pub struct CaseInstanceChangeState {
    pub case_instance_id: String,
    pub case_variables: Map<String, Value>,
    /// Live stage instances when the operation began, by stage definition id.
    pub current_stage_instances: HashMap<String, Vec<String>>,
    pub move_containers: Vec<MovePlanItemInstanceEntityContainer>,
    created_stage_instances: HashMap<String, String>,
    pub activate_plan_item_definition_ids: Vec<String>,
    pub change_to_available_state_plan_item_definition_ids: Vec<String>,
    pub terminate_plan_item_definition_ids: Vec<String>,
    pub child_instance_task_variables: HashMap<String, Map<String, Value>>,
}

impl CaseInstanceChangeState {
    pub fn new(request: &ChangePlanItemStateRequest) -> Self {
        Self {
            case_instance_id: request.case_instance_id.clone(),
            case_variables: request.case_variables.clone(),
            activate_plan_item_definition_ids: request.activate_plan_item_definition_ids.clone(),
            change_to_available_state_plan_item_definition_ids: request
                .change_to_available_state_plan_item_definition_ids
                .clone(),
            terminate_plan_item_definition_ids: request.terminate_plan_item_definition_ids.clone(),
            child_instance_task_variables: request.child_instance_task_variables.clone(),
            ..Self::default()
        }
    }

    /// Stage instance created or reused for a stage definition during this operation.
    pub fn created_stage_instance(&self, stage_definition_id: &str) -> Option<&str> {
        self.created_stage_instances
            .get(stage_definition_id)
            .map(String::as_str)
    }

    /// Remember a stage instance; the first one recorded for a definition wins.
    pub fn add_created_stage_instance(&mut self, stage_definition_id: &str, instance_id: &str) {
        self.created_stage_instances
            .entry(stage_definition_id.to_string())
            .or_insert_with(|| instance_id.to_string());
    }

    pub fn created_stage_instance_count(&self) -> usize {
        self.created_stage_instances.len()
    }

    /// Child variables for a call task target, if any were supplied.
    pub fn child_task_variables_for(&self, plan_item: &PlanItemNode) -> Option<Map<String, Value>> {
        if !plan_item.kind().is_call_task() {
            return None;
        }
        self.child_instance_task_variables
            .get(plan_item.definition_id())
            .cloned()
    }
}

/// What a change-state operation did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStateOutcome {
    pub case_instance_id: String,
    /// Instances created, in creation order.
    pub created_plan_item_instance_ids: Vec<String>,
    /// Instances terminated, in termination order.
    pub terminated_plan_item_instance_ids: Vec<String>,
    /// Task records deleted or reassigned.
    pub changed_task_ids: Vec<String>,
    /// Agenda operations committed with the change, in planning order.
    pub agenda: Vec<AgendaOperation>,
}
