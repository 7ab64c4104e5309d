// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller-facing change-state request and its builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Move a set of plan item instances, addressed by id, to target definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePlanItemInstanceIdContainer {
    pub plan_item_instance_ids: Vec<String>,
    pub move_to_plan_item_definition_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_assignee_id: Option<String>,
}

impl MovePlanItemInstanceIdContainer {
    pub fn new(plan_item_instance_ids: Vec<String>, move_to_plan_item_definition_ids: Vec<String>) -> Self {
        Self {
            plan_item_instance_ids,
            move_to_plan_item_definition_ids,
            new_assignee_id: None,
        }
    }
}

/// Move every live instance of some plan item definitions to target definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePlanItemDefinitionIdContainer {
    pub plan_item_definition_ids: Vec<String>,
    pub move_to_plan_item_definition_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_assignee_id: Option<String>,
}

impl MovePlanItemDefinitionIdContainer {
    pub fn new(plan_item_definition_ids: Vec<String>, move_to_plan_item_definition_ids: Vec<String>) -> Self {
        Self {
            plan_item_definition_ids,
            move_to_plan_item_definition_ids,
            new_assignee_id: None,
        }
    }
}

/// A validated request to reshape one running case instance.
///
/// Produced by [`ChangePlanItemStateBuilder::build`] or deserialised from
/// JSON. Deserialised requests are validated again by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanItemStateRequest {
    pub case_instance_id: String,
    #[serde(default)]
    pub move_plan_item_instance_id_list: Vec<MovePlanItemInstanceIdContainer>,
    #[serde(default)]
    pub move_plan_item_definition_id_list: Vec<MovePlanItemDefinitionIdContainer>,
    #[serde(default)]
    pub activate_plan_item_definition_ids: Vec<String>,
    #[serde(default)]
    pub change_to_available_state_plan_item_definition_ids: Vec<String>,
    #[serde(default)]
    pub terminate_plan_item_definition_ids: Vec<String>,
    /// Variables merged into the case scope before any structural change.
    #[serde(default)]
    pub case_variables: Map<String, Value>,
    /// Variables for child processes or cases, keyed by plan item definition id.
    #[serde(default)]
    pub child_instance_task_variables: HashMap<String, Map<String, Value>>,
}

impl ChangePlanItemStateRequest {
    /// Whether the request asks for any structural change at all.
    pub fn has_operations(&self) -> bool {
        !self.move_plan_item_instance_id_list.is_empty()
            || !self.move_plan_item_definition_id_list.is_empty()
            || !self.activate_plan_item_definition_ids.is_empty()
            || !self.change_to_available_state_plan_item_definition_ids.is_empty()
            || !self.terminate_plan_item_definition_ids.is_empty()
    }

    /// Check the request shape.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalBuilderUsage`] for a blank case instance id, a
    /// request without operations, or a move group with no sources or targets.
    pub fn validate(&self) -> Result<()> {
        if self.case_instance_id.trim().is_empty() {
            return Err(CoreError::illegal_request("Case instance id is required"));
        }
        if !self.has_operations() {
            return Err(CoreError::illegal_request(
                "No move, activate, change-to-available or terminate operation was requested",
            ));
        }

        for container in &self.move_plan_item_instance_id_list {
            check_ids("plan item instance ids", &container.plan_item_instance_ids)?;
            check_ids("move target definition ids", &container.move_to_plan_item_definition_ids)?;
        }
        for container in &self.move_plan_item_definition_id_list {
            check_ids("plan item definition ids", &container.plan_item_definition_ids)?;
            check_ids("move target definition ids", &container.move_to_plan_item_definition_ids)?;
        }
        for (label, ids) in [
            ("activate", &self.activate_plan_item_definition_ids),
            ("change to available", &self.change_to_available_state_plan_item_definition_ids),
            ("terminate", &self.terminate_plan_item_definition_ids),
        ] {
            if ids.iter().any(|id| id.trim().is_empty()) {
                return Err(CoreError::illegal_request(format!(
                    "Blank plan item definition id in {} list",
                    label
                )));
            }
        }
        Ok(())
    }
}

fn check_ids(label: &str, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(CoreError::illegal_request(format!("Move group has no {}", label)));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(CoreError::illegal_request(format!("Move group has a blank entry in {}", label)));
    }
    Ok(())
}

/// Fluent builder for [`ChangePlanItemStateRequest`].
///
/// A plain value: building does not execute anything. Pass the request to
/// [`crate::CaseRuntimeService::change_state`].
///
/// ```ignore
/// let request = ChangePlanItemStateBuilder::new()
///     .case_instance_id(&case_id)
///     .move_plan_item_instance_to_plan_item_definition_id(&task_id, "approve")
///     .case_variable("approved", json!(true))
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChangePlanItemStateBuilder {
    case_instance_id: Option<String>,
    move_plan_item_instance_id_list: Vec<MovePlanItemInstanceIdContainer>,
    move_plan_item_definition_id_list: Vec<MovePlanItemDefinitionIdContainer>,
    activate_plan_item_definition_ids: Vec<String>,
    change_to_available_state_plan_item_definition_ids: Vec<String>,
    terminate_plan_item_definition_ids: Vec<String>,
    case_variables: Map<String, Value>,
    child_instance_task_variables: HashMap<String, Map<String, Value>>,
}

fn push_unique(list: &mut Vec<String>, id: impl Into<String>) {
    let id = id.into();
    if !list.contains(&id) {
        list.push(id);
    }
}

impl ChangePlanItemStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case_instance_id(mut self, case_instance_id: impl Into<String>) -> Self {
        self.case_instance_id = Some(case_instance_id.into());
        self
    }

    pub fn move_plan_item_instance_to_plan_item_definition_id(
        self,
        plan_item_instance_id: impl Into<String>,
        plan_item_definition_id: impl Into<String>,
    ) -> Self {
        self.move_plan_item_instances(
            vec![plan_item_instance_id.into()],
            vec![plan_item_definition_id.into()],
            None,
        )
    }

    /// Move one instance and reassign the resulting human task.
    pub fn move_plan_item_instance_to_plan_item_definition_id_with_assignee(
        self,
        plan_item_instance_id: impl Into<String>,
        plan_item_definition_id: impl Into<String>,
        new_assignee_id: impl Into<String>,
    ) -> Self {
        self.move_plan_item_instances(
            vec![plan_item_instance_id.into()],
            vec![plan_item_definition_id.into()],
            Some(new_assignee_id.into()),
        )
    }

    /// Merge several instances into one target.
    pub fn move_plan_item_instances_to_single_plan_item_definition_id(
        self,
        plan_item_instance_ids: Vec<String>,
        plan_item_definition_id: impl Into<String>,
    ) -> Self {
        self.move_plan_item_instances(plan_item_instance_ids, vec![plan_item_definition_id.into()], None)
    }

    /// Split one instance into several targets.
    pub fn move_single_plan_item_instance_to_plan_item_definition_ids(
        self,
        plan_item_instance_id: impl Into<String>,
        plan_item_definition_ids: Vec<String>,
    ) -> Self {
        self.move_plan_item_instances(vec![plan_item_instance_id.into()], plan_item_definition_ids, None)
    }

    fn move_plan_item_instances(
        mut self,
        plan_item_instance_ids: Vec<String>,
        targets: Vec<String>,
        new_assignee_id: Option<String>,
    ) -> Self {
        let mut container = MovePlanItemInstanceIdContainer::new(plan_item_instance_ids, targets);
        container.new_assignee_id = new_assignee_id;
        self.move_plan_item_instance_id_list.push(container);
        self
    }

    pub fn move_plan_item_definition_id_to(
        self,
        plan_item_definition_id: impl Into<String>,
        target_plan_item_definition_id: impl Into<String>,
    ) -> Self {
        self.move_plan_item_definitions(
            vec![plan_item_definition_id.into()],
            vec![target_plan_item_definition_id.into()],
            None,
        )
    }

    pub fn move_plan_item_definition_id_to_with_assignee(
        self,
        plan_item_definition_id: impl Into<String>,
        target_plan_item_definition_id: impl Into<String>,
        new_assignee_id: impl Into<String>,
    ) -> Self {
        self.move_plan_item_definitions(
            vec![plan_item_definition_id.into()],
            vec![target_plan_item_definition_id.into()],
            Some(new_assignee_id.into()),
        )
    }

    fn move_plan_item_definitions(
        mut self,
        plan_item_definition_ids: Vec<String>,
        targets: Vec<String>,
        new_assignee_id: Option<String>,
    ) -> Self {
        let mut container = MovePlanItemDefinitionIdContainer::new(plan_item_definition_ids, targets);
        container.new_assignee_id = new_assignee_id;
        self.move_plan_item_definition_id_list.push(container);
        self
    }

    pub fn activate_plan_item_definition_id(mut self, plan_item_definition_id: impl Into<String>) -> Self {
        push_unique(&mut self.activate_plan_item_definition_ids, plan_item_definition_id);
        self
    }

    pub fn activate_plan_item_definition_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            push_unique(&mut self.activate_plan_item_definition_ids, id);
        }
        self
    }

    pub fn change_to_available_state_by_plan_item_definition_id(
        mut self,
        plan_item_definition_id: impl Into<String>,
    ) -> Self {
        push_unique(
            &mut self.change_to_available_state_plan_item_definition_ids,
            plan_item_definition_id,
        );
        self
    }

    pub fn terminate_plan_item_definition_id(mut self, plan_item_definition_id: impl Into<String>) -> Self {
        push_unique(&mut self.terminate_plan_item_definition_ids, plan_item_definition_id);
        self
    }

    pub fn case_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.case_variables.insert(name.into(), value);
        self
    }

    pub fn case_variables(mut self, variables: Map<String, Value>) -> Self {
        self.case_variables.extend(variables);
        self
    }

    /// Variable for the child process or case started by a call task.
    pub fn child_instance_task_variable(
        mut self,
        plan_item_definition_id: impl Into<String>,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        self.child_instance_task_variables
            .entry(plan_item_definition_id.into())
            .or_default()
            .insert(name.into(), value);
        self
    }

    pub fn child_instance_task_variables(
        mut self,
        plan_item_definition_id: impl Into<String>,
        variables: Map<String, Value>,
    ) -> Self {
        self.child_instance_task_variables
            .entry(plan_item_definition_id.into())
            .or_default()
            .extend(variables);
        self
    }

    /// Finish the request.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalBuilderUsage`] when no case instance id was given,
    /// nothing was requested, or a move group is empty.
    pub fn build(self) -> Result<ChangePlanItemStateRequest> {
        let case_instance_id = self
            .case_instance_id
            .ok_or_else(|| CoreError::illegal_request("Case instance id is required"))?;

        let request = ChangePlanItemStateRequest {
            case_instance_id,
            move_plan_item_instance_id_list: self.move_plan_item_instance_id_list,
            move_plan_item_definition_id_list: self.move_plan_item_definition_id_list,
            activate_plan_item_definition_ids: self.activate_plan_item_definition_ids,
            change_to_available_state_plan_item_definition_ids: self
                .change_to_available_state_plan_item_definition_ids,
            terminate_plan_item_definition_ids: self.terminate_plan_item_definition_ids,
            case_variables: self.case_variables,
            child_instance_task_variables: self.child_instance_task_variables,
        };
        request.validate()?;
        Ok(request)
    }
}
