// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory unit of work over one case instance.
//!
//! The unit of work owns a loaded [`CaseSnapshot`], answers the tree queries
//! the migration engine needs, records every mutation and finally turns into a
//! [`CaseChangeSet`]. Nothing reaches storage until the change set is committed,
//! so dropping a unit of work after an error discards the whole operation.

use std::collections::{HashMap, HashSet};

use caseflow_model::PlanItemNode;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agenda::Agenda;
use crate::error::{CoreError, Result};
use crate::persistence::{
    CaseChangeSet, CaseInstanceRecord, CaseSnapshot, PlanItemInstanceRecord, TaskRecord,
};
use crate::state::{self, PlanItemTransition};

/// Delete reason written on task records removed by a state change.
pub const CHANGE_STATE_DELETE_REASON: &str = "Change plan item state";

/// Mutable working copy of one case instance.
#[derive(Debug)]
pub struct CaseUnitOfWork {
    case_instance: CaseInstanceRecord,
    is_new_case: bool,
    plan_items: Vec<PlanItemInstanceRecord>,
    index: HashMap<String, usize>,
    created: Vec<String>,
    updated: HashSet<String>,
    terminated: Vec<String>,
    tasks: Vec<TaskRecord>,
    updated_tasks: Vec<String>,
    agenda: Agenda,
    now: DateTime<Utc>,
}

impl CaseUnitOfWork {
    /// Wrap a loaded snapshot.
    pub fn new(snapshot: CaseSnapshot, now: DateTime<Utc>) -> Self {
        let index = snapshot
            .plan_item_instances
            .iter()
            .enumerate()
            .map(|(i, pii)| (pii.id.clone(), i))
            .collect();

        Self {
            case_instance: snapshot.case_instance,
            is_new_case: false,
            plan_items: snapshot.plan_item_instances,
            index,
            created: Vec::new(),
            updated: HashSet::new(),
            terminated: Vec::new(),
            tasks: snapshot.tasks,
            updated_tasks: Vec::new(),
            agenda: Agenda::new(),
            now,
        }
    }

    /// Start from a case instance that is not stored yet.
    pub fn for_new_case(case_instance: CaseInstanceRecord, now: DateTime<Utc>) -> Self {
        let mut uow = Self::new(
            CaseSnapshot {
                case_instance,
                plan_item_instances: Vec::new(),
                tasks: Vec::new(),
            },
            now,
        );
        uow.is_new_case = true;
        uow
    }

    pub fn case_instance(&self) -> &CaseInstanceRecord {
        &self.case_instance
    }

    pub fn case_instance_id(&self) -> &str {
        &self.case_instance.id
    }

    /// Timestamp used for every change in this unit of work.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Point the case at its root instance; used when starting a new case.
    pub fn set_plan_model_instance_id(&mut self, plan_item_instance_id: &str) {
        self.case_instance.plan_model_instance_id = plan_item_instance_id.to_string();
    }

    /// Merge variables into the case scope, overwriting existing names.
    pub fn set_case_variables(&mut self, variables: &Map<String, Value>) {
        for (name, value) in variables {
            self.case_instance
                .variables
                .insert(name.clone(), value.clone());
        }
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    pub fn agenda_mut(&mut self) -> &mut Agenda {
        &mut self.agenda
    }

    /// Root plan model instance.
    pub fn plan_model_instance(&self) -> Result<&PlanItemInstanceRecord> {
        self.find_plan_item_instance_by_id(&self.case_instance.plan_model_instance_id)
    }

    pub fn plan_item_instance(&self, id: &str) -> Option<&PlanItemInstanceRecord> {
        self.index.get(id).map(|&i| &self.plan_items[i])
    }

    /// Resolve an instance id of this case.
    pub fn find_plan_item_instance_by_id(&self, id: &str) -> Result<&PlanItemInstanceRecord> {
        self.plan_item_instance(id)
            .ok_or_else(|| CoreError::PlanItemInstanceNotFound {
                plan_item_instance_id: id.to_string(),
            })
    }

    /// Mutable access; marks the instance for update unless it was created here.
    fn plan_item_instance_mut(&mut self, id: &str) -> Result<&mut PlanItemInstanceRecord> {
        let Some(&i) = self.index.get(id) else {
            return Err(CoreError::PlanItemInstanceNotFound {
                plan_item_instance_id: id.to_string(),
            });
        };
        if !self.created.iter().any(|c| c == id) {
            self.updated.insert(id.to_string());
        }
        Ok(&mut self.plan_items[i])
    }

    /// Every plan item instance of the case, in creation order.
    pub fn find_plan_item_instances_by_case_instance_id(&self) -> &[PlanItemInstanceRecord] {
        &self.plan_items
    }

    /// Instances of a design-time plan item (element id), ended ones included.
    pub fn find_plan_item_instances_by_plan_item_id(
        &self,
        element_id: &str,
    ) -> Vec<&PlanItemInstanceRecord> {
        self.plan_items
            .iter()
            .filter(|pii| pii.element_id == element_id)
            .collect()
    }

    /// Live instances of a plan item definition.
    pub fn find_live_by_definition_id(&self, definition_id: &str) -> Vec<&PlanItemInstanceRecord> {
        self.plan_items
            .iter()
            .filter(|pii| pii.is_live() && pii.plan_item_definition_id == definition_id)
            .collect()
    }

    /// Direct children of a stage instance, ended ones included.
    pub fn find_stage_children(&self, stage_instance_id: &str) -> Vec<&PlanItemInstanceRecord> {
        self.plan_items
            .iter()
            .filter(|pii| pii.stage_instance_id.as_deref() == Some(stage_instance_id))
            .collect()
    }

    /// Ids of all live instances nested anywhere below a stage instance.
    pub fn live_descendant_ids(&self, stage_instance_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut pending = vec![stage_instance_id.to_string()];
        while let Some(parent) = pending.pop() {
            for child in self.find_stage_children(&parent) {
                if child.is_live() {
                    result.push(child.id.clone());
                }
                if child.is_stage {
                    pending.push(child.id.clone());
                }
            }
        }
        result
    }

    /// Whether `ancestor_id` is `instance_id` or one of its containing stage instances.
    pub fn is_same_or_ancestor_instance(&self, ancestor_id: &str, instance_id: &str) -> bool {
        let mut current = Some(instance_id);
        while let Some(id) = current {
            if id == ancestor_id {
                return true;
            }
            current = self
                .plan_item_instance(id)
                .and_then(|pii| pii.stage_instance_id.as_deref());
        }
        false
    }

    /// Whether the instance and every stage instance containing it are live.
    pub fn is_live_in_tree(&self, id: &str) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            match self.plan_item_instance(id) {
                Some(pii) if pii.is_live() => current = pii.stage_instance_id.as_deref(),
                _ => return false,
            }
        }
        true
    }

    /// Create a new instance of `plan_item` in `AVAILABLE` state.
    ///
    /// `parent_instance_id` is the containing stage instance, `None` only for
    /// the plan model. With `add_to_parent` false the instance is created
    /// detached from any stage, which is only valid for the plan model.
    pub fn create_child_plan_item_instance(
        &mut self,
        plan_item: &PlanItemNode,
        parent_instance_id: Option<&str>,
        add_to_parent: bool,
    ) -> Result<String> {
        if !state::is_possible(None, PlanItemTransition::Create)? {
            return Err(CoreError::IllegalTransition {
                plan_item_instance_id: plan_item.id.clone(),
                state: "none".to_string(),
                transition: PlanItemTransition::Create.to_string(),
            });
        }

        let stage_instance_id = match (parent_instance_id, add_to_parent) {
            (Some(parent), true) => {
                let parent_record = self.find_plan_item_instance_by_id(parent)?;
                if !parent_record.is_stage {
                    return Err(CoreError::InvalidModel {
                        details: format!(
                            "plan item instance '{}' is not a stage and cannot contain '{}'",
                            parent, plan_item.id
                        ),
                    });
                }
                Some(parent.to_string())
            }
            _ => None,
        };

        let id = Uuid::new_v4().to_string();
        let record = PlanItemInstanceRecord {
            id: id.clone(),
            case_definition_id: self.case_instance.case_definition_id.clone(),
            case_instance_id: self.case_instance.id.clone(),
            tenant_id: self.case_instance.tenant_id.clone(),
            element_id: plan_item.id.clone(),
            plan_item_definition_id: plan_item.definition_id().to_string(),
            plan_item_definition_type: plan_item.kind(),
            name: plan_item.display_name().map(str::to_string),
            state: PlanItemTransition::Create.target_state(),
            stage_instance_id,
            is_stage: plan_item.is_stage(),
            create_time: self.now,
            last_available_time: Some(self.now),
            start_time: None,
            ended_time: None,
            terminated_time: None,
            revision: 1,
        };

        self.index.insert(id.clone(), self.plan_items.len());
        self.plan_items.push(record);
        self.created.push(id.clone());
        Ok(id)
    }

    /// Apply a lifecycle transition to an instance.
    pub fn transition(&mut self, id: &str, transition: PlanItemTransition) -> Result<()> {
        let now = self.now;
        self.plan_item_instance_mut(id)?
            .apply_transition(transition, now)
    }

    /// Terminate an instance administratively.
    ///
    /// Returns false, and changes nothing, when the instance had already ended.
    pub fn terminate_plan_item_instance(&mut self, id: &str) -> Result<bool> {
        if !self.find_plan_item_instance_by_id(id)?.is_live() {
            return Ok(false);
        }
        let now = self.now;
        let terminated = self.plan_item_instance_mut(id)?.force_terminate(now);
        if terminated {
            self.terminated.push(id.to_string());
        }
        Ok(terminated)
    }

    /// Live (not deleted) task records of a plan item instance.
    pub fn find_tasks_by_plan_item_instance_id(&self, plan_item_instance_id: &str) -> Vec<&TaskRecord> {
        self.tasks
            .iter()
            .filter(|t| t.plan_item_instance_id == plan_item_instance_id && !t.is_deleted())
            .collect()
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut TaskRecord> {
        let Some(i) = self.tasks.iter().position(|t| t.id == task_id) else {
            return Err(CoreError::DatabaseError {
                operation: "task".to_string(),
                details: format!("task '{}' is not part of case '{}'", task_id, self.case_instance.id),
            });
        };
        if !self.updated_tasks.iter().any(|t| t == task_id) {
            self.updated_tasks.push(task_id.to_string());
        }
        Ok(&mut self.tasks[i])
    }

    /// Soft-delete a task record.
    pub fn delete_task(&mut self, task_id: &str, reason: &str) -> Result<()> {
        let now = self.now;
        let task = self.task_mut(task_id)?;
        task.delete_reason = Some(reason.to_string());
        task.delete_time = Some(now);
        Ok(())
    }

    pub fn reassign_task(&mut self, task_id: &str, assignee: &str) -> Result<()> {
        self.task_mut(task_id)?.assignee = Some(assignee.to_string());
        Ok(())
    }

    /// Delete every live task record of a human task instance.
    ///
    /// Fails with [`CoreError::MissingBackingRecord`] when there is none.
    pub fn delete_tasks_of(&mut self, plan_item_instance_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = self
            .find_tasks_by_plan_item_instance_id(plan_item_instance_id)
            .into_iter()
            .map(|t| t.id.clone())
            .collect();
        if ids.is_empty() {
            return Err(CoreError::MissingBackingRecord {
                plan_item_instance_id: plan_item_instance_id.to_string(),
            });
        }
        for id in &ids {
            self.delete_task(id, CHANGE_STATE_DELETE_REASON)?;
        }
        Ok(ids)
    }

    /// Ids of instances created in this unit of work, in creation order.
    pub fn created_ids(&self) -> &[String] {
        &self.created
    }

    /// Ids of instances terminated in this unit of work, in order.
    pub fn terminated_ids(&self) -> &[String] {
        &self.terminated
    }

    /// Ids of task records changed in this unit of work.
    pub fn updated_task_ids(&self) -> &[String] {
        &self.updated_tasks
    }

    /// Freeze all recorded changes.
    pub fn into_change_set(self) -> CaseChangeSet {
        let mut created_plan_item_instances = Vec::with_capacity(self.created.len());
        let mut updated_plan_item_instances = Vec::with_capacity(self.updated.len());
        let created: HashSet<&String> = self.created.iter().collect();

        for pii in &self.plan_items {
            if created.contains(&pii.id) {
                created_plan_item_instances.push(pii.clone());
            } else if self.updated.contains(&pii.id) {
                updated_plan_item_instances.push(pii.clone());
            }
        }

        let updated_tasks = self
            .tasks
            .iter()
            .filter(|t| self.updated_tasks.contains(&t.id))
            .cloned()
            .collect();

        CaseChangeSet {
            case_instance: self.case_instance,
            is_new_case: self.is_new_case,
            created_plan_item_instances,
            updated_plan_item_instances,
            updated_tasks,
            agenda: self.agenda.into_operations(),
            committed_at: self.now,
        }
    }
}
