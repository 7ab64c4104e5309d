// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for caseflow-core.
//!
//! This module defines the runtime records, the persistence abstraction and
//! the backend implementations. The engine never writes through the trait
//! piecemeal while changing a case: it loads one [`CaseSnapshot`], mutates it
//! in memory and hands back a single [`CaseChangeSet`] that the backend applies
//! in one transaction.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use caseflow_model::{CaseDefinition, PlanItemKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agenda::AgendaOperation;
use crate::error::CoreError;
use crate::state::{self, PlanItemInstanceState, PlanItemTransition};

/// Case instance state while the case is running.
pub const CASE_STATE_ACTIVE: &str = "active";

/// Case instance record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInstanceRecord {
    /// Unique identifier for the case instance.
    pub id: String,
    /// Case definition the instance runs.
    pub case_definition_id: String,
    /// Tenant identifier, empty when not multi-tenant.
    pub tenant_id: String,
    /// Optional business name.
    pub name: Option<String>,
    /// Case state (active, completed, terminated).
    pub state: String,
    /// Case-scoped variables.
    pub variables: Map<String, Value>,
    /// Id of the owning process or case element, if started as a child.
    pub callback_id: Option<String>,
    /// Kind of owner referenced by `callback_id`.
    pub callback_type: Option<String>,
    /// Root plan item instance of the plan model.
    pub plan_model_instance_id: String,
    /// When the case was started.
    pub start_time: DateTime<Utc>,
    /// Optimistic locking revision.
    pub revision: i64,
}

/// Plan item instance record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItemInstanceRecord {
    /// Unique identifier for the plan item instance.
    pub id: String,
    pub case_definition_id: String,
    pub case_instance_id: String,
    pub tenant_id: String,
    /// Design-time plan item id.
    pub element_id: String,
    pub plan_item_definition_id: String,
    /// Kind of the plan item definition.
    pub plan_item_definition_type: PlanItemKind,
    pub name: Option<String>,
    pub state: PlanItemInstanceState,
    /// Containing stage instance. `None` only for the plan model instance.
    pub stage_instance_id: Option<String>,
    pub is_stage: bool,
    pub create_time: DateTime<Utc>,
    pub last_available_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub ended_time: Option<DateTime<Utc>>,
    pub terminated_time: Option<DateTime<Utc>>,
    /// Optimistic locking revision.
    pub revision: i64,
}

impl PlanItemInstanceRecord {
    /// Whether the instance has not ended yet.
    pub fn is_live(&self) -> bool {
        self.ended_time.is_none()
    }

    pub fn is_human_task(&self) -> bool {
        self.plan_item_definition_type.is_human_task()
    }

    /// Whether a human task in this state owns a task record.
    ///
    /// Task records are created when the task starts and live as long as the
    /// work is in progress.
    pub fn owns_task_record(&self) -> bool {
        self.is_human_task()
            && matches!(
                self.state,
                PlanItemInstanceState::Active
                    | PlanItemInstanceState::Suspended
                    | PlanItemInstanceState::Failed
            )
    }

    /// Apply a lifecycle transition, validated against the transition table.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IllegalTransition`] when the table forbids the transition
    /// - [`CoreError::UnknownPlanItemState`] when the current state has no row
    pub fn apply_transition(
        &mut self,
        transition: PlanItemTransition,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if !state::is_possible(Some(self.state), transition)? {
            return Err(CoreError::IllegalTransition {
                plan_item_instance_id: self.id.clone(),
                state: self.state.to_string(),
                transition: transition.to_string(),
            });
        }
        self.set_state(transition.target_state(), now);
        Ok(())
    }

    fn set_state(&mut self, target: PlanItemInstanceState, now: DateTime<Utc>) {
        self.state = target;
        match target {
            PlanItemInstanceState::Available => self.last_available_time = Some(now),
            PlanItemInstanceState::Active if self.start_time.is_none() => {
                self.start_time = Some(now)
            }
            PlanItemInstanceState::Terminated => {
                self.ended_time = Some(now);
                self.terminated_time = Some(now);
            }
            PlanItemInstanceState::Completed => self.ended_time = Some(now),
            _ => {}
        }
    }

    /// Administrative termination, bypassing the lifecycle table.
    ///
    /// Returns false when the instance had already ended.
    pub fn force_terminate(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_live() {
            return false;
        }
        self.set_state(PlanItemInstanceState::Terminated, now);
        true
    }
}

/// Task record owned by a human task plan item instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub case_instance_id: String,
    /// Owning plan item instance.
    pub plan_item_instance_id: String,
    pub name: Option<String>,
    pub assignee: Option<String>,
    pub create_time: DateTime<Utc>,
    /// Why the task was deleted, if it was.
    pub delete_reason: Option<String>,
    pub delete_time: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn is_deleted(&self) -> bool {
        self.delete_time.is_some()
    }
}

/// Agenda operation persisted in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct AgendaOperationRecord {
    /// Monotonic sequence number, defines execution order.
    pub sequence: i64,
    pub case_instance_id: String,
    pub operation: AgendaOperation,
    pub created_at: DateTime<Utc>,
}

/// Everything the engine needs to change one case instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSnapshot {
    pub case_instance: CaseInstanceRecord,
    pub plan_item_instances: Vec<PlanItemInstanceRecord>,
    pub tasks: Vec<TaskRecord>,
}

/// All writes produced by one unit of work, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseChangeSet {
    /// Case instance as it should be stored; `revision` is the one loaded.
    pub case_instance: CaseInstanceRecord,
    /// Insert the case instance instead of updating it.
    pub is_new_case: bool,
    pub created_plan_item_instances: Vec<PlanItemInstanceRecord>,
    /// Updated instances; each `revision` is the one loaded.
    pub updated_plan_item_instances: Vec<PlanItemInstanceRecord>,
    pub updated_tasks: Vec<TaskRecord>,
    pub agenda: Vec<AgendaOperation>,
    /// Commit timestamp for the agenda rows.
    pub committed_at: DateTime<Utc>,
}

/// Persistence interface used by the engine.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Store a deployed case definition.
    async fn save_case_definition(&self, definition: &CaseDefinition) -> Result<(), CoreError>;

    async fn get_case_definition(
        &self,
        case_definition_id: &str,
    ) -> Result<Option<CaseDefinition>, CoreError>;

    async fn insert_case_instance(&self, case_instance: &CaseInstanceRecord)
    -> Result<(), CoreError>;

    async fn get_case_instance(
        &self,
        case_instance_id: &str,
    ) -> Result<Option<CaseInstanceRecord>, CoreError>;

    async fn insert_plan_item_instance(
        &self,
        plan_item_instance: &PlanItemInstanceRecord,
    ) -> Result<(), CoreError>;

    async fn get_plan_item_instance(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<Option<PlanItemInstanceRecord>, CoreError>;

    /// All plan item instances of a case, in creation order.
    async fn list_plan_item_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, CoreError>;

    async fn insert_task(&self, task: &TaskRecord) -> Result<(), CoreError>;

    /// All task records of a case, deleted ones included.
    async fn list_tasks(&self, case_instance_id: &str) -> Result<Vec<TaskRecord>, CoreError>;

    async fn list_tasks_for_plan_item_instance(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<Vec<TaskRecord>, CoreError>;

    /// Agenda operations of a case, in sequence order.
    async fn list_agenda_operations(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<AgendaOperationRecord>, CoreError>;

    /// Apply a change set in one transaction.
    ///
    /// Fails with [`CoreError::ConcurrentModification`] when the case instance
    /// or any updated plan item instance no longer has the loaded revision; in
    /// that case nothing is written.
    async fn commit_case_changes(&self, changes: &CaseChangeSet) -> Result<(), CoreError>;

    async fn health_check_db(&self) -> Result<bool, CoreError>;

    /// Load a case instance with all its plan item instances and tasks.
    ///
    /// Default implementation composes the single-table reads.
    async fn load_case_snapshot(
        &self,
        case_instance_id: &str,
    ) -> Result<Option<CaseSnapshot>, CoreError> {
        let Some(case_instance) = self.get_case_instance(case_instance_id).await? else {
            return Ok(None);
        };
        let plan_item_instances = self.list_plan_item_instances(case_instance_id).await?;
        let tasks = self.list_tasks(case_instance_id).await?;
        Ok(Some(CaseSnapshot {
            case_instance,
            plan_item_instances,
            tasks,
        }))
    }
}
