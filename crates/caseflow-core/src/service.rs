// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Case runtime service.
//!
//! [`CaseRuntimeService`] is the entry point for embedders: it deploys case
//! definitions, starts case instances and applies change-state requests, each
//! as one load, mutate and commit cycle over a [`Persistence`] backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use caseflow_core::{CaseRuntimeService, ChangePlanItemStateBuilder};
//! use caseflow_core::persistence::SqlitePersistence;
//!
//! let persistence = Arc::new(SqlitePersistence::from_path(".data/caseflow.db").await?);
//! let service = CaseRuntimeService::new(persistence);
//!
//! let request = ChangePlanItemStateBuilder::new()
//!     .case_instance_id(&case_id)
//!     .move_plan_item_definition_id_to("review", "approve")
//!     .build()?;
//! let outcome = service.change_state(&request).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use caseflow_model::{CaseDefinition, CaseModel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::change_state::executor::execute_change_state;
use crate::change_state::{ChangePlanItemStateRequest, ChangeStateOutcome};
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};
use crate::persistence::{
    AgendaOperationRecord, CASE_STATE_ACTIVE, CaseInstanceRecord, Persistence,
    PlanItemInstanceRecord, TaskRecord,
};
use crate::state::PlanItemTransition;
use crate::unit_of_work::CaseUnitOfWork;

/// Request to start a new case instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCaseInstanceRequest {
    pub case_definition_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Owner of the case when started from a process or parent case.
    #[serde(default)]
    pub callback_id: Option<String>,
    #[serde(default)]
    pub callback_type: Option<String>,
}

/// Case runtime facade over a persistence backend.
pub struct CaseRuntimeService {
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    models: RwLock<HashMap<String, Arc<CaseModel>>>,
}

impl std::fmt::Debug for CaseRuntimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseRuntimeService")
            .field("persistence", &"...")
            .finish()
    }
}

impl CaseRuntimeService {
    /// Create a service using the wall clock.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_clock(persistence, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock.
    pub fn with_clock(persistence: Arc<dyn Persistence>, clock: Arc<dyn Clock>) -> Self {
        Self {
            persistence,
            clock,
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Validate and store a case definition.
    ///
    /// Redeploying an id replaces the stored definition and the cached model.
    #[instrument(skip(self, definition), fields(case_definition_id = %definition.id))]
    pub async fn deploy_case_definition(
        &self,
        definition: &CaseDefinition,
    ) -> Result<Arc<CaseModel>> {
        let model = Arc::new(CaseModel::new(definition)?);
        self.persistence.save_case_definition(definition).await?;
        self.models
            .write()
            .await
            .insert(definition.id.clone(), model.clone());

        info!(plan_items = model.len(), "Case definition deployed");
        Ok(model)
    }

    /// Indexed model of a deployed definition, cached after the first load.
    pub async fn case_model(&self, case_definition_id: &str) -> Result<Arc<CaseModel>> {
        if let Some(model) = self.models.read().await.get(case_definition_id) {
            return Ok(model.clone());
        }

        let definition = self
            .persistence
            .get_case_definition(case_definition_id)
            .await?
            .ok_or_else(|| CoreError::CaseDefinitionNotFound {
                case_definition_id: case_definition_id.to_string(),
            })?;
        let model = Arc::new(CaseModel::new(&definition)?);
        debug!(case_definition_id, "Case model loaded");

        self.models
            .write()
            .await
            .insert(case_definition_id.to_string(), model.clone());
        Ok(model)
    }

    /// Start a case: an active plan model instance with its top-level plan
    /// items created in `AVAILABLE` state.
    #[instrument(skip(self, request), fields(case_definition_id = %request.case_definition_id))]
    pub async fn start_case_instance(
        &self,
        request: &StartCaseInstanceRequest,
    ) -> Result<CaseInstanceRecord> {
        let model = self.case_model(&request.case_definition_id).await?;
        let now = self.clock.now();

        let case_instance = CaseInstanceRecord {
            id: Uuid::new_v4().to_string(),
            case_definition_id: request.case_definition_id.clone(),
            tenant_id: model.tenant_id().unwrap_or_default().to_string(),
            name: request.name.clone(),
            state: CASE_STATE_ACTIVE.to_string(),
            variables: request.variables.clone(),
            callback_id: request.callback_id.clone(),
            callback_type: request.callback_type.clone(),
            plan_model_instance_id: String::new(),
            start_time: now,
            revision: 1,
        };

        let mut uow = CaseUnitOfWork::for_new_case(case_instance, now);
        let plan_model = model.plan_model();
        let root = uow.create_child_plan_item_instance(plan_model, None, false)?;
        uow.transition(&root, PlanItemTransition::Start)?;
        uow.set_plan_model_instance_id(&root);

        for child in model.children(&plan_model.id) {
            let id = uow.create_child_plan_item_instance(child, Some(&root), true)?;
            uow.agenda_mut().plan_create_plan_item_instance(&id);
        }
        let case_instance_id = uow.case_instance_id().to_string();
        uow.agenda_mut().plan_evaluate_criteria(&case_instance_id);

        let changes = uow.into_change_set();
        self.persistence.commit_case_changes(&changes).await?;

        info!(
            case_instance_id = %changes.case_instance.id,
            plan_items = changes.created_plan_item_instances.len(),
            "Case instance started"
        );
        Ok(changes.case_instance)
    }

    /// Apply a change-state request atomically.
    ///
    /// Either every phase succeeds and the whole change is committed, or the
    /// stored case is left untouched and the error is returned.
    #[instrument(skip(self, request), fields(case_instance_id = %request.case_instance_id))]
    pub async fn change_state(
        &self,
        request: &ChangePlanItemStateRequest,
    ) -> Result<ChangeStateOutcome> {
        request.validate()?;

        let snapshot = self
            .persistence
            .load_case_snapshot(&request.case_instance_id)
            .await?
            .ok_or_else(|| CoreError::CaseInstanceNotFound {
                case_instance_id: request.case_instance_id.clone(),
            })?;
        let model = self
            .case_model(&snapshot.case_instance.case_definition_id)
            .await?;

        let mut uow = CaseUnitOfWork::new(snapshot, self.clock.now());
        execute_change_state(request, &model, &mut uow)?;

        let outcome = ChangeStateOutcome {
            case_instance_id: request.case_instance_id.clone(),
            created_plan_item_instance_ids: uow.created_ids().to_vec(),
            terminated_plan_item_instance_ids: uow.terminated_ids().to_vec(),
            changed_task_ids: uow.updated_task_ids().to_vec(),
            agenda: uow.agenda().operations().to_vec(),
        };

        let changes = uow.into_change_set();
        self.persistence.commit_case_changes(&changes).await?;

        info!(
            created = outcome.created_plan_item_instance_ids.len(),
            terminated = outcome.terminated_plan_item_instance_ids.len(),
            agenda = outcome.agenda.len(),
            "Case state changed"
        );
        Ok(outcome)
    }

    pub async fn get_case_instance(&self, case_instance_id: &str) -> Result<CaseInstanceRecord> {
        self.persistence
            .get_case_instance(case_instance_id)
            .await?
            .ok_or_else(|| CoreError::CaseInstanceNotFound {
                case_instance_id: case_instance_id.to_string(),
            })
    }

    /// All plan item instances of a case, in creation order.
    pub async fn get_plan_item_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>> {
        self.get_case_instance(case_instance_id).await?;
        self.persistence
            .list_plan_item_instances(case_instance_id)
            .await
    }

    pub async fn get_tasks(&self, case_instance_id: &str) -> Result<Vec<TaskRecord>> {
        self.get_case_instance(case_instance_id).await?;
        self.persistence.list_tasks(case_instance_id).await
    }

    pub async fn get_plan_item_instance(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<PlanItemInstanceRecord> {
        self.persistence
            .get_plan_item_instance(plan_item_instance_id)
            .await?
            .ok_or_else(|| CoreError::PlanItemInstanceNotFound {
                plan_item_instance_id: plan_item_instance_id.to_string(),
            })
    }

    /// Task records of one plan item instance, deleted ones included.
    pub async fn get_tasks_for_plan_item_instance(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<Vec<TaskRecord>> {
        self.get_plan_item_instance(plan_item_instance_id).await?;
        self.persistence
            .list_tasks_for_plan_item_instance(plan_item_instance_id)
            .await
    }

    /// Committed agenda operations of a case, oldest first.
    pub async fn get_agenda_operations(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<AgendaOperationRecord>> {
        self.get_case_instance(case_instance_id).await?;
        self.persistence
            .list_agenda_operations(case_instance_id)
            .await
    }
}
