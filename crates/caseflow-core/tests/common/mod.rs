// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for caseflow-core integration tests.
//!
//! Provides TestContext with an in-memory database, a service on a fixed
//! clock, and helpers to seed case instances in an exact runtime shape.

#![allow(dead_code)]

use std::sync::Arc;

use caseflow_core::migrations;
use caseflow_core::persistence::{
    CaseInstanceRecord, Persistence, PlanItemInstanceRecord, TaskRecord,
};
use caseflow_core::{
    CaseRuntimeService, FixedClock, PlanItemInstanceState, SqlitePersistence,
};
use caseflow_model::{CaseDefinition, CaseModel};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// Test context that owns the database and the service under test.
pub struct TestContext {
    pub persistence: Arc<SqlitePersistence>,
    pub service: CaseRuntimeService,
    pub clock: Arc<FixedClock>,
}

impl TestContext {
    pub async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let persistence = Arc::new(SqlitePersistence::new(pool));
        let clock = Arc::new(FixedClock::new(ts()));
        let service = CaseRuntimeService::with_clock(persistence.clone(), clock.clone());

        Self {
            persistence,
            service,
            clock,
        }
    }

    /// Deploy a case definition given as JSON.
    pub async fn deploy(&self, definition: Value) -> Arc<CaseModel> {
        let definition: CaseDefinition =
            caseflow_model::parse_case_definition(&definition).expect("valid definition");
        self.service
            .deploy_case_definition(&definition)
            .await
            .expect("deploy")
    }

    /// Insert a case instance with a running plan model instance.
    pub async fn seed_case(&self, model: &CaseModel) -> CaseFixture {
        let case_instance_id = Uuid::new_v4().to_string();
        let root_id = format!("{}-root", case_instance_id);

        self.persistence
            .insert_case_instance(&CaseInstanceRecord {
                id: case_instance_id.clone(),
                case_definition_id: model.definition_id().to_string(),
                tenant_id: String::new(),
                name: None,
                state: "active".to_string(),
                variables: Map::new(),
                callback_id: None,
                callback_type: None,
                plan_model_instance_id: root_id.clone(),
                start_time: ts(),
                revision: 1,
            })
            .await
            .expect("insert case");

        let fixture = CaseFixture {
            case_instance_id,
            root_id,
            case_definition_id: model.definition_id().to_string(),
        };
        let root = model.plan_model();
        self.persistence
            .insert_plan_item_instance(&fixture.record(
                &fixture.root_id,
                root,
                None,
                PlanItemInstanceState::Active,
            ))
            .await
            .expect("insert root");
        fixture
    }

    /// Insert a plan item instance of `element_id` under `parent`.
    pub async fn seed_plan_item(
        &self,
        fixture: &CaseFixture,
        model: &CaseModel,
        element_id: &str,
        parent: &str,
        state: PlanItemInstanceState,
    ) -> String {
        let node = model.plan_item(element_id).expect("plan item in model");
        let id = format!("{}-{}", element_id, Uuid::new_v4());
        self.persistence
            .insert_plan_item_instance(&fixture.record(&id, node, Some(parent), state))
            .await
            .expect("insert plan item");
        id
    }

    /// Insert a task record backing a human task instance.
    pub async fn seed_task(
        &self,
        fixture: &CaseFixture,
        plan_item_instance_id: &str,
        assignee: Option<&str>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.persistence
            .insert_task(&TaskRecord {
                id: id.clone(),
                case_instance_id: fixture.case_instance_id.clone(),
                plan_item_instance_id: plan_item_instance_id.to_string(),
                name: None,
                assignee: assignee.map(str::to_string),
                create_time: ts(),
                delete_reason: None,
                delete_time: None,
            })
            .await
            .expect("insert task");
        id
    }

    pub async fn plan_items(&self, case_instance_id: &str) -> Vec<PlanItemInstanceRecord> {
        self.persistence
            .list_plan_item_instances(case_instance_id)
            .await
            .expect("list plan items")
    }

    pub async fn plan_item(&self, id: &str) -> PlanItemInstanceRecord {
        self.persistence
            .get_plan_item_instance(id)
            .await
            .expect("get plan item")
            .expect("plan item exists")
    }

    pub async fn tasks(&self, case_instance_id: &str) -> Vec<TaskRecord> {
        self.persistence
            .list_tasks(case_instance_id)
            .await
            .expect("list tasks")
    }
}

/// Ids of a seeded case instance.
pub struct CaseFixture {
    pub case_instance_id: String,
    pub root_id: String,
    pub case_definition_id: String,
}

impl CaseFixture {
    fn record(
        &self,
        id: &str,
        node: &caseflow_model::PlanItemNode,
        parent: Option<&str>,
        state: PlanItemInstanceState,
    ) -> PlanItemInstanceRecord {
        let started = matches!(
            state,
            PlanItemInstanceState::Active
                | PlanItemInstanceState::Suspended
                | PlanItemInstanceState::Failed
        );
        PlanItemInstanceRecord {
            id: id.to_string(),
            case_definition_id: self.case_definition_id.clone(),
            case_instance_id: self.case_instance_id.clone(),
            tenant_id: String::new(),
            element_id: node.id.clone(),
            plan_item_definition_id: node.definition_id().to_string(),
            plan_item_definition_type: node.kind(),
            name: node.display_name().map(str::to_string),
            state,
            stage_instance_id: parent.map(str::to_string),
            is_stage: node.is_stage(),
            create_time: ts(),
            last_available_time: Some(ts()),
            start_time: started.then(ts),
            ended_time: None,
            terminated_time: None,
            revision: 1,
        }
    }
}

/// Live instances of `element_id`.
pub fn live<'a>(
    plan_items: &'a [PlanItemInstanceRecord],
    element_id: &str,
) -> Vec<&'a PlanItemInstanceRecord> {
    plan_items
        .iter()
        .filter(|pii| pii.element_id == element_id && pii.is_live())
        .collect()
}
