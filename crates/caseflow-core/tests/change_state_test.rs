// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Change-state integration tests against an in-memory SQLite database.

mod common;

use caseflow_core::change_state::executor::execute_change_state;
use caseflow_core::persistence::Persistence;
use caseflow_core::unit_of_work::{CHANGE_STATE_DELETE_REASON, CaseUnitOfWork};
use caseflow_core::{
    AgendaOperation, ChangePlanItemStateBuilder, CoreError, PlanItemInstanceState,
    StartCaseInstanceRequest,
};
use caseflow_model::CaseModel;
use serde_json::{Value, json};
use std::sync::Arc;

use common::{CaseFixture, TestContext, live, ts};

use PlanItemInstanceState as S;

fn claims_definition() -> Value {
    json!({
        "id": "claims:1",
        "key": "claims",
        "name": "Insurance claim",
        "planModel": {
            "id": "pm",
            "planItems": [
                { "id": "piIntake", "definition": { "type": "humanTask", "id": "intake" } },
                { "id": "piS1", "definition": { "type": "stage", "id": "s1", "planItems": [
                    { "id": "piT1", "definition": { "type": "humanTask", "id": "t1" } },
                    { "id": "piS2", "definition": { "type": "stage", "id": "s2", "planItems": [
                        { "id": "piT2", "definition": { "type": "humanTask", "id": "t2" } },
                        { "id": "piD3", "definition": { "type": "humanTask", "id": "d3" } }
                    ] } }
                ] } },
                { "id": "piReview", "definition": { "type": "stage", "id": "review", "planItems": [
                    { "id": "piInner", "definition": { "type": "stage", "id": "inner", "planItems": [
                        { "id": "piCheck", "definition": { "type": "humanTask", "id": "check" } }
                    ] } }
                ] } },
                { "id": "piDocs", "definition": { "type": "stage", "id": "docs", "planItems": [
                    { "id": "piCollect", "definition": { "type": "humanTask", "id": "collect" } },
                    { "id": "piVerify", "definition": { "type": "humanTask", "id": "verify" } },
                    { "id": "piArchive", "definition": { "type": "serviceTask", "id": "archive" } }
                ] } },
                { "id": "piPayout", "definition": {
                    "type": "processTask", "id": "payout", "processRef": "payoutProcess"
                } },
                { "id": "piAppeal", "definition": {
                    "type": "caseTask", "id": "appeal", "caseRef": "appealCase"
                } }
            ]
        }
    })
}

/// Case with stage S1 running and human task T1 active inside it.
async fn case_with_active_t1(ctx: &TestContext, model: &CaseModel) -> (CaseFixture, String, String, String) {
    let fixture = ctx.seed_case(model).await;
    let s1 = ctx
        .seed_plan_item(&fixture, model, "piS1", &fixture.root_id, S::Active)
        .await;
    let t1 = ctx.seed_plan_item(&fixture, model, "piT1", &s1, S::Active).await;
    let task = ctx.seed_task(&fixture, &t1, Some("alice")).await;
    (fixture, s1, t1, task)
}

fn kinds(agenda: &[AgendaOperation]) -> Vec<&'static str> {
    agenda.iter().map(|op| op.kind()).collect()
}

fn start_op<'a>(agenda: &'a [AgendaOperation], id: &str) -> Option<&'a AgendaOperation> {
    agenda.iter().find(|op| {
        matches!(op, AgendaOperation::StartPlanItemInstance { plan_item_instance_id, .. } if plan_item_instance_id == id)
    })
}

#[tokio::test]
async fn test_move_into_new_nested_stage() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, s1, t1, task) = case_with_active_t1(&ctx, &model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&t1, "t2")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;

    let t1_after = ctx.plan_item(&t1).await;
    assert_eq!(t1_after.state, S::Terminated);
    assert_eq!(t1_after.terminated_time, Some(ts()));
    assert_eq!(outcome.terminated_plan_item_instance_ids, vec![t1.clone()]);

    let tasks = ctx.tasks(&fixture.case_instance_id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task);
    assert_eq!(tasks[0].delete_reason.as_deref(), Some(CHANGE_STATE_DELETE_REASON));
    assert_eq!(outcome.changed_task_ids, vec![task]);

    // S1 stays running and receives the new S2
    assert_eq!(ctx.plan_item(&s1).await.state, S::Active);
    let s2 = live(&plan_items, "piS2");
    assert_eq!(s2.len(), 1);
    assert_eq!(s2[0].stage_instance_id.as_deref(), Some(s1.as_str()));

    let t2 = live(&plan_items, "piT2");
    let d3 = live(&plan_items, "piD3");
    assert_eq!(t2.len(), 1);
    assert_eq!(d3.len(), 1);
    assert_eq!(t2[0].stage_instance_id.as_deref(), Some(s2[0].id.as_str()));
    assert_eq!(d3[0].stage_instance_id.as_deref(), Some(s2[0].id.as_str()));
    assert_eq!(d3[0].state, S::Available);
    assert_eq!(
        outcome.created_plan_item_instance_ids,
        vec![s2[0].id.clone(), t2[0].id.clone(), d3[0].id.clone()]
    );

    assert_eq!(
        kinds(&outcome.agenda),
        vec![
            "start_plan_item_instance",
            "create_plan_item_instance",
            "start_plan_item_instance",
            "evaluate_criteria"
        ]
    );
    assert!(start_op(&outcome.agenda, &s2[0].id).is_some());
    assert!(start_op(&outcome.agenda, &t2[0].id).is_some());
    assert_eq!(
        outcome.agenda.last(),
        Some(&AgendaOperation::EvaluateCriteria {
            case_instance_id: fixture.case_instance_id.clone()
        })
    );

    // the outbox holds the same operations
    let stored = ctx
        .service
        .get_agenda_operations(&fixture.case_instance_id)
        .await
        .unwrap();
    let stored: Vec<AgendaOperation> = stored.into_iter().map(|r| r.operation).collect();
    assert_eq!(stored, outcome.agenda);

    let case_instance = ctx
        .service
        .get_case_instance(&fixture.case_instance_id)
        .await
        .unwrap();
    assert_eq!(case_instance.revision, 2);
}

#[tokio::test]
async fn test_available_target_is_reused() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, s1, t1, _) = case_with_active_t1(&ctx, &model).await;
    let intake = ctx
        .seed_plan_item(&fixture, &model, "piIntake", &fixture.root_id, S::Available)
        .await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&t1, "intake")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    assert!(outcome.created_plan_item_instance_ids.is_empty());
    assert!(start_op(&outcome.agenda, &intake).is_some());
    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    assert_eq!(live(&plan_items, "piIntake").len(), 1);

    // S1 encloses no target once T1 leaves
    assert_eq!(ctx.plan_item(&s1).await.state, S::Terminated);
}

#[tokio::test]
async fn test_outermost_orphan_stage_terminated_once() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;
    let review = ctx
        .seed_plan_item(&fixture, &model, "piReview", &fixture.root_id, S::Active)
        .await;
    let inner = ctx
        .seed_plan_item(&fixture, &model, "piInner", &review, S::Active)
        .await;
    let check = ctx
        .seed_plan_item(&fixture, &model, "piCheck", &inner, S::Active)
        .await;
    ctx.seed_task(&fixture, &check, None).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&check, "intake")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    let terminated = &outcome.terminated_plan_item_instance_ids;
    assert_eq!(terminated.iter().filter(|id| **id == review).count(), 1);
    assert!(!terminated.contains(&inner));
    assert!(terminated.contains(&check));
    assert_eq!(ctx.plan_item(&review).await.state, S::Terminated);
    assert_eq!(ctx.plan_item(&inner).await.state, S::Active);

    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    let intake = live(&plan_items, "piIntake");
    assert_eq!(intake.len(), 1);
    assert_eq!(intake[0].stage_instance_id.as_deref(), Some(fixture.root_id.as_str()));
    assert!(start_op(&outcome.agenda, &intake[0].id).is_some());
}

fn nested_definition() -> Value {
    json!({
        "id": "nested:1",
        "key": "nested",
        "planModel": {
            "id": "pm",
            "planItems": [
                { "id": "piOuter", "definition": { "type": "stage", "id": "outer", "planItems": [
                    { "id": "piInner", "definition": { "type": "stage", "id": "inner", "planItems": [
                        { "id": "piA", "definition": { "type": "humanTask", "id": "a" } },
                        { "id": "piB", "definition": { "type": "humanTask", "id": "b" } }
                    ] } }
                ] } },
                { "id": "piTop", "definition": { "type": "humanTask", "id": "top" } }
            ]
        }
    })
}

#[tokio::test]
async fn test_stages_under_terminated_ancestor_are_not_reused() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(nested_definition()).await;
    let fixture = ctx.seed_case(&model).await;
    let outer = ctx
        .seed_plan_item(&fixture, &model, "piOuter", &fixture.root_id, S::Active)
        .await;
    let inner = ctx
        .seed_plan_item(&fixture, &model, "piInner", &outer, S::Active)
        .await;
    let a = ctx.seed_plan_item(&fixture, &model, "piA", &inner, S::Active).await;
    ctx.seed_task(&fixture, &a, None).await;
    let b = ctx
        .seed_plan_item(&fixture, &model, "piB", &inner, S::Available)
        .await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&a, "top")
        .activate_plan_item_definition_id("b")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    // only the outer stage is collapsed, the inner one keeps its own state
    assert_eq!(ctx.plan_item(&outer).await.state, S::Terminated);
    assert_eq!(ctx.plan_item(&inner).await.state, S::Active);

    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    let new_outer = live(&plan_items, "piOuter");
    assert_eq!(new_outer.len(), 1);
    assert_ne!(new_outer[0].id, outer);
    assert_eq!(new_outer[0].stage_instance_id.as_deref(), Some(fixture.root_id.as_str()));

    let new_inner: Vec<_> = live(&plan_items, "piInner")
        .into_iter()
        .filter(|pii| pii.stage_instance_id.as_deref() == Some(new_outer[0].id.as_str()))
        .collect();
    assert_eq!(new_inner.len(), 1);
    assert_ne!(new_inner[0].id, inner);

    let new_b: Vec<_> = live(&plan_items, "piB")
        .into_iter()
        .filter(|pii| pii.id != b)
        .collect();
    assert_eq!(new_b.len(), 1);
    assert_eq!(new_b[0].stage_instance_id.as_deref(), Some(new_inner[0].id.as_str()));

    assert!(start_op(&outcome.agenda, &new_outer[0].id).is_some());
    assert!(start_op(&outcome.agenda, &new_inner[0].id).is_some());
    assert!(start_op(&outcome.agenda, &new_b[0].id).is_some());
    assert!(start_op(&outcome.agenda, &b).is_none());
    assert!(start_op(&outcome.agenda, &inner).is_none());
    assert_eq!(ctx.plan_item(&b).await.state, S::Available);
}

#[tokio::test]
async fn test_failure_after_mutations_leaves_case_unchanged() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, _, t1, _) = case_with_active_t1(&ctx, &model).await;
    let plan_items_before = ctx.plan_items(&fixture.case_instance_id).await;
    let tasks_before = ctx.tasks(&fixture.case_instance_id).await;

    // phases 1 and 2 succeed, the flip to available finds nothing
    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&t1, "t2")
        .change_to_available_state_by_plan_item_definition_id("intake")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert!(matches!(err, CoreError::NoActivePlanItemInstance { .. }));

    assert_eq!(ctx.plan_items(&fixture.case_instance_id).await, plan_items_before);
    assert_eq!(ctx.tasks(&fixture.case_instance_id).await, tasks_before);
    assert!(ctx
        .service
        .get_agenda_operations(&fixture.case_instance_id)
        .await
        .unwrap()
        .is_empty());
    let case_instance = ctx
        .service
        .get_case_instance(&fixture.case_instance_id)
        .await
        .unwrap();
    assert_eq!(case_instance.revision, 1);
}

#[tokio::test]
async fn test_unknown_target_leaves_case_unchanged() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, _, t1, _) = case_with_active_t1(&ctx, &model).await;
    let plan_items_before = ctx.plan_items(&fixture.case_instance_id).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&t1, "missing")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();

    assert!(matches!(err, CoreError::PlanItemNotFound { ref plan_item_id, .. } if plan_item_id == "missing"));
    assert!(err.is_not_found());
    assert_eq!(ctx.plan_items(&fixture.case_instance_id).await, plan_items_before);
    assert_eq!(ctx.plan_item(&t1).await.state, S::Active);
}

#[tokio::test]
async fn test_change_to_available_requires_exactly_one_instance() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;
    ctx.seed_plan_item(&fixture, &model, "piIntake", &fixture.root_id, S::Active)
        .await;
    ctx.seed_plan_item(&fixture, &model, "piIntake", &fixture.root_id, S::Active)
        .await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .change_to_available_state_by_plan_item_definition_id("intake")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert_eq!(
        err,
        CoreError::AmbiguousState {
            plan_item_definition_id: "intake".to_string(),
            count: 2,
        }
    );

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .change_to_available_state_by_plan_item_definition_id("payout")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "NO_ACTIVE_PLAN_ITEM_INSTANCE");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_change_to_available_deletes_task() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;
    let intake = ctx
        .seed_plan_item(&fixture, &model, "piIntake", &fixture.root_id, S::Active)
        .await;
    let task = ctx.seed_task(&fixture, &intake, Some("alice")).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .change_to_available_state_by_plan_item_definition_id("intake")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    assert_eq!(
        outcome.agenda,
        vec![AgendaOperation::ChangePlanItemInstanceToAvailable {
            plan_item_instance_id: intake.clone()
        }]
    );
    assert_eq!(outcome.changed_task_ids, vec![task]);
    assert!(ctx.tasks(&fixture.case_instance_id).await[0].is_deleted());
    // the lifecycle executor performs the transition itself
    assert_eq!(ctx.plan_item(&intake).await.state, S::Active);
}

#[tokio::test]
async fn test_activate_materializes_siblings() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;
    let docs = ctx
        .seed_plan_item(&fixture, &model, "piDocs", &fixture.root_id, S::Active)
        .await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .activate_plan_item_definition_id("collect")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    assert_eq!(outcome.created_plan_item_instance_ids.len(), 3);
    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    for element_id in ["piCollect", "piVerify", "piArchive"] {
        let found = live(&plan_items, element_id);
        assert_eq!(found.len(), 1, "{element_id}");
        assert_eq!(found[0].state, S::Available);
        assert_eq!(found[0].stage_instance_id.as_deref(), Some(docs.as_str()));
    }

    let collect = &live(&plan_items, "piCollect")[0].id;
    assert!(start_op(&outcome.agenda, collect).is_some());
    let starts = outcome
        .agenda
        .iter()
        .filter(|op| op.kind() == "start_plan_item_instance")
        .count();
    assert_eq!(starts, 1);
    assert_eq!(
        kinds(&outcome.agenda)
            .iter()
            .filter(|k| **k == "create_plan_item_instance")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_activate_creates_missing_stage() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .activate_plan_item_definition_ids(["collect", "verify"])
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    let docs = live(&plan_items, "piDocs");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].stage_instance_id.as_deref(), Some(fixture.root_id.as_str()));
    assert!(start_op(&outcome.agenda, &docs[0].id).is_some());

    let collect = live(&plan_items, "piCollect");
    let verify = live(&plan_items, "piVerify");
    assert_eq!(collect[0].stage_instance_id.as_deref(), Some(docs[0].id.as_str()));
    assert_eq!(verify[0].stage_instance_id.as_deref(), Some(docs[0].id.as_str()));
    assert!(start_op(&outcome.agenda, &collect[0].id).is_some());
    assert!(start_op(&outcome.agenda, &verify[0].id).is_some());
    assert_eq!(live(&plan_items, "piArchive").len(), 1);
}

#[tokio::test]
async fn test_terminate_stage_with_descendants() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, s1, t1, task) = case_with_active_t1(&ctx, &model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .terminate_plan_item_definition_id("s1")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    assert_eq!(outcome.terminated_plan_item_instance_ids, vec![s1.clone(), t1.clone()]);
    assert_eq!(ctx.plan_item(&s1).await.state, S::Terminated);
    assert_eq!(ctx.plan_item(&t1).await.state, S::Terminated);
    assert_eq!(outcome.changed_task_ids, vec![task]);
    assert_eq!(kinds(&outcome.agenda), vec!["evaluate_criteria"]);
    assert_eq!(ctx.plan_item(&fixture.root_id).await.state, S::Active);
}

#[tokio::test]
async fn test_terminate_rejects_missing_and_plan_model() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .terminate_plan_item_definition_id("t2")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert!(matches!(err, CoreError::NoLivePlanItemInstances { .. }));

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .terminate_plan_item_definition_id("pm")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "ILLEGAL_BUILDER_USAGE");
}

#[tokio::test]
async fn test_child_variables_only_reach_call_tasks() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let fixture = ctx.seed_case(&model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .activate_plan_item_definition_ids(["payout", "appeal", "intake"])
        .child_instance_task_variable("payout", "amount", json!(1200))
        .child_instance_task_variable("appeal", "reason", json!("denied"))
        .child_instance_task_variable("intake", "ignored", json!(true))
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    let child_vars = |element_id: &str| {
        let id = &live(&plan_items, element_id)[0].id;
        match start_op(&outcome.agenda, id) {
            Some(AgendaOperation::StartPlanItemInstance {
                child_task_variables,
                ..
            }) => child_task_variables.clone(),
            _ => panic!("no start operation for {element_id}"),
        }
    };

    assert_eq!(child_vars("piPayout").unwrap()["amount"], json!(1200));
    assert_eq!(child_vars("piAppeal").unwrap()["reason"], json!("denied"));
    assert_eq!(child_vars("piIntake"), None);
}

#[tokio::test]
async fn test_new_assignee_carried_on_start() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, _, t1, _) = case_with_active_t1(&ctx, &model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id_with_assignee(&t1, "t2", "kim")
        .case_variable("escalated", json!(true))
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    let t2 = &live(&plan_items, "piT2")[0].id;
    match start_op(&outcome.agenda, t2) {
        Some(AgendaOperation::StartPlanItemInstance { assignee, .. }) => {
            assert_eq!(assignee.as_deref(), Some("kim"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let case_instance = ctx
        .service
        .get_case_instance(&fixture.case_instance_id)
        .await
        .unwrap();
    assert_eq!(case_instance.variables["escalated"], json!(true));
}

#[tokio::test]
async fn test_new_assignee_reassigns_existing_task() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, _, t1, t1_task) = case_with_active_t1(&ctx, &model).await;
    let intake = ctx
        .seed_plan_item(&fixture, &model, "piIntake", &fixture.root_id, S::Available)
        .await;
    let intake_task = ctx.seed_task(&fixture, &intake, Some("alice")).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id_with_assignee(&t1, "intake", "kim")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();

    // the existing task record takes the assignee, the start carries none
    match start_op(&outcome.agenda, &intake) {
        Some(AgendaOperation::StartPlanItemInstance { assignee, .. }) => {
            assert!(assignee.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(outcome.changed_task_ids, vec![t1_task, intake_task.clone()]);

    let tasks = ctx
        .service
        .get_tasks_for_plan_item_instance(&intake)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, intake_task);
    assert_eq!(tasks[0].assignee.as_deref(), Some("kim"));
    assert!(tasks[0].delete_reason.is_none());
}

#[tokio::test]
async fn test_move_by_definition_id() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, _, t1, _) = case_with_active_t1(&ctx, &model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_definition_id_to("t1", "t2")
        .build()
        .unwrap();
    ctx.service.change_state(&request).await.unwrap();

    assert_eq!(ctx.plan_item(&t1).await.state, S::Terminated);
    let plan_items = ctx.plan_items(&fixture.case_instance_id).await;
    assert_eq!(live(&plan_items, "piT2").len(), 1);

    // nothing left to move
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert!(matches!(err, CoreError::NoLivePlanItemInstances { .. }));
}

#[tokio::test]
async fn test_concurrent_change_is_rejected() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, _, t1, _) = case_with_active_t1(&ctx, &model).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&fixture.case_instance_id)
        .move_plan_item_instance_to_plan_item_definition_id(&t1, "t2")
        .build()
        .unwrap();
    let snapshot = ctx
        .persistence
        .load_case_snapshot(&fixture.case_instance_id)
        .await
        .unwrap()
        .unwrap();

    let mut first = CaseUnitOfWork::new(snapshot.clone(), ts());
    execute_change_state(&request, &model, &mut first).unwrap();
    let mut second = CaseUnitOfWork::new(snapshot, ts());
    execute_change_state(&request, &model, &mut second).unwrap();

    ctx.persistence
        .commit_case_changes(&first.into_change_set())
        .await
        .unwrap();
    let plan_items_after_first = ctx.plan_items(&fixture.case_instance_id).await;

    let err = ctx
        .persistence
        .commit_case_changes(&second.into_change_set())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::ConcurrentModification {
            case_instance_id: fixture.case_instance_id.clone()
        }
    );
    assert_eq!(ctx.plan_items(&fixture.case_instance_id).await, plan_items_after_first);
}

#[tokio::test]
async fn test_unknown_case_instance() {
    let ctx = TestContext::new().await;
    ctx.deploy(claims_definition()).await;

    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id("nope")
        .activate_plan_item_definition_id("intake")
        .build()
        .unwrap();
    let err = ctx.service.change_state(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "CASE_INSTANCE_NOT_FOUND");
}

#[tokio::test]
async fn test_get_plan_item_instance_and_tasks() {
    let ctx = TestContext::new().await;
    let model = ctx.deploy(claims_definition()).await;
    let (fixture, s1, t1, task) = case_with_active_t1(&ctx, &model).await;

    let record = ctx.service.get_plan_item_instance(&t1).await.unwrap();
    assert_eq!(record.element_id, "piT1");
    assert_eq!(record.stage_instance_id.as_deref(), Some(s1.as_str()));
    assert_eq!(record.case_instance_id, fixture.case_instance_id);

    let tasks = ctx.service.get_tasks_for_plan_item_instance(&t1).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task);
    assert!(ctx.service.get_tasks_for_plan_item_instance(&s1).await.unwrap().is_empty());

    let err = ctx.service.get_plan_item_instance("nope").await.unwrap_err();
    assert_eq!(err.error_code(), "PLAN_ITEM_INSTANCE_NOT_FOUND");
    let err = ctx
        .service
        .get_tasks_for_plan_item_instance("nope")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PlanItemInstanceNotFound { .. }));
}

#[tokio::test]
async fn test_start_case_instance() {
    let ctx = TestContext::new().await;
    let model: Arc<CaseModel> = ctx.deploy(claims_definition()).await;

    let mut variables = serde_json::Map::new();
    variables.insert("policy".to_string(), json!("P-9"));
    let case_instance = ctx
        .service
        .start_case_instance(&StartCaseInstanceRequest {
            case_definition_id: "claims:1".to_string(),
            name: Some("Claim 9".to_string()),
            variables,
            ..Default::default()
        })
        .await
        .unwrap();

    let plan_items = ctx.plan_items(&case_instance.id).await;
    let top_level = model.children(&model.plan_model().id).count();
    assert_eq!(plan_items.len(), top_level + 1);

    let root = &plan_items[0];
    assert_eq!(root.id, case_instance.plan_model_instance_id);
    assert_eq!(root.state, S::Active);
    assert_eq!(root.start_time, Some(ts()));
    assert!(plan_items[1..].iter().all(|pii| {
        pii.state == S::Available && pii.stage_instance_id.as_deref() == Some(root.id.as_str())
    }));

    let agenda = ctx
        .service
        .get_agenda_operations(&case_instance.id)
        .await
        .unwrap();
    assert_eq!(agenda.len(), top_level + 1);
    assert_eq!(agenda[top_level].operation.kind(), "evaluate_criteria");

    let stored = ctx.service.get_case_instance(&case_instance.id).await.unwrap();
    assert_eq!(stored.variables["policy"], json!("P-9"));
    assert_eq!(stored.name.as_deref(), Some("Claim 9"));

    // a started case can be changed right away
    let request = ChangePlanItemStateBuilder::new()
        .case_instance_id(&case_instance.id)
        .activate_plan_item_definition_id("intake")
        .build()
        .unwrap();
    let outcome = ctx.service.change_state(&request).await.unwrap();
    assert!(outcome.created_plan_item_instance_ids.is_empty());
}

#[tokio::test]
async fn test_start_unknown_definition() {
    let ctx = TestContext::new().await;
    let err = ctx
        .service
        .start_case_instance(&StartCaseInstanceRequest {
            case_definition_id: "missing:1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CaseDefinitionNotFound { .. }));
}
