// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stage hierarchy builder.
//!
//! Makes sure every stage enclosing a migration target has exactly one live
//! instance, reusing running or waiting stage instances before creating new
//! ones. Stage instances created or reused during an operation are memoised in
//! the [`CaseInstanceChangeState`], so each stage definition is materialised at
//! most once per operation.

use std::collections::HashSet;

use caseflow_model::{CaseModel, PlanItemNode};
use tracing::debug;

use super::CaseInstanceChangeState;
use crate::error::{CoreError, Result};
use crate::persistence::PlanItemInstanceRecord;
use crate::state::PlanItemInstanceState;
use crate::unit_of_work::CaseUnitOfWork;

/// Return the live instance of `stage`, creating its missing ancestors and itself as needed.
///
/// `default_parent` is the stage instance used when the stage sits directly in
/// the plan model, and the preferred anchor when several running instances of
/// the stage exist.
pub fn ensure_stage_hierarchy(
    stage: &PlanItemNode,
    default_parent: &str,
    stages_to_create: &[String],
    moving_instance_ids: &HashSet<String>,
    change_state: &mut CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<String> {
    let stage_definition_id = stage.definition_id();

    if let Some(current) = find_current_stage_instance(
        stage_definition_id,
        default_parent,
        moving_instance_ids,
        change_state,
        uow,
    ) {
        return Ok(current);
    }

    if let Some(created) = change_state.created_stage_instance(stage_definition_id) {
        return Ok(created.to_string());
    }

    let parent = resolve_parent_instance(
        stage,
        default_parent,
        stages_to_create,
        moving_instance_ids,
        change_state,
        uow,
        model,
    )?;

    let stage_instance_id = match find_available_instance(stage, &parent, moving_instance_ids, uow) {
        Some(available) => {
            debug!(stage = %stage.id, stage_instance_id = %available, "Reusing available stage instance");
            available
        }
        None => {
            let created = uow.create_child_plan_item_instance(stage, Some(&parent), true)?;
            debug!(stage = %stage.id, stage_instance_id = %created, parent = %parent, "Created stage instance");
            created
        }
    };

    change_state.add_created_stage_instance(stage_definition_id, &stage_instance_id);
    uow.agenda_mut()
        .plan_start_plan_item_instance(&stage_instance_id, None, None);
    Ok(stage_instance_id)
}

/// Resolve the stage instance a new instance of `plan_item` belongs under.
///
/// Order of preference: the plan model instance for top-level items, a stage
/// instance created or reused earlier in this operation, a stage scheduled for
/// creation, a live instance of the parent stage, and finally `default_parent`.
pub(crate) fn resolve_parent_instance(
    plan_item: &PlanItemNode,
    default_parent: &str,
    stages_to_create: &[String],
    moving_instance_ids: &HashSet<String>,
    change_state: &mut CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<String> {
    let Some(parent_stage) = model.parent_stage(&plan_item.id) else {
        return Err(CoreError::illegal_request(format!(
            "Plan item '{}' has no containing stage",
            plan_item.id
        )));
    };

    if model.is_plan_model(&parent_stage.id) {
        return plan_model_parent(default_parent, uow, model);
    }

    let parent_definition_id = parent_stage.definition_id();
    if let Some(created) = change_state.created_stage_instance(parent_definition_id) {
        return Ok(created.to_string());
    }

    if stages_to_create.iter().any(|id| id == parent_definition_id) {
        return ensure_stage_hierarchy(
            parent_stage,
            default_parent,
            stages_to_create,
            moving_instance_ids,
            change_state,
            uow,
            model,
        );
    }

    if let Some(live) = find_live_stage_instance(parent_stage, default_parent, moving_instance_ids, uow) {
        return Ok(live);
    }

    // Neither running nor scheduled: build it rather than misplace the child.
    ensure_stage_hierarchy(
        parent_stage,
        default_parent,
        stages_to_create,
        moving_instance_ids,
        change_state,
        uow,
        model,
    )
}

/// Stage definitions enclosing `targets` that need an instance built.
///
/// Excludes stages enclosing a moving source, stages running when the
/// operation began and stages already materialised in this operation.
/// Outermost stages come first.
pub(crate) fn collect_stages_to_create(
    targets: &[&PlanItemNode],
    moving_instances: &[PlanItemInstanceRecord],
    change_state: &CaseInstanceChangeState,
    uow: &CaseUnitOfWork,
    model: &CaseModel,
) -> Vec<String> {
    let mut stages = Vec::new();

    for target in targets {
        let mut chain: Vec<&PlanItemNode> = model
            .ancestors(&target.id)
            .filter(|stage| !model.is_plan_model(&stage.id))
            .collect();
        chain.reverse();

        for stage in chain {
            let definition_id = stage.definition_id();
            let encloses_source = moving_instances
                .iter()
                .any(|source| model.is_stage_ancestor_of(definition_id, &source.element_id));
            let running = change_state
                .current_stage_instances
                .get(definition_id)
                .is_some_and(|ids| ids.iter().any(|id| uow.is_live_in_tree(id)));
            let materialised = change_state.created_stage_instance(definition_id).is_some();

            if !encloses_source
                && !running
                && !materialised
                && !stages.iter().any(|s: &String| s == definition_id)
            {
                stages.push(definition_id.to_string());
            }
        }
    }

    stages
}

fn plan_model_parent(default_parent: &str, uow: &CaseUnitOfWork, model: &CaseModel) -> Result<String> {
    let default_is_plan_model = uow
        .plan_item_instance(default_parent)
        .is_some_and(|pii| pii.is_live() && model.is_plan_model(&pii.element_id));
    if default_is_plan_model {
        return Ok(default_parent.to_string());
    }
    Ok(uow.plan_model_instance()?.id.clone())
}

/// Running stage instance from the snapshot taken when the operation began.
fn find_current_stage_instance(
    stage_definition_id: &str,
    default_parent: &str,
    moving_instance_ids: &HashSet<String>,
    change_state: &CaseInstanceChangeState,
    uow: &CaseUnitOfWork,
) -> Option<String> {
    let candidates: Vec<&str> = change_state
        .current_stage_instances
        .get(stage_definition_id)?
        .iter()
        .map(String::as_str)
        .filter(|id| !moving_instance_ids.contains(*id))
        .filter(|id| uow.is_live_in_tree(id))
        .collect();

    prefer_anchor(candidates, default_parent, uow)
}

/// Any instance of a stage live up to the root, whatever its state.
fn find_live_stage_instance(
    stage: &PlanItemNode,
    default_parent: &str,
    moving_instance_ids: &HashSet<String>,
    uow: &CaseUnitOfWork,
) -> Option<String> {
    let candidates: Vec<&str> = uow
        .find_live_by_definition_id(stage.definition_id())
        .into_iter()
        .filter(|pii| {
            pii.is_stage
                && !moving_instance_ids.contains(&pii.id)
                && uow.is_live_in_tree(&pii.id)
        })
        .map(|pii| pii.id.as_str())
        .collect();

    prefer_anchor(candidates, default_parent, uow)
}

/// Prefer the candidate that is, or encloses, the anchor instance.
fn prefer_anchor(candidates: Vec<&str>, anchor: &str, uow: &CaseUnitOfWork) -> Option<String> {
    candidates
        .iter()
        .find(|id| uow.is_same_or_ancestor_instance(id, anchor))
        .or_else(|| candidates.first())
        .map(|id| id.to_string())
}

/// Live `AVAILABLE` instance of exactly this plan item, preferring one under `parent`.
pub(crate) fn find_available_instance(
    plan_item: &PlanItemNode,
    parent: &str,
    moving_instance_ids: &HashSet<String>,
    uow: &CaseUnitOfWork,
) -> Option<String> {
    let available: Vec<&PlanItemInstanceRecord> = uow
        .find_plan_item_instances_by_plan_item_id(&plan_item.id)
        .into_iter()
        .filter(|pii| {
            pii.state == PlanItemInstanceState::Available
                && uow.is_live_in_tree(&pii.id)
                && !moving_instance_ids.contains(&pii.id)
        })
        .collect();

    available
        .iter()
        .find(|pii| pii.stage_instance_id.as_deref() == Some(parent))
        .or_else(|| available.first())
        .map(|pii| pii.id.clone())
}
