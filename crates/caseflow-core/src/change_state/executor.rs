// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State transition executor.
//!
//! Applies a [`ChangePlanItemStateRequest`] to a [`CaseUnitOfWork`] in phases.
//! Every phase sees the mutations of the previous ones. An error from any
//! phase leaves the unit of work half-applied; callers must drop it.

use std::collections::HashSet;

use caseflow_model::{CaseModel, PlanItemNode};
use tracing::{debug, instrument};

use super::hierarchy::{
    collect_stages_to_create, ensure_stage_hierarchy, find_available_instance,
    resolve_parent_instance,
};
use super::planner::{prepare_move_container, resolve_move_containers};
use super::{CaseInstanceChangeState, ChangePlanItemStateRequest};
use crate::error::{CoreError, Result};
use crate::persistence::PlanItemInstanceRecord;
use crate::state::PlanItemInstanceState;
use crate::unit_of_work::CaseUnitOfWork;

/// Run every phase of a change-state request against a loaded case.
#[instrument(skip_all, fields(case_instance_id = %request.case_instance_id))]
pub fn execute_change_state(
    request: &ChangePlanItemStateRequest,
    model: &CaseModel,
    uow: &mut CaseUnitOfWork,
) -> Result<CaseInstanceChangeState> {
    request.validate()?;

    let mut change_state = CaseInstanceChangeState::new(request);
    let mut containers = resolve_move_containers(request, uow)?;
    for container in &mut containers {
        prepare_move_container(container, model)?;
    }
    change_state.move_containers = containers;

    snapshot_current_stages(&mut change_state, uow);
    terminate_move_sources(&mut change_state, uow, model)?;
    materialize_move_targets(&mut change_state, uow, model)?;
    activate_plan_items(&mut change_state, uow, model)?;
    change_plan_items_to_available(&change_state, uow)?;
    terminate_plan_items(&change_state, uow, model)?;

    debug!(
        created = uow.created_ids().len(),
        terminated = uow.terminated_ids().len(),
        agenda = uow.agenda().len(),
        "Change state applied"
    );
    Ok(change_state)
}

/// Phase 0: record running stages and apply case variables.
fn snapshot_current_stages(change_state: &mut CaseInstanceChangeState, uow: &mut CaseUnitOfWork) {
    for pii in uow.find_plan_item_instances_by_case_instance_id() {
        if pii.is_stage && pii.is_live() && pii.state == PlanItemInstanceState::Active {
            change_state
                .current_stage_instances
                .entry(pii.plan_item_definition_id.clone())
                .or_default()
                .push(pii.id.clone());
        }
    }
    uow.set_case_variables(&change_state.case_variables);
    debug!(
        stages = change_state.current_stage_instances.len(),
        variables = change_state.case_variables.len(),
        "Snapshot taken"
    );
}

/// Phase 1: terminate move sources and collapse stages they leave orphaned.
fn terminate_move_sources(
    change_state: &mut CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<()> {
    for container in &mut change_state.move_containers {
        let targets: Vec<String> = container
            .move_entries
            .iter()
            .map(|entry| entry.new_plan_item.id.clone())
            .collect();

        for source in &container.plan_item_instances {
            let terminated = uow.terminate_plan_item_instance(&source.id)?;
            if terminated && source.owns_task_record() {
                uow.delete_tasks_of(&source.id)?;
            }

            let continue_parent = match source.stage_instance_id.as_deref() {
                Some(parent) => Some(collapse_orphaned_stages(parent, &targets, uow, model)?),
                None => None,
            };
            debug!(
                plan_item_instance_id = %source.id,
                continue_parent = ?continue_parent,
                "Move source terminated"
            );
            container
                .continue_parent_plan_item_instances
                .insert(source.id.clone(), continue_parent);
        }
    }
    Ok(())
}

/// Terminate the outermost ancestor stage enclosing none of `targets`.
///
/// Walks up from `parent_id` while the stage encloses no target; terminates
/// only the last stage visited. Returns the first enclosing stage instance
/// that is still needed.
fn collapse_orphaned_stages(
    parent_id: &str,
    targets: &[String],
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<String> {
    let mut current = parent_id.to_string();
    let mut outermost_orphan: Option<String> = None;

    loop {
        let stage = uow.find_plan_item_instance_by_id(&current)?;
        let needed = model.is_plan_model(&stage.element_id)
            || targets
                .iter()
                .any(|target| model.is_stage_ancestor_of(&stage.plan_item_definition_id, target));
        if needed {
            break;
        }
        let Some(grand_parent) = stage.stage_instance_id.clone() else {
            break;
        };
        outermost_orphan = Some(current);
        current = grand_parent;
    }

    if let Some(orphan) = outermost_orphan
        && uow.terminate_plan_item_instance(&orphan)?
    {
        debug!(stage_instance_id = %orphan, "Orphaned stage terminated");
    }
    Ok(current)
}

/// Phase 2: build the stages and leaves each move targets.
fn materialize_move_targets(
    change_state: &mut CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<()> {
    let containers = std::mem::take(&mut change_state.move_containers);

    for container in &containers {
        let default_parent = match container.continue_parent() {
            Some(parent) => parent.to_string(),
            None => uow.plan_model_instance()?.id.clone(),
        };
        let moving: HashSet<String> = container
            .plan_item_instance_ids()
            .map(str::to_string)
            .collect();
        let targets: Vec<&PlanItemNode> = container
            .move_entries
            .iter()
            .map(|entry| &entry.new_plan_item)
            .collect();

        let ids = materialize(
            &targets,
            &default_parent,
            &container.plan_item_instances,
            &moving,
            change_state,
            uow,
            model,
        )?;

        for (target, id) in targets.iter().zip(&ids) {
            let assignee = apply_new_assignee(target, id, container.new_assignee_id.as_deref(), uow)?;
            let child_variables = change_state.child_task_variables_for(target);
            uow.agenda_mut()
                .plan_start_plan_item_instance(id, child_variables, assignee);
        }
        uow.agenda_mut()
            .plan_evaluate_criteria(&container.case_instance_id);
    }

    change_state.move_containers = containers;
    Ok(())
}

/// Phase 3: materialise and start plan items outside any move.
fn activate_plan_items(
    change_state: &mut CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<()> {
    if change_state.activate_plan_item_definition_ids.is_empty() {
        return Ok(());
    }

    let definition_ids = change_state.activate_plan_item_definition_ids.clone();
    let targets = definition_ids
        .iter()
        .map(|id| lookup_definition(id, model))
        .collect::<Result<Vec<_>>>()?;
    let root = uow.plan_model_instance()?.id.clone();

    let ids = materialize(&targets, &root, &[], &HashSet::new(), change_state, uow, model)?;
    for (target, id) in targets.iter().zip(&ids) {
        let child_variables = change_state.child_task_variables_for(target);
        uow.agenda_mut()
            .plan_start_plan_item_instance(id, child_variables, None);
    }

    let case_instance_id = uow.case_instance_id().to_string();
    uow.agenda_mut().plan_evaluate_criteria(&case_instance_id);
    debug!(activated = ids.len(), "Plan items activated");
    Ok(())
}

/// Phase 4: move exactly one active or enabled instance back to available.
fn change_plan_items_to_available(
    change_state: &CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
) -> Result<()> {
    for definition_id in &change_state.change_to_available_state_plan_item_definition_ids {
        let candidates: Vec<&PlanItemInstanceRecord> = uow
            .find_live_by_definition_id(definition_id)
            .into_iter()
            .filter(|pii| pii.state.is_active_or_enabled())
            .collect();

        let (id, owns_task) = match candidates.as_slice() {
            [] => {
                return Err(CoreError::NoActivePlanItemInstance {
                    case_instance_id: uow.case_instance_id().to_string(),
                    plan_item_definition_id: definition_id.clone(),
                });
            }
            [single] => (single.id.clone(), single.owns_task_record()),
            many => {
                return Err(CoreError::AmbiguousState {
                    plan_item_definition_id: definition_id.clone(),
                    count: many.len(),
                });
            }
        };

        if owns_task {
            uow.delete_tasks_of(&id)?;
        }
        uow.agenda_mut()
            .plan_change_plan_item_instance_to_available(&id);
        debug!(plan_item_instance_id = %id, "Plan item changed to available");
    }
    Ok(())
}

/// Phase 5: terminate every live instance of the requested definitions.
fn terminate_plan_items(
    change_state: &CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<()> {
    if change_state.terminate_plan_item_definition_ids.is_empty() {
        return Ok(());
    }

    for definition_id in &change_state.terminate_plan_item_definition_ids {
        let node = lookup_definition(definition_id, model)?;
        if model.is_plan_model(&node.id) {
            return Err(CoreError::illegal_request(format!(
                "Plan model '{}' cannot be terminated",
                definition_id
            )));
        }

        let live: Vec<String> = uow
            .find_live_by_definition_id(definition_id)
            .into_iter()
            .map(|pii| pii.id.clone())
            .collect();
        if live.is_empty() {
            return Err(CoreError::NoLivePlanItemInstances {
                case_instance_id: uow.case_instance_id().to_string(),
                plan_item_definition_id: definition_id.clone(),
            });
        }

        for id in live {
            let mut subtree = vec![id.clone()];
            subtree.extend(uow.live_descendant_ids(&id));
            for member in subtree {
                let owns_task = uow.find_plan_item_instance_by_id(&member)?.owns_task_record();
                if uow.terminate_plan_item_instance(&member)? && owns_task {
                    uow.delete_tasks_of(&member)?;
                }
            }
        }
    }

    let case_instance_id = uow.case_instance_id().to_string();
    uow.agenda_mut().plan_evaluate_criteria(&case_instance_id);
    Ok(())
}

/// Build missing stages, then one instance per target; returns the target instance ids.
fn materialize(
    targets: &[&PlanItemNode],
    default_parent: &str,
    moving_instances: &[PlanItemInstanceRecord],
    moving: &HashSet<String>,
    change_state: &mut CaseInstanceChangeState,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<Vec<String>> {
    let stages_to_create =
        collect_stages_to_create(targets, moving_instances, change_state, uow, model);
    for stage_definition_id in &stages_to_create {
        if change_state
            .created_stage_instance(stage_definition_id)
            .is_some()
        {
            continue;
        }
        let stage = lookup_definition(stage_definition_id, model)?;
        ensure_stage_hierarchy(
            stage,
            default_parent,
            &stages_to_create,
            moving,
            change_state,
            uow,
            model,
        )?;
    }

    let batch: HashSet<&str> = targets.iter().map(|t| t.id.as_str()).collect();
    let mut ids = Vec::with_capacity(targets.len());
    for target in targets {
        let parent = resolve_parent_instance(
            target,
            default_parent,
            &stages_to_create,
            moving,
            change_state,
            uow,
            model,
        )?;

        if let Some(existing) = find_available_instance(target, &parent, moving, uow) {
            debug!(plan_item = %target.id, plan_item_instance_id = %existing, "Reusing available instance");
            ids.push(existing);
            continue;
        }

        let id = uow.create_child_plan_item_instance(target, Some(&parent), true)?;
        create_missing_siblings(target, &parent, &batch, uow, model)?;
        ids.push(id);
    }
    Ok(ids)
}

/// Create `AVAILABLE` instances of the target's siblings that have none under `parent`.
fn create_missing_siblings(
    target: &PlanItemNode,
    parent: &str,
    batch: &HashSet<&str>,
    uow: &mut CaseUnitOfWork,
    model: &CaseModel,
) -> Result<()> {
    for sibling in model.siblings(&target.id) {
        if batch.contains(sibling.id.as_str()) {
            continue;
        }
        let present = uow
            .find_stage_children(parent)
            .iter()
            .any(|child| child.is_live() && child.element_id == sibling.id);
        if present {
            continue;
        }

        let id = uow.create_child_plan_item_instance(sibling, Some(parent), true)?;
        uow.agenda_mut().plan_create_plan_item_instance(&id);
    }
    Ok(())
}

/// Reassign existing task records, or return the assignee for the start operation.
fn apply_new_assignee(
    target: &PlanItemNode,
    plan_item_instance_id: &str,
    new_assignee: Option<&str>,
    uow: &mut CaseUnitOfWork,
) -> Result<Option<String>> {
    let Some(assignee) = new_assignee else {
        return Ok(None);
    };
    if !target.kind().is_human_task() {
        return Ok(None);
    }

    let task_ids: Vec<String> = uow
        .find_tasks_by_plan_item_instance_id(plan_item_instance_id)
        .into_iter()
        .map(|task| task.id.clone())
        .collect();
    if task_ids.is_empty() {
        return Ok(Some(assignee.to_string()));
    }
    for task_id in &task_ids {
        uow.reassign_task(task_id, assignee)?;
    }
    Ok(None)
}

fn lookup_definition<'a>(definition_id: &str, model: &'a CaseModel) -> Result<&'a PlanItemNode> {
    model
        .plan_item_by_definition_id(definition_id)
        .ok_or_else(|| CoreError::PlanItemNotFound {
            plan_item_id: definition_id.to_string(),
            case_definition_id: model.definition_id().to_string(),
        })
}
