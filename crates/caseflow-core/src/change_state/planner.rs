// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Expands caller move requests into resolved move containers.

use std::collections::HashMap;

use caseflow_model::CaseModel;
use tracing::debug;

use super::request::{
    ChangePlanItemStateRequest, MovePlanItemDefinitionIdContainer, MovePlanItemInstanceIdContainer,
};
use super::{MovePlanItemInstanceEntityContainer, PlanItemMoveEntry};
use crate::error::{CoreError, Result};
use crate::persistence::PlanItemInstanceRecord;
use crate::unit_of_work::CaseUnitOfWork;

/// Resolve every move group of a request against the loaded case.
///
/// Instance-id groups come first, then definition-id groups, each in request
/// order.
pub fn resolve_move_containers(
    request: &ChangePlanItemStateRequest,
    uow: &CaseUnitOfWork,
) -> Result<Vec<MovePlanItemInstanceEntityContainer>> {
    if request.case_instance_id != uow.case_instance_id() {
        return Err(CoreError::CaseInstanceNotFound {
            case_instance_id: request.case_instance_id.clone(),
        });
    }

    let mut containers = Vec::new();
    for id_container in &request.move_plan_item_instance_id_list {
        containers.extend(resolve_move_plan_item_instance_id_container(id_container, uow)?);
    }
    for definition_container in &request.move_plan_item_definition_id_list {
        containers.extend(resolve_move_plan_item_definition_id_container(
            definition_container,
            uow,
        )?);
    }

    debug!(
        case_instance_id = %uow.case_instance_id(),
        containers = containers.len(),
        "Resolved move containers"
    );
    Ok(containers)
}

/// Split an id group by containing stage instance, in first-seen order.
fn resolve_move_plan_item_instance_id_container(
    id_container: &MovePlanItemInstanceIdContainer,
    uow: &CaseUnitOfWork,
) -> Result<Vec<MovePlanItemInstanceEntityContainer>> {
    let mut groups: Vec<(Option<String>, Vec<PlanItemInstanceRecord>)> = Vec::new();

    for id in &id_container.plan_item_instance_ids {
        let pii = uow
            .plan_item_instance(id)
            .filter(|pii| pii.is_live())
            .ok_or_else(|| CoreError::PlanItemInstanceNotFound {
                plan_item_instance_id: id.clone(),
            })?;
        if pii.stage_instance_id.is_none() {
            return Err(CoreError::illegal_request(format!(
                "Plan model instance '{}' cannot be moved",
                id
            )));
        }

        match groups
            .iter_mut()
            .find(|(stage, _)| *stage == pii.stage_instance_id)
        {
            Some((_, members)) => {
                if !members.iter().any(|m| m.id == pii.id) {
                    members.push(pii.clone());
                }
            }
            None => groups.push((pii.stage_instance_id.clone(), vec![pii.clone()])),
        }
    }

    Ok(groups
        .into_iter()
        .map(|(_, members)| {
            new_container(
                members,
                &id_container.move_to_plan_item_definition_ids,
                id_container.new_assignee_id.clone(),
            )
        })
        .collect())
}

/// One container per source definition id, holding all its live instances.
fn resolve_move_plan_item_definition_id_container(
    definition_container: &MovePlanItemDefinitionIdContainer,
    uow: &CaseUnitOfWork,
) -> Result<Vec<MovePlanItemInstanceEntityContainer>> {
    let mut containers = Vec::new();

    for definition_id in &definition_container.plan_item_definition_ids {
        let live: Vec<PlanItemInstanceRecord> = uow
            .find_live_by_definition_id(definition_id)
            .into_iter()
            .filter(|pii| pii.stage_instance_id.is_some())
            .cloned()
            .collect();
        if live.is_empty() {
            return Err(CoreError::NoLivePlanItemInstances {
                case_instance_id: uow.case_instance_id().to_string(),
                plan_item_definition_id: definition_id.clone(),
            });
        }

        containers.push(new_container(
            live,
            &definition_container.move_to_plan_item_definition_ids,
            definition_container.new_assignee_id.clone(),
        ));
    }

    Ok(containers)
}

fn new_container(
    plan_item_instances: Vec<PlanItemInstanceRecord>,
    targets: &[String],
    new_assignee_id: Option<String>,
) -> MovePlanItemInstanceEntityContainer {
    let (case_instance_id, case_definition_id, tenant_id) = plan_item_instances
        .first()
        .map(|first| {
            (
                first.case_instance_id.clone(),
                first.case_definition_id.clone(),
                first.tenant_id.clone(),
            )
        })
        .unwrap_or_default();
    MovePlanItemInstanceEntityContainer {
        case_instance_id,
        case_definition_id,
        tenant_id,
        plan_item_instances,
        move_to_plan_item_definition_ids: targets.to_vec(),
        move_entries: Vec::new(),
        continue_parent_plan_item_instances: HashMap::new(),
        new_assignee_id,
    }
}

/// Resolve the design-time plan items of every target of a container.
///
/// # Errors
///
/// [`CoreError::PlanItemNotFound`] when the first source's plan item or a
/// target definition cannot be found in the model.
pub fn prepare_move_container(
    container: &mut MovePlanItemInstanceEntityContainer,
    model: &CaseModel,
) -> Result<()> {
    let not_found = |plan_item_id: &str| CoreError::PlanItemNotFound {
        plan_item_id: plan_item_id.to_string(),
        case_definition_id: model.definition_id().to_string(),
    };

    let Some(first) = container.plan_item_instances.first() else {
        return Err(CoreError::illegal_request("Move container has no source instances"));
    };
    let original = model
        .plan_item(&first.element_id)
        .ok_or_else(|| not_found(&first.element_id))?;

    let mut entries = Vec::with_capacity(container.move_to_plan_item_definition_ids.len());
    for target_definition_id in &container.move_to_plan_item_definition_ids {
        let target = model
            .plan_item_by_definition_id(target_definition_id)
            .ok_or_else(|| not_found(target_definition_id))?;
        if model.is_plan_model(&target.id) {
            return Err(CoreError::illegal_request(format!(
                "Plan model '{}' cannot be a move target",
                target_definition_id
            )));
        }
        if entries
            .iter()
            .any(|e: &PlanItemMoveEntry| e.new_plan_item.id == target.id)
        {
            continue;
        }
        entries.push(PlanItemMoveEntry {
            original_plan_item: original.clone(),
            new_plan_item: target.clone(),
        });
    }

    container.move_entries = entries;
    Ok(())
}
