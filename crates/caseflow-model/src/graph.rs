// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Indexed case definition graph.
//!
//! [`CaseModel`] flattens the nested [`CaseDefinition`] into nodes keyed by
//! element id, each carrying a pointer to its parent stage. Stage nesting is a
//! tree by construction, so every ancestor walk terminates at the plan model.

use std::collections::HashMap;

use crate::definition::{CaseDefinition, PlanItem, PlanItemDefinition, PlanItemKind};
use crate::error::ModelError;

/// One plan item of the case definition, with its position in the stage tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItemNode {
    /// Element id (the design-time plan item id)
    pub id: String,
    pub name: Option<String>,
    /// Definition with stage children stripped; see [`PlanItemNode::children`]
    pub definition: PlanItemDefinition,
    /// Element id of the containing stage. `None` only for the plan model.
    pub parent_stage: Option<String>,
    /// Element ids of child plan items (stages only), in document order
    pub children: Vec<String>,
}

impl PlanItemNode {
    pub fn definition_id(&self) -> &str {
        self.definition.id()
    }

    pub fn kind(&self) -> PlanItemKind {
        self.definition.kind()
    }

    pub fn is_stage(&self) -> bool {
        self.kind().is_stage()
    }

    /// Display name: the plan item name, falling back to the definition name.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or_else(|| self.definition.name())
    }
}

/// Read-only, indexed view over one case definition.
#[derive(Debug, Clone)]
pub struct CaseModel {
    definition_id: String,
    tenant_id: Option<String>,
    plan_model_id: String,
    nodes: HashMap<String, PlanItemNode>,
    /// Element ids per definition id, in document order
    by_definition: HashMap<String, Vec<String>>,
}

impl CaseModel {
    /// Index a case definition, validating its structure.
    ///
    /// # Errors
    ///
    /// - [`ModelError::EmptyId`] for a blank element or definition id
    /// - [`ModelError::DuplicatePlanItemId`] when two plan items share an element id
    /// - [`ModelError::DuplicateStageDefinition`] when one stage definition is placed twice
    pub fn new(definition: &CaseDefinition) -> Result<Self, ModelError> {
        let plan_model = &definition.plan_model;
        if plan_model.id.trim().is_empty() {
            return Err(ModelError::EmptyId {
                context: "plan model".to_string(),
            });
        }

        let root = PlanItemNode {
            id: plan_model.id.clone(),
            name: plan_model.name.clone(),
            definition: PlanItemDefinition::Stage(crate::definition::StageDefinition {
                id: plan_model.id.clone(),
                name: plan_model.name.clone(),
                auto_complete: false,
                plan_items: Vec::new(),
            }),
            parent_stage: None,
            children: plan_model.plan_items.iter().map(|p| p.id.clone()).collect(),
        };

        let mut model = Self {
            definition_id: definition.id.clone(),
            tenant_id: definition.tenant_id.clone(),
            plan_model_id: plan_model.id.clone(),
            nodes: HashMap::new(),
            by_definition: HashMap::new(),
        };
        model
            .by_definition
            .insert(plan_model.id.clone(), vec![plan_model.id.clone()]);
        model.nodes.insert(plan_model.id.clone(), root);

        for plan_item in &plan_model.plan_items {
            model.index(plan_item, &plan_model.id)?;
        }

        Ok(model)
    }

    fn index(&mut self, plan_item: &PlanItem, parent: &str) -> Result<(), ModelError> {
        if plan_item.id.trim().is_empty() {
            return Err(ModelError::EmptyId {
                context: format!("plan item in stage '{}'", parent),
            });
        }
        if plan_item.definition.id().trim().is_empty() {
            return Err(ModelError::EmptyId {
                context: format!("definition of plan item '{}'", plan_item.id),
            });
        }
        if self.nodes.contains_key(&plan_item.id) {
            return Err(ModelError::DuplicatePlanItemId {
                plan_item_id: plan_item.id.clone(),
            });
        }

        let definition_id = plan_item.definition.id().to_string();
        let placements = self.by_definition.entry(definition_id.clone()).or_default();
        if plan_item.definition.kind().is_stage() && !placements.is_empty() {
            return Err(ModelError::DuplicateStageDefinition {
                definition_id,
            });
        }
        placements.push(plan_item.id.clone());

        let children = plan_item.definition.plan_items();
        self.nodes.insert(
            plan_item.id.clone(),
            PlanItemNode {
                id: plan_item.id.clone(),
                name: plan_item.name.clone(),
                definition: plan_item.definition.detached(),
                parent_stage: Some(parent.to_string()),
                children: children.iter().map(|c| c.id.clone()).collect(),
            },
        );

        for child in children {
            self.index(child, &plan_item.id)?;
        }
        Ok(())
    }

    /// Id of the case definition this model was built from.
    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// The root node.
    pub fn plan_model(&self) -> &PlanItemNode {
        // The root is inserted by the constructor and never removed.
        &self.nodes[&self.plan_model_id]
    }

    pub fn is_plan_model(&self, element_id: &str) -> bool {
        self.plan_model_id == element_id
    }

    /// Resolve a plan item by element id.
    pub fn plan_item(&self, element_id: &str) -> Option<&PlanItemNode> {
        self.nodes.get(element_id)
    }

    /// Resolve the first plan item (in document order) placing this definition.
    pub fn plan_item_by_definition_id(&self, definition_id: &str) -> Option<&PlanItemNode> {
        self.by_definition
            .get(definition_id)
            .and_then(|ids| ids.first())
            .and_then(|id| self.nodes.get(id))
    }

    /// Containing stage of a plan item. `None` for the plan model or unknown ids.
    pub fn parent_stage(&self, element_id: &str) -> Option<&PlanItemNode> {
        self.nodes
            .get(element_id)
            .and_then(|node| node.parent_stage.as_deref())
            .and_then(|parent| self.nodes.get(parent))
    }

    /// Ancestor stages of a plan item, innermost first, ending with the plan model.
    pub fn ancestors<'a>(&'a self, element_id: &str) -> Ancestors<'a> {
        Ancestors {
            model: self,
            next: self.parent_stage(element_id),
        }
    }

    /// Child plan items of a stage, in document order.
    pub fn children<'a>(&'a self, stage_element_id: &str) -> impl Iterator<Item = &'a PlanItemNode> {
        self.nodes
            .get(stage_element_id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Plan items sharing the containing stage of `element_id`, excluding itself.
    pub fn siblings<'a>(&'a self, element_id: &'a str) -> impl Iterator<Item = &'a PlanItemNode> {
        let parent = self
            .nodes
            .get(element_id)
            .and_then(|node| node.parent_stage.as_deref())
            .unwrap_or_default();
        self.children(parent).filter(move |node| node.id != element_id)
    }

    /// Whether the stage with `stage_definition_id` encloses the plan item `element_id`.
    ///
    /// The plan model encloses every other plan item.
    pub fn is_stage_ancestor_of(&self, stage_definition_id: &str, element_id: &str) -> bool {
        self.ancestors(element_id)
            .any(|stage| stage.definition_id() == stage_definition_id)
    }

    /// Number of plan items, the plan model included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Iterator over the ancestor stages of a plan item.
pub struct Ancestors<'a> {
    model: &'a CaseModel,
    next: Option<&'a PlanItemNode>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a PlanItemNode;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current
            .parent_stage
            .as_deref()
            .and_then(|parent| self.model.nodes.get(parent));
        Some(current)
    }
}
