// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serialisable case definition types.
//!
//! A case definition is a tree: the plan model is the outermost stage, every
//! stage owns a list of plan items, and every plan item embeds the definition
//! it instantiates. [`crate::CaseModel`] indexes this tree for runtime lookups.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ============================================================================
// Root Types
// ============================================================================

/// Complete, already-parsed case definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseDefinition {
    /// Unique definition id (usually `key:version:uuid`).
    pub id: String,

    /// Definition key shared by all versions.
    pub key: String,

    /// Human-readable case name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Deployment version of this definition
    #[serde(default = "default_version")]
    pub version: i32,

    /// Tenant owning the definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Outermost stage of the case
    pub plan_model: PlanModel,
}

fn default_version() -> i32 {
    1
}

/// The implicit root stage of a case definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanModel {
    /// Plan model id. Used both as element id and as definition id of the root.
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Top-level plan items
    #[serde(default)]
    pub plan_items: Vec<PlanItem>,
}

/// A plan item placed inside a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    /// Element id, unique within the case definition
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The definition this plan item instantiates
    pub definition: PlanItemDefinition,
}

// ============================================================================
// Plan Item Definitions
// ============================================================================

/// Union of all plan item definition kinds, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlanItemDefinition {
    /// Container grouping child plan items
    Stage(StageDefinition),

    /// Task performed by a person, backed by a task record
    HumanTask(HumanTaskDefinition),

    /// Task that starts a process instance
    ProcessTask(ProcessTaskDefinition),

    /// Task that starts a child case instance
    CaseTask(CaseTaskDefinition),

    /// Automated task
    ServiceTask(ServiceTaskDefinition),

    /// Task that evaluates a decision table
    DecisionTask(DecisionTaskDefinition),

    /// Achievable target of the case
    Milestone(MilestoneDefinition),

    /// Listener firing on a timer expression
    TimerEventListener(TimerEventListenerDefinition),

    /// Listener triggered by a user
    UserEventListener(UserEventListenerDefinition),

    /// Listener triggered programmatically
    GenericEventListener(GenericEventListenerDefinition),
}

/// Fieldless discriminant of [`PlanItemDefinition`].
///
/// The string form is what runtime records store as the definition type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, AsRefStr,
    Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlanItemKind {
    Stage,
    HumanTask,
    ProcessTask,
    CaseTask,
    ServiceTask,
    DecisionTask,
    Milestone,
    TimerEventListener,
    UserEventListener,
    GenericEventListener,
}

impl PlanItemKind {
    /// Whether instances of this kind start a child process or case.
    pub fn is_call_task(&self) -> bool {
        matches!(self, Self::ProcessTask | Self::CaseTask)
    }

    /// Whether instances of this kind own a task record while active.
    pub fn is_human_task(&self) -> bool {
        matches!(self, Self::HumanTask)
    }

    pub fn is_stage(&self) -> bool {
        matches!(self, Self::Stage)
    }

    /// Whether this kind is one of the event listener variants.
    pub fn is_event_listener(&self) -> bool {
        matches!(
            self,
            Self::TimerEventListener | Self::UserEventListener | Self::GenericEventListener
        )
    }
}

/// Stage definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    /// Unique definition id
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Complete the stage as soon as no child is active
    #[serde(default)]
    pub auto_complete: bool,

    /// Child plan items
    #[serde(default)]
    pub plan_items: Vec<PlanItem>,
}

/// Human task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HumanTaskDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Static assignee expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_groups: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_key: Option<String>,
}

/// Process task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTaskDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Key of the process definition to start
    pub process_ref: String,
}

/// Case task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseTaskDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Key of the case definition to start
    pub case_ref: String,
}

/// Service task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTaskDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
}

/// Decision task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTaskDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub decision_ref: String,
}

/// Milestone definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Timer event listener definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimerEventListenerDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// ISO-8601 duration, date or cron expression
    pub timer_expression: String,
}

/// User event listener definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserEventListenerDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Generic event listener definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenericEventListenerDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ============================================================================
// PlanItemDefinition Helper Methods
// ============================================================================

impl PlanItemDefinition {
    /// Definition id, independent of the variant.
    pub fn id(&self) -> &str {
        match self {
            Self::Stage(d) => &d.id,
            Self::HumanTask(d) => &d.id,
            Self::ProcessTask(d) => &d.id,
            Self::CaseTask(d) => &d.id,
            Self::ServiceTask(d) => &d.id,
            Self::DecisionTask(d) => &d.id,
            Self::Milestone(d) => &d.id,
            Self::TimerEventListener(d) => &d.id,
            Self::UserEventListener(d) => &d.id,
            Self::GenericEventListener(d) => &d.id,
        }
    }

    /// Definition name, independent of the variant.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Stage(d) => d.name.as_deref(),
            Self::HumanTask(d) => d.name.as_deref(),
            Self::ProcessTask(d) => d.name.as_deref(),
            Self::CaseTask(d) => d.name.as_deref(),
            Self::ServiceTask(d) => d.name.as_deref(),
            Self::DecisionTask(d) => d.name.as_deref(),
            Self::Milestone(d) => d.name.as_deref(),
            Self::TimerEventListener(d) => d.name.as_deref(),
            Self::UserEventListener(d) => d.name.as_deref(),
            Self::GenericEventListener(d) => d.name.as_deref(),
        }
    }

    pub fn kind(&self) -> PlanItemKind {
        match self {
            Self::Stage(_) => PlanItemKind::Stage,
            Self::HumanTask(_) => PlanItemKind::HumanTask,
            Self::ProcessTask(_) => PlanItemKind::ProcessTask,
            Self::CaseTask(_) => PlanItemKind::CaseTask,
            Self::ServiceTask(_) => PlanItemKind::ServiceTask,
            Self::DecisionTask(_) => PlanItemKind::DecisionTask,
            Self::Milestone(_) => PlanItemKind::Milestone,
            Self::TimerEventListener(_) => PlanItemKind::TimerEventListener,
            Self::UserEventListener(_) => PlanItemKind::UserEventListener,
            Self::GenericEventListener(_) => PlanItemKind::GenericEventListener,
        }
    }

    /// Child plan items when this is a stage, empty otherwise.
    pub fn plan_items(&self) -> &[PlanItem] {
        match self {
            Self::Stage(d) => &d.plan_items,
            _ => &[],
        }
    }

    /// Copy of this definition with the stage children stripped.
    ///
    /// Graph nodes keep their children as element ids instead.
    pub(crate) fn detached(&self) -> Self {
        match self {
            Self::Stage(d) => Self::Stage(StageDefinition {
                id: d.id.clone(),
                name: d.name.clone(),
                auto_complete: d.auto_complete,
                plan_items: Vec::new(),
            }),
            other => other.clone(),
        }
    }
}
