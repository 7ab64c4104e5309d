// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plan item lifecycle states and the CMMN 1.1 transition table (§8.4.2).
//!
//! ```text
//!          create
//!   (none) ──────► AVAILABLE ──start──────────────► ACTIVE ──complete──► COMPLETED
//!                     │  ▲                           │  ▲
//!               enable│  │                     fault │  │ reactivate
//!                     ▼  │                           ▼  │
//!                  ENABLED ──manual-start──► ACTIVE  FAILED
//!                     │  ▲
//!              disable│  │reenable            ACTIVE ──terminate──► TERMINATED
//!                     ▼  │                    any    ──exit───────► TERMINATED
//!                  DISABLED
//! ```
//!
//! `COMPLETED` and `TERMINATED` are terminal. A state with no row in the table
//! (such as `UNAVAILABLE`) is an internal consistency error, never a plain `false`.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Lifecycle state of a plan item instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemInstanceState {
    /// Created, waiting for entry criteria.
    Available,
    /// Exists but cannot become available yet (not part of the CMMN table).
    Unavailable,
    /// Manual activation possible.
    Enabled,
    /// Manual activation switched off.
    Disabled,
    /// Work in progress.
    Active,
    /// Activation handed to an asynchronous job.
    AsyncActive,
    /// Work failed, may be reactivated.
    Failed,
    /// Paused.
    Suspended,
    /// Finished successfully.
    Completed,
    /// Stopped before completion.
    Terminated,
    /// Completed once, waiting for the next repetition.
    WaitingForRepetition,
}

impl PlanItemInstanceState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Active => "active",
            Self::AsyncActive => "async-active",
            Self::Failed => "failed",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::WaitingForRepetition => "wait_repetition",
        }
    }

    /// Parse a state from its stored string form.
    ///
    /// Unknown strings are a consistency error of the stored data.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(Self::Available),
            "unavailable" => Ok(Self::Unavailable),
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            "active" => Ok(Self::Active),
            "async-active" => Ok(Self::AsyncActive),
            "failed" => Ok(Self::Failed),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            "wait_repetition" => Ok(Self::WaitingForRepetition),
            other => Err(CoreError::UnknownPlanItemState {
                state: other.to_string(),
            }),
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    /// States a flip-to-available may start from.
    pub fn is_active_or_enabled(&self) -> bool {
        matches!(self, Self::Active | Self::Enabled)
    }
}

impl fmt::Display for PlanItemInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle transition of a plan item instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemTransition {
    Create,
    Start,
    Enable,
    Disable,
    ManualStart,
    Reenable,
    Fault,
    Complete,
    Suspend,
    Terminate,
    ParentSuspend,
    ParentResume,
    Exit,
    Resume,
    Reactivate,
    AsyncActivate,
    Occur,
}

impl PlanItemTransition {
    /// Every transition, in declaration order.
    pub const ALL: [PlanItemTransition; 17] = [
        Self::Create,
        Self::Start,
        Self::Enable,
        Self::Disable,
        Self::ManualStart,
        Self::Reenable,
        Self::Fault,
        Self::Complete,
        Self::Suspend,
        Self::Terminate,
        Self::ParentSuspend,
        Self::ParentResume,
        Self::Exit,
        Self::Resume,
        Self::Reactivate,
        Self::AsyncActivate,
        Self::Occur,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::ManualStart => "manualStart",
            Self::Reenable => "reenable",
            Self::Fault => "fault",
            Self::Complete => "complete",
            Self::Suspend => "suspend",
            Self::Terminate => "terminate",
            Self::ParentSuspend => "parentSuspend",
            Self::ParentResume => "parentResume",
            Self::Exit => "exit",
            Self::Resume => "resume",
            Self::Reactivate => "reactivate",
            Self::AsyncActivate => "asyncActivate",
            Self::Occur => "occur",
        }
    }

    /// State an instance lands in after this transition.
    pub fn target_state(&self) -> PlanItemInstanceState {
        use PlanItemInstanceState as S;
        match self {
            Self::Create => S::Available,
            Self::Start | Self::ManualStart | Self::Resume | Self::ParentResume => S::Active,
            Self::Reactivate | Self::AsyncActivate => S::Active,
            Self::Enable | Self::Reenable => S::Enabled,
            Self::Disable => S::Disabled,
            Self::Fault => S::Failed,
            Self::Complete | Self::Occur => S::Completed,
            Self::Suspend | Self::ParentSuspend => S::Suspended,
            Self::Terminate | Self::Exit => S::Terminated,
        }
    }
}

impl fmt::Display for PlanItemTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type TransitionTable = HashMap<Option<PlanItemInstanceState>, &'static [PlanItemTransition]>;

fn transition_table() -> &'static TransitionTable {
    static TABLE: OnceLock<TransitionTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        use PlanItemInstanceState as S;
        use PlanItemTransition as T;

        let mut table: TransitionTable = HashMap::new();
        table.insert(None, &[T::Create]);
        table.insert(Some(S::WaitingForRepetition), &[T::Create]);
        table.insert(
            Some(S::Available),
            &[T::Start, T::Enable, T::ParentSuspend, T::Exit],
        );
        table.insert(
            Some(S::Enabled),
            &[T::Disable, T::ManualStart, T::ParentSuspend, T::Exit],
        );
        table.insert(
            Some(S::Disabled),
            &[T::Reenable, T::ParentSuspend, T::Exit],
        );
        table.insert(
            Some(S::Active),
            &[
                T::Fault,
                T::Complete,
                T::Suspend,
                T::Terminate,
                T::ParentSuspend,
                T::Exit,
            ],
        );
        table.insert(Some(S::AsyncActive), &[T::AsyncActivate]);
        table.insert(Some(S::Failed), &[T::Reactivate, T::Exit]);
        table.insert(
            Some(S::Suspended),
            &[T::Resume, T::ParentResume, T::Exit],
        );
        table.insert(Some(S::Completed), &[]);
        table.insert(Some(S::Terminated), &[]);
        table
    })
}

/// Whether `transition` is legal from `current` (`None` for a not yet created instance).
///
/// # Errors
///
/// [`CoreError::UnknownPlanItemState`] when `current` has no row in the table.
pub fn is_possible(
    current: Option<PlanItemInstanceState>,
    transition: PlanItemTransition,
) -> Result<bool> {
    let allowed = transition_table()
        .get(&current)
        .ok_or_else(|| CoreError::UnknownPlanItemState {
            state: current.map(|s| s.as_str()).unwrap_or("none").to_string(),
        })?;
    Ok(allowed.contains(&transition))
}
