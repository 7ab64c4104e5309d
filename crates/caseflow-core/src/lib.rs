// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caseflow Core - CMMN Case Runtime State Engine
//!
//! This crate drives CMMN case instances through their plan item lifecycle
//! and reshapes running cases in place: plan items can be moved between
//! stages, activated, flipped back to available or terminated, while the
//! stage hierarchy, task records and case variables stay consistent.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 CaseRuntimeService (service)                  │
//! │      deploy / start / change_state / read accessors           │
//! └───────────────────────────────────────────────────────────────┘
//!          │ load snapshot                       ▲ commit change set
//!          ▼                                     │
//! ┌────────────────────────────┐     ┌───────────────────────────┐
//! │ CaseUnitOfWork             │────▶│ Persistence (SQLite)      │
//! │ in-memory instance tree    │     │ one transaction, revision │
//! │ + Agenda outbox            │     │ checked                   │
//! └────────────────────────────┘     └───────────────────────────┘
//!          ▲
//!          │ mutates
//! ┌────────────────────────────┐
//! │ change_state executor      │
//! │ planner → hierarchy → run  │
//! └────────────────────────────┘
//! ```
//!
//! # Plan Item State Machine
//!
//! | From | Transitions |
//! |------|-------------|
//! | none / `wait_repetition` | create |
//! | `available` | start, enable, parentSuspend, exit |
//! | `enabled` | disable, manualStart, parentSuspend, exit |
//! | `disabled` | reenable, parentSuspend, exit |
//! | `active` | fault, complete, suspend, terminate, parentSuspend, exit |
//! | `async-active` | asyncActivate |
//! | `failed` | reactivate, exit |
//! | `suspended` | resume, parentResume, exit |
//!
//! `completed` and `terminated` are final. See [`state`].
//!
//! # Change-State Atomicity
//!
//! Every change-state request runs against a [`unit_of_work::CaseUnitOfWork`]
//! built from one snapshot. Nothing reaches storage until all phases have
//! succeeded; the resulting change set and the agenda operations are then
//! written in a single transaction guarded by the case revision.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CASEFLOW_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `CASEFLOW_DB_MAX_CONNECTIONS` | No | `5` | Pool size |
//! | `CASEFLOW_RUN_MIGRATIONS` | No | `true` | Apply migrations on connect |

/// Scheduling agenda: operations planned for the lifecycle executor.
pub mod agenda;

/// Dynamic state migration of running case instances.
pub mod change_state;

/// Time source.
pub mod clock;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Runtime records and the persistence backend.
pub mod persistence;

/// Service facade.
pub mod service;

/// Plan item lifecycle states and transitions.
pub mod state;

/// In-memory view of one case instance.
pub mod unit_of_work;

pub use agenda::{Agenda, AgendaOperation};
pub use change_state::{
    ChangePlanItemStateBuilder, ChangePlanItemStateRequest, ChangeStateOutcome,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{CoreError, Result};
pub use persistence::{Persistence, SqlitePersistence};
pub use service::{CaseRuntimeService, StartCaseInstanceRequest};
pub use state::{PlanItemInstanceState, PlanItemTransition};
