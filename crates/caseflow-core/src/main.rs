// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caseflow command line.
//!
//! Usage:
//!   caseflow migrate
//!   caseflow deploy <model.json>
//!   caseflow start <definition-id> [--name <name>] [--variables <json>]
//!   caseflow change-state <request.json>
//!   caseflow show <case-instance-id>
//!   caseflow show-plan-item <plan-item-instance-id>
//!
//! The database is taken from `CASEFLOW_DATABASE_URL` (a `.env` file is read
//! when present). Results are printed to stdout as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing::{error, info};

use caseflow_core::config::Config;
use caseflow_core::migrations;
use caseflow_core::{
    CaseRuntimeService, ChangePlanItemStateRequest, SqlitePersistence, StartCaseInstanceRequest,
};

#[derive(Parser, Debug)]
#[command(name = "caseflow", version, about = "CMMN case runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Deploy a case definition from a JSON file
    Deploy {
        /// Path to the case definition document
        model: PathBuf,
    },

    /// Start a case instance of a deployed definition
    Start {
        /// Case definition id
        case_definition_id: String,

        /// Case instance name
        #[arg(long)]
        name: Option<String>,

        /// Initial case variables as a JSON object
        #[arg(long)]
        variables: Option<String>,
    },

    /// Apply a change-state request from a JSON file
    ChangeState {
        /// Path to the request document
        request: PathBuf,
    },

    /// Print a case instance with its plan items and tasks
    Show {
        /// Case instance id
        case_instance_id: String,
    },

    /// Print one plan item instance with its task records
    ShowPlanItem {
        /// Plan item instance id
        plan_item_instance_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("caseflow_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let persistence = Arc::new(SqlitePersistence::from_config(&config).await?);

    match cli.command {
        Command::Migrate => {
            migrations::run_sqlite(persistence.pool()).await?;
            info!("Migrations completed");
        }
        Command::Deploy { model } => {
            let text = std::fs::read_to_string(&model)
                .with_context(|| format!("reading {}", model.display()))?;
            let definition = caseflow_model::parse_case_definition(&serde_json::from_str(&text)?)?;
            let service = CaseRuntimeService::new(persistence);
            let case_model = service.deploy_case_definition(&definition).await?;
            print_json(&json!({
                "caseDefinitionId": case_model.definition_id(),
                "planItems": case_model.len(),
            }))?;
        }
        Command::Start {
            case_definition_id,
            name,
            variables,
        } => {
            let variables = match variables {
                Some(raw) => parse_variables(&raw)?,
                None => Map::new(),
            };
            let service = CaseRuntimeService::new(persistence);
            let case_instance = service
                .start_case_instance(&StartCaseInstanceRequest {
                    case_definition_id,
                    name,
                    variables,
                    ..Default::default()
                })
                .await?;
            print_json(&json!({
                "caseInstanceId": case_instance.id,
                "planModelInstanceId": case_instance.plan_model_instance_id,
            }))?;
        }
        Command::ChangeState { request } => {
            let text = std::fs::read_to_string(&request)
                .with_context(|| format!("reading {}", request.display()))?;
            let request: ChangePlanItemStateRequest = serde_json::from_str(&text)?;
            let service = CaseRuntimeService::new(persistence);
            let outcome = service.change_state(&request).await?;
            print_json(&serde_json::to_value(&outcome)?)?;
        }
        Command::Show { case_instance_id } => {
            let service = CaseRuntimeService::new(persistence);
            let case_instance = service.get_case_instance(&case_instance_id).await?;
            let plan_items = service.get_plan_item_instances(&case_instance_id).await?;
            let tasks = service.get_tasks(&case_instance_id).await?;

            let plan_items: Vec<Value> = plan_items
                .iter()
                .map(|pi| {
                    json!({
                        "id": pi.id,
                        "elementId": pi.element_id,
                        "definitionId": pi.plan_item_definition_id,
                        "state": pi.state.as_str(),
                        "stageInstanceId": pi.stage_instance_id,
                    })
                })
                .collect();
            let tasks: Vec<Value> = tasks
                .iter()
                .map(|t| {
                    json!({
                        "id": t.id,
                        "planItemInstanceId": t.plan_item_instance_id,
                        "assignee": t.assignee,
                        "deleteReason": t.delete_reason,
                    })
                })
                .collect();

            print_json(&json!({
                "caseInstanceId": case_instance.id,
                "state": case_instance.state,
                "variables": case_instance.variables,
                "planItems": plan_items,
                "tasks": tasks,
            }))?;
        }
        Command::ShowPlanItem {
            plan_item_instance_id,
        } => {
            let service = CaseRuntimeService::new(persistence);
            let plan_item = service.get_plan_item_instance(&plan_item_instance_id).await?;
            let tasks = service
                .get_tasks_for_plan_item_instance(&plan_item_instance_id)
                .await?;
            print_json(&json!({
                "planItemInstance": plan_item,
                "tasks": tasks,
            }))?;
        }
    }

    Ok(())
}

fn parse_variables(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("parsing --variables")? {
        Value::Object(map) => Ok(map),
        _ => bail!("--variables must be a JSON object"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
