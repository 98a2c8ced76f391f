// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `flowline flow` command implementation.
//!
//! Registers flow definitions and controls which one is live per org.
//! Activation is exclusive within an org, so switching flows never leaves
//! two definitions racing for the same inbound traffic.

use clap::Subcommand;

use flowline_config::model::FlowlineConfig;
use flowline_core::FlowlineError;
use flowline_storage::Database;
use flowline_storage::queries::flows;

#[derive(Subcommand, Debug)]
pub enum FlowCommands {
    /// Register a flow definition from a JSON file.
    Add {
        /// Org the flow belongs to.
        #[arg(long)]
        org: String,
        /// Human-readable flow name.
        #[arg(long)]
        name: String,
        /// Path to the JSON definition.
        #[arg(long)]
        file: String,
        /// Activate the flow immediately after registering it.
        #[arg(long)]
        activate: bool,
    },
    /// Make a registered flow the active one for its org.
    Activate {
        /// Org the flow belongs to.
        #[arg(long)]
        org: String,
        /// Flow id returned by `flow add`.
        #[arg(long)]
        id: String,
    },
}

pub async fn run_flow(config: FlowlineConfig, command: FlowCommands) -> Result<(), FlowlineError> {
    let db = Database::open(&config.storage.database_path).await?;
    match command {
        FlowCommands::Add {
            org,
            name,
            file,
            activate,
        } => {
            let definition = std::fs::read_to_string(&file)
                .map_err(|e| FlowlineError::Config(format!("cannot read {file}: {e}")))?;
            // Parse up front so a typo fails here, not at message time.
            serde_json::from_str::<serde_json::Value>(&definition)
                .map_err(|e| FlowlineError::Config(format!("{file} is not valid JSON: {e}")))?;
            let id = flows::insert_flow(&db, &org, &name, &definition).await?;
            if activate {
                flows::activate_flow(&db, &org, &id).await?;
                println!("flow {id} registered and activated for org {org}");
            } else {
                println!("flow {id} registered for org {org} (inactive)");
            }
        }
        FlowCommands::Activate { org, id } => {
            flows::activate_flow(&db, &org, &id).await?;
            println!("flow {id} is now active for org {org}");
        }
    }
    Ok(())
}
