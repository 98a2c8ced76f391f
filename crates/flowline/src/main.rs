// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flowline - asynchronous conversational message pipeline.
//!
//! This is the binary entry point for the Flowline pipeline.

use clap::{Parser, Subcommand};

mod flows;
mod serve;
mod shutdown;

/// Flowline - asynchronous conversational message pipeline.
#[derive(Parser, Debug)]
#[command(name = "flowline", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the pipeline workers.
    Serve,
    /// Manage flow definitions.
    Flow {
        #[command(subcommand)]
        command: flows::FlowCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match flowline_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            flowline_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Flow { command }) => flows::run_flow(config, command).await,
        None => {
            println!("flowline: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn binary_loads_config_defaults() {
        let config = flowline_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.engine.group, "engine");
        assert!(config.delivery.fake_mode);
    }
}
