//! APIBrick CLI entry point.
//!
//! Binary name: `apibrick`
//!
//! Parses CLI arguments, sets up tracing, loads settings from the APIBrick
//! home directory, then dispatches to the command handler.

mod cli;
mod state;

use std::process::ExitCode;

use apibrick_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let options = TracingOptions::new(cli.log_filter())
        .format(if cli.log_json { LogFormat::Json } else { LogFormat::Pretty })
        .otel(cli.otel);
    if let Err(e) = init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let state = AppState::init().await?;

    let outcome = match cli.command {
        Commands::Run {
            flow,
            tenant,
            env,
            params,
            params_json,
        } => {
            let params = cli::build_map(params_json.as_deref(), &params)?;
            let request = cli::run::RunRequest { tenant, env, params };
            cli::run::handle_run(&flow, request, &state, cli.json).await
        }
        Commands::Validate { flow } => cli::run::handle_validate(&flow, &state, cli.json).await,
        Commands::Steps => cli::steps::list_steps(&state, cli.json).map(|()| true),
        Commands::DataSource { action } => {
            cli::datasource::handle_datasource_command(action, &state, cli.json).await
        }
    };

    state.shutdown().await;
    shutdown_tracing();

    Ok(if outcome? { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
