//! `apibrick datasource`: data source utilities.

use anyhow::{Context, Result};
use apibrick_types::datasource::DataSourceType;
use clap::Subcommand;
use console::style;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum DataSourceCommand {
    /// Probe connectivity with a throwaway instance.
    Test {
        /// Backend type: MYSQL, SQLITE or MONGODB.
        #[arg(long = "type", value_name = "TYPE")]
        ds_type: String,

        /// Connection setting as key=value. Repeatable.
        #[arg(short, long = "config", value_name = "KEY=VALUE")]
        config: Vec<String>,

        /// Connection settings as a JSON object, merged under --config.
        #[arg(long, value_name = "JSON")]
        config_json: Option<String>,

        /// Tenant the probe runs as.
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Show data sources declared in config.toml.
    List,
}

/// Returns whether the command succeeded.
pub async fn handle_datasource_command(cmd: DataSourceCommand, state: &AppState, json: bool) -> Result<bool> {
    match cmd {
        DataSourceCommand::Test {
            ds_type,
            config,
            config_json,
            tenant,
        } => handle_test(&ds_type, &config, config_json.as_deref(), tenant, state, json).await,
        DataSourceCommand::List => {
            handle_list(state, json)?;
            Ok(true)
        }
    }
}

async fn handle_test(
    ds_type: &str,
    pairs: &[String],
    config_json: Option<&str>,
    tenant: Option<String>,
    state: &AppState,
    json: bool,
) -> Result<bool> {
    let ds_type: DataSourceType = ds_type.parse().context("Invalid --type")?;
    let config = super::build_map(config_json, pairs).context("Invalid data source config")?;
    let tenant = tenant.unwrap_or_else(|| state.settings.tenant.default_tenant.clone());

    let reachable = state
        .datasources
        .test_connection(ds_type, &config, &tenant, &state.settings.tenant.default_env)
        .await;

    if json {
        let out = serde_json::json!({
            "type": ds_type.as_str(),
            "tenant": tenant,
            "reachable": reachable,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if reachable {
        println!("  {} {} data source is reachable", style("*").green().bold(), ds_type);
    } else {
        println!(
            "  {} {} data source is not reachable (run with -v for details)",
            style("x").red().bold(),
            ds_type
        );
    }
    Ok(reachable)
}

fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let declared = &state.settings.datasources;
    if json {
        let out: Vec<_> = declared
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "type": d.ds_type.as_str(),
                    "tenant": d.tenant,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if declared.is_empty() {
        println!(
            "  No data sources declared in {}",
            style(state.home_dir.join("config.toml").display()).dim()
        );
        return Ok(());
    }

    let mut table = comfy_table::Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .set_header(vec!["ID", "Type", "Tenant"]);
    for d in declared {
        table.add_row(vec![
            d.id.clone(),
            d.ds_type.to_string(),
            d.tenant.clone().unwrap_or_else(|| "(all)".into()),
        ]);
    }
    println!("{table}");
    Ok(())
}
