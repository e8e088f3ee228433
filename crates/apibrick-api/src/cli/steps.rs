//! `apibrick steps`: list registered step types.

use anyhow::Result;
use comfy_table::{Cell, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub fn list_steps(state: &AppState, json: bool) -> Result<()> {
    let mut types = state.registry.step_types();
    types.sort();

    if json {
        println!("{}", serde_json::to_string_pretty(&types)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Step type"]);
    for step_type in &types {
        table.add_row(vec![Cell::new(step_type)]);
    }

    println!();
    println!("{table}");
    println!("  {} step types registered", style(types.len()).bold());
    println!();
    Ok(())
}
