//! `concierge functions`: Print the schemas sent to the model.

use concierge_config::AppConfig;
use concierge_tools::{ReminderStore, default_registry};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = default_registry(&config, ReminderStore::new())?;

    let schemas: Vec<serde_json::Value> = registry
        .list_definitions()
        .iter()
        .map(|def| def.to_tool_schema())
        .collect();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
