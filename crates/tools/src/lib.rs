//! Built-in skills for Concierge.
//!
//! Skills give the assistant the ability to act on the world: check the
//! weather, search the web, and keep reminders. Each skill is a
//! [`FunctionDefinition`] paired with a [`FunctionHandler`] and registered
//! in the [`FunctionRegistry`] at startup.

pub mod reminder;
pub mod scheduler;
pub mod weather;
pub mod web_search;

use concierge_config::AppConfig;
use concierge_core::error::RegistryError;
use concierge_core::function::FunctionHandler;
use concierge_core::registry::FunctionRegistry;
use concierge_core::schema::FunctionDefinition;
use std::sync::Arc;

pub use reminder::{CreateReminderFunction, ListRemindersFunction, Reminder, ReminderStore};
pub use scheduler::ReminderScheduler;
pub use weather::WeatherFunction;
pub use web_search::WebSearchFunction;

/// Create a registry with every built-in skill, in a fixed order.
///
/// `store` is shared with the [`ReminderScheduler`] so created reminders
/// get announced.
pub fn default_registry(
    config: &AppConfig,
    store: ReminderStore,
) -> Result<FunctionRegistry, RegistryError> {
    let skills: Vec<(FunctionDefinition, Arc<dyn FunctionHandler>)> = vec![
        (
            WeatherFunction::definition(),
            Arc::new(WeatherFunction::new(&config.weather)),
        ),
        (
            WebSearchFunction::definition(),
            Arc::new(WebSearchFunction::new(&config.search)),
        ),
        (
            CreateReminderFunction::definition(),
            Arc::new(CreateReminderFunction::new(store.clone())),
        ),
        (
            ListRemindersFunction::definition(),
            Arc::new(ListRemindersFunction::new(store)),
        ),
    ];

    let mut registry = FunctionRegistry::new();
    for (definition, handler) in skills {
        registry.register(definition, handler)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_skills_in_order() {
        let registry = default_registry(&AppConfig::default(), ReminderStore::new()).unwrap();
        assert_eq!(
            registry.names(),
            ["get_weather", "search_google", "create_reminder", "list_reminders"]
        );
    }

    #[test]
    fn every_definition_renders_a_tool_schema() {
        let registry = default_registry(&AppConfig::default(), ReminderStore::new()).unwrap();
        for def in registry.list_definitions() {
            let schema = def.to_tool_schema();
            assert_eq!(schema["parameters"]["type"], "object");
            let parsed = FunctionDefinition::from_tool_schema(&schema).unwrap();
            assert_eq!(parsed.name, def.name);
        }
    }
}
