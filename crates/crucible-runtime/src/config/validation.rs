//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{CrucibleConfig, EventBusType};

/// Validates a loaded configuration before it reaches the runtime.
pub fn validate_config(config: &CrucibleConfig) -> ConfigResult<()> {
    if config.event_bus.subscription_capacity == 0 {
        return Err(ConfigError::validation(
            "event_bus.subscription_capacity must be greater than 0",
        ));
    }

    if config.event_bus.kind == EventBusType::Broker {
        let broker = &config.event_bus.broker;
        if broker.bootstrap.is_empty() {
            return Err(ConfigError::missing_field("event_bus.broker.bootstrap"));
        }
        if broker.consumer_group.is_empty() {
            return Err(ConfigError::missing_field("event_bus.broker.consumer_group"));
        }
        if broker.default_topic.is_empty() {
            return Err(ConfigError::missing_field("event_bus.broker.default_topic"));
        }
    }

    if config.health.enabled && config.health.monitoring_interval_ms == 0 {
        return Err(ConfigError::validation(
            "health.monitoring_interval_ms must be greater than 0",
        ));
    }

    if config.lifecycle.hook_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "lifecycle.hook_timeout_ms must be greater than 0",
        ));
    }

    if config.hot_deployment.enabled && config.hot_deployment.polling_interval_ms == 0 {
        return Err(ConfigError::validation(
            "hot_deployment.polling_interval_ms must be greater than 0",
        ));
    }

    if let Some(percent) = config.resources.max_cpu_percent
        && percent > 100
    {
        return Err(ConfigError::validation(
            "resources.max_cpu_percent must be at most 100",
        ));
    }

    Ok(())
}
