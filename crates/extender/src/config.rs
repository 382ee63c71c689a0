//! Extender configuration

use anyhow::{Context, Result};
use sched_lib::{FrontEnd, SchedulerTunables};
use serde::Deserialize;

/// Extender server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtenderConfig {
    /// Port serving the extender protocol, health and metrics
    #[serde(default = "default_port")]
    pub port: u16,

    /// Scheduling tunables, loaded from `MULTIRESOURCE_*`
    #[serde(skip, default = "default_tunables")]
    pub tunables: SchedulerTunables,
}

fn default_port() -> u16 {
    8888
}

fn default_tunables() -> SchedulerTunables {
    SchedulerTunables::defaults_for(FrontEnd::Extender)
}

impl ExtenderConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::load_from(config::Environment::with_prefix("EXTENDER"))
    }

    pub fn load_from(env: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to read extender settings")?;

        let mut config: ExtenderConfig = settings
            .try_deserialize()
            .context("invalid extender settings")?;
        config.tunables = SchedulerTunables::load(FrontEnd::Extender)
            .context("invalid MULTIRESOURCE_* settings")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("EXTENDER").source(Some(map))
    }

    #[test]
    fn test_default_port() {
        let config = ExtenderConfig::load_from(env(&[])).unwrap();
        assert_eq!(config.port, 8888);
    }

    #[test]
    fn test_port_override() {
        let config = ExtenderConfig::load_from(env(&[("EXTENDER_PORT", "9443")])).unwrap();
        assert_eq!(config.port, 9443);
    }
}
