use anyhow::Result;
use config::{Config, Environment, File};
use dbkit::config::{DatabaseConfig, FailoverConfig, ObservabilityConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverProbeConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub statement: String,
    pub interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            statement: "SELECT now() FROM system.local".to_string(),
            interval_secs: 5,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

pub fn load_config(path: &str) -> Result<FailoverProbeConfig> {
    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix("FAILOVER_PROBE").separator("__"))
        .build()?;

    let config: FailoverProbeConfig = config.try_deserialize()?;
    config.failover.validate()?;
    Ok(config)
}
