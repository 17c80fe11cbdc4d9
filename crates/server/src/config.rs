use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use legion::{SimConfig, Speed};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub seed: u64,
    /// Speed the sim starts at.
    pub speed: Speed,
    /// Write the world to the save file on the way out.
    pub save_on_exit: bool,
    pub poll_ms: u64,
    pub sim: SimConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: legion::DEFAULT_PORT,
            seed: 0,
            speed: Speed::Paused,
            save_on_exit: false,
            poll_ms: 100,
            sim: SimConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 4000
            speed = "fast"

            [sim]
            slow_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.speed, Speed::Fast);
        assert_eq!(config.sim.slow_ms, 250);
        assert_eq!(config.sim.fast_ms, SimConfig::default().fast_ms);
        assert_eq!(config.bind, "0.0.0.0");
    }
}
