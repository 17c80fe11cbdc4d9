use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use legion::{ClientOptions, Credentials, SimConfig};

/// Credentials as written to the config file. Tokens use the full 64 bits,
/// which toml integers can't hold, so they are kept as hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCredentials {
    pub server: String,
    pub id: u64,
    pub private: String,
}

impl From<Credentials> for SavedCredentials {
    fn from(creds: Credentials) -> Self {
        Self {
            server: format!("{:016x}", creds.server),
            id: creds.id,
            private: format!("{:016x}", creds.private),
        }
    }
}

impl TryFrom<&SavedCredentials> for Credentials {
    type Error = std::num::ParseIntError;

    fn try_from(saved: &SavedCredentials) -> Result<Self, Self::Error> {
        Ok(Credentials {
            server: u64::from_str_radix(&saved.server, 16)?,
            id: saved.id,
            private: u64::from_str_radix(&saved.private, 16)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    pub name: String,
    pub backoff_ms: u64,
    pub poll_ms: u64,
    /// Seed for the in-process sim of `--local`.
    pub seed: u64,
    pub credentials: Option<SavedCredentials>,
    pub sim: SimConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", legion::DEFAULT_PORT),
            name: String::new(),
            backoff_ms: 1000,
            poll_ms: 100,
            seed: 0,
            credentials: None,
            sim: SimConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }

    pub fn credentials(&self) -> Option<Credentials> {
        let saved = self.credentials.as_ref()?;
        match Credentials::try_from(saved) {
            Ok(creds) => Some(creds),
            Err(err) => {
                log::warn!("ignoring malformed credentials: {err}");
                None
            }
        }
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            addr: self.server.clone(),
            backoff_unit: Duration::from_millis(self.backoff_ms),
            poll: Duration::from_millis(self.poll_ms.max(1)),
            state_ring_size: self.sim.state_ring_size,
            cmd_ring_size: self.sim.cmd_ring_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_survive_the_file() {
        let creds = Credentials {
            server: u64::MAX - 3,
            id: 7,
            private: 0x8000_0000_0000_0001,
        };
        let config = ClientConfig {
            name: "ada".to_string(),
            credentials: Some(creds.into()),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.credentials(), Some(creds));
        assert_eq!(back.name, "ada");
    }
}
