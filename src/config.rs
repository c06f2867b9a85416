//! Commissioner configuration stored as json.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionerConfig {
    #[serde(rename = "discovery_timeout_ms", with = "millis")]
    pub discovery_timeout: Duration,
    #[serde(rename = "commissioning_timeout_ms", with = "millis")]
    pub commissioning_timeout: Duration,
    /// Wait for single UDP datagram.
    #[serde(rename = "receive_timeout_ms", with = "millis")]
    pub receive_timeout: Duration,
    pub local_address: String,
    pub auto_ack: bool,
    pub enable_ble: bool,
    pub enable_mdns: bool,
}

impl Default for CommissionerConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(5),
            commissioning_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(3),
            local_address: "0.0.0.0:0".to_owned(),
            auto_ack: true,
            enable_ble: true,
            enable_mdns: true,
        }
    }
}

impl CommissionerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout.is_zero() {
            anyhow::bail!("discovery_timeout must be non zero");
        }
        if self.commissioning_timeout.is_zero() {
            anyhow::bail!("commissioning_timeout must be non zero");
        }
        if self.receive_timeout.is_zero() {
            anyhow::bail!("receive_timeout must be non zero");
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<CommissionerConfig> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).context(format!("reading config from {}", path.display()))?;
    let config: CommissionerConfig =
        serde_json::from_str(&data).context(format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: impl AsRef<Path>, config: &CommissionerConfig) -> Result<()> {
    let path = path.as_ref();
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data).context(format!("writing config to {}", path.display()))
}
