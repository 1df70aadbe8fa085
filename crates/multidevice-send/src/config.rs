use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Upper bound on concurrent per-device encryptions
    pub max_workers: usize,

    /// Refuse to transmit when devices were resolved but none could be
    /// encrypted for
    pub fail_on_empty_fanout: bool,

    /// `type` attribute of outbound message nodes
    pub message_type: String,

    /// `v` attribute of ciphertext entries
    pub protocol_version: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            fail_on_empty_fanout: true,
            message_type: "text".to_string(),
            protocol_version: "2".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Load config from a JSON file, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: DispatchConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("maxWorkers must be at least 1".to_string()));
        }
        if self.message_type.is_empty() {
            return Err(Error::Config("messageType must not be empty".to_string()));
        }
        if self.protocol_version.is_empty() {
            return Err(Error::Config("protocolVersion must not be empty".to_string()));
        }
        Ok(())
    }
}
