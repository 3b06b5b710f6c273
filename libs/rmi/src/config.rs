//! Server configuration
//!
//! ```toml
//! [server]
//! name = "workspace"
//! log_arguments = false
//!
//! [actions]
//! echo = "value"
//!
//! [actions.open]
//! read = "string"
//! close = "void"
//! ```

use rmi_codec::validate_action_name;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::action::{ActionMap, ResponseShape};
use crate::{Result, ServerError};

/// Complete server configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    /// Root action map exposed to every connection
    #[serde(default)]
    pub actions: ActionMap,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Name used in logs
    pub name: String,

    /// Include argument and reply values in call traces
    pub log_arguments: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "rmi-server".to_string(),
            log_arguments: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServerError::config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ServerError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every declared action name, nested maps included
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() {
            return Err(ServerError::config("server.name must not be empty"));
        }

        if self.actions.is_empty() {
            return Err(ServerError::config("at least one root action must be declared"));
        }

        validate_actions(&self.actions)
    }
}

fn validate_actions(actions: &ActionMap) -> Result<()> {
    for (name, shape) in actions.iter() {
        validate_action_name(name)?;
        if let ResponseShape::Instance(nested) = shape {
            validate_actions(nested)?;
        }
    }
    Ok(())
}
