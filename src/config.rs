use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::{PORTAL_BUS_NAME, PORTAL_OBJECT_PATH};
use crate::{Error, Result};

/// Environment variable pointing at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "XDG_PORTAL_CLIENT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "xdg-portal-client.toml";
pub const BUS_NAME_ENV: &str = "XDG_PORTAL_BUS_NAME";
pub const OBJECT_PATH_ENV: &str = "XDG_PORTAL_OBJECT_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Well-known name of the broker.
    pub bus_name: String,
    /// Object implementing the portal interfaces.
    pub object_path: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bus_name: PORTAL_BUS_NAME.to_string(),
            object_path: PORTAL_OBJECT_PATH.to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl PortalConfig {
    /// Defaults, then the config file, then environment overrides.
    pub fn load() -> Self {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content).unwrap_or_else(|err| {
                warn!(path = %path, "Falling back to default config: {err}");
                Self::default()
            }),
            Err(_) => Self::default(),
        };

        if let Ok(bus_name) = std::env::var(BUS_NAME_ENV) {
            config.bus_name = bus_name;
        }
        if let Ok(object_path) = std::env::var(OBJECT_PATH_ENV) {
            config.object_path = object_path;
        }

        config
    }

    /// Parses a TOML document on top of the defaults. Missing keys keep their
    /// default value.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let overrides = content
            .parse::<toml::Value>()
            .map_err(|err| Error::Config(err.to_string()))?;

        let mut merged = toml::Value::try_from(Self::default())
            .map_err(|err| Error::Config(err.to_string()))?;
        merge_value(&mut merged, overrides);

        merged
            .try_into()
            .map_err(|err: toml::de::Error| Error::Config(err.to_string()))
    }
}

fn merge_value(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
