use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use super::{ConfigError, ConfigResult};
use crate::mcp::{Backends, Connector, StdioConnector, StreamableConnector};

/// Top-level configuration, compatible with VS Code's `mcp.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Backend MCP servers keyed by backend name
    #[serde(default, deserialize_with = "skip_invalid_servers")]
    pub servers: BTreeMap<String, BackendConfig>,
}

/// Deserialize each server on its own; one that does not parse (typically an
/// unsupported `type`) is logged and left out instead of failing the file.
fn skip_invalid_servers<'de, D>(deserializer: D) -> Result<BTreeMap<String, BackendConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    let mut servers = BTreeMap::new();
    for (name, value) in raw {
        match serde_json::from_value::<BackendConfig>(value) {
            Ok(server) => {
                servers.insert(name, server);
            }
            Err(e) => {
                warn!(server = %name, "Skipping server with invalid configuration: {}", e);
            }
        }
    }
    Ok(servers)
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    #[serde(alias = "streamable")]
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Stdio { command, args, env } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .finish(),
            BackendConfig::Http {
                url,
                headers,
                token,
            } => f
                .debug_struct("Http")
                .field("url", url)
                .field("headers", &headers.keys().collect::<Vec<_>>())
                .field("token", &token.as_ref().map(|_| "****"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.display().to_string(),
            }),
        }
    }
}

impl ProxyConfig {
    /// Parse configuration text in the given format and validate it.
    pub fn parse(content: &str, format: ConfigFormat, origin: &str) -> ConfigResult<Self> {
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?,
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, choosing the format by extension.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, format, &path.display().to_string())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (name, server) in &self.servers {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    server: name.clone(),
                    field: "name".to_string(),
                    reason: "backend name must not be empty".to_string(),
                });
            }
            match server {
                BackendConfig::Stdio { command, .. } if command.trim().is_empty() => {
                    return Err(ConfigError::InvalidValue {
                        server: name.clone(),
                        field: "command".to_string(),
                        reason: "command must not be empty".to_string(),
                    });
                }
                BackendConfig::Http { url, .. } => {
                    reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                        server: name.clone(),
                        field: "url".to_string(),
                        reason: e.to_string(),
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Build one connector per configured backend.
    pub fn backends(&self) -> Backends {
        let map: BTreeMap<String, Arc<dyn Connector>> = self
            .servers
            .iter()
            .map(|(name, server)| (name.clone(), server.connector()))
            .collect();
        Arc::new(map)
    }
}

impl BackendConfig {
    pub fn connector(&self) -> Arc<dyn Connector> {
        match self {
            BackendConfig::Stdio { command, args, env } => Arc::new(StdioConnector {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
            }),
            BackendConfig::Http {
                url,
                headers,
                token,
            } => Arc::new(StreamableConnector {
                url: url.clone(),
                headers: headers.clone(),
                token: token.clone(),
            }),
        }
    }
}
