//! `SSH_MCP_*` environment variables, overlaid by an optional `--config` TOML
//! file. Mirrors the source's `ServerConfig`: a flat struct, no secrets
//! management, env wins unless a file value is explicitly set.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_connections: usize,
    pub health_check_interval_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_secs: f64,
    pub debug: bool,
    pub log_level: String,
    pub server_name: String,
    pub allowed_auth_methods: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            health_check_interval_secs: 60,
            reconnect_attempts: 3,
            reconnect_delay_secs: 5.0,
            debug: false,
            log_level: "info".to_string(),
            server_name: "sshmux-mcp-server".to_string(),
            allowed_auth_methods: vec!["key".into(), "password".into(), "agent".into()],
        }
    }
}

impl ServerConfig {
    /// Reads `SSH_MCP_*` variables over the defaults. Malformed numeric or
    /// boolean values are ignored, leaving the default in place, rather than
    /// failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SSH_MCP_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                config.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("SSH_MCP_HEALTH_CHECK_INTERVAL") {
            if let Ok(n) = v.parse() {
                config.health_check_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SSH_MCP_RECONNECT_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                config.reconnect_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("SSH_MCP_RECONNECT_DELAY") {
            if let Ok(n) = v.parse() {
                config.reconnect_delay_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SSH_MCP_DEBUG") {
            config.debug = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(v) = std::env::var("SSH_MCP_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("SSH_MCP_SERVER_NAME") {
            config.server_name = v;
        }
        if let Ok(v) = std::env::var("SSH_MCP_ALLOWED_AUTH_METHODS") {
            config.allowed_auth_methods = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        config
    }

    /// Overlays values from a TOML file on top of `self`. Any field absent
    /// from the file is left untouched.
    pub fn merge_toml_file(mut self, path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
        let overlay: TomlOverlay = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config file '{path}': {e}"))?;

        if let Some(v) = overlay.max_connections {
            self.max_connections = v;
        }
        if let Some(v) = overlay.health_check_interval_secs {
            self.health_check_interval_secs = v;
        }
        if let Some(v) = overlay.reconnect_attempts {
            self.reconnect_attempts = v;
        }
        if let Some(v) = overlay.reconnect_delay_secs {
            self.reconnect_delay_secs = v;
        }
        if let Some(v) = overlay.debug {
            self.debug = v;
        }
        if let Some(v) = overlay.log_level {
            self.log_level = v;
        }
        if let Some(v) = overlay.server_name {
            self.server_name = v;
        }
        if let Some(v) = overlay.allowed_auth_methods {
            self.allowed_auth_methods = v;
        }

        Ok(self)
    }
}

/// Every field optional: a TOML file only needs to mention what it overrides.
#[derive(Debug, Default, Deserialize)]
struct TomlOverlay {
    max_connections: Option<usize>,
    health_check_interval_secs: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_secs: Option<f64>,
    debug: Option<bool>,
    log_level: Option<String>,
    server_name: Option<String>,
    allowed_auth_methods: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.health_check_interval_secs, 60);
        assert_eq!(config.server_name, "sshmux-mcp-server");
    }

    #[test]
    fn merge_toml_file_only_overrides_present_keys() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("sshmux-mcp-server-test-{}.toml", std::process::id()));
        std::fs::write(&path, "max_connections = 25\n").unwrap();

        let config = ServerConfig::default()
            .merge_toml_file(path.to_str().unwrap())
            .unwrap();
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.server_name, "sshmux-mcp-server");

        let _ = std::fs::remove_file(&path);
    }
}
