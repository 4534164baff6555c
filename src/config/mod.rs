use crate::utils::error::{Result, SocklinkError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_method")]
    pub method: String, // "none", "userpass"
    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
}

/// Handshake and relay deadlines. Absent means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub handshake_secs: Option<u64>,
    #[serde(default)]
    pub idle_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    1080
}

fn default_auth_method() -> String {
    "none".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: default_auth_method(),
            users: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SocklinkError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SocklinkError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// `host:port` the listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.auth.method.as_str(), "none" | "userpass") {
            return Err(SocklinkError::Config(format!(
                "Invalid auth method: {}. Must be 'none' or 'userpass'",
                self.auth.method
            )));
        }

        if self.auth.method == "userpass" && self.auth.users.is_empty() {
            return Err(SocklinkError::Config(
                "userpass auth requires at least one user".to_string(),
            ));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[server]
bind_address = "127.0.0.1"
bind_port = 1080

[auth]
method = "none"  # Options: "none", "userpass"

# For userpass authentication, add users:
# [[auth.users]]
# username = "alice"
# password = "secret123"

[timeouts]
# Absent values leave the handshake and relay unbounded.
# handshake_secs = 30
# idle_secs = 300

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
"#;

        std::fs::write(path.as_ref(), example)
            .map_err(|e| SocklinkError::Config(format!("Failed to write example config: {}", e)))?;

        Ok(())
    }
}
