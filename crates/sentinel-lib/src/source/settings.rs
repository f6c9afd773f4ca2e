//! Database connection settings

use serde::{Deserialize, Serialize};

/// Connection settings for the InfluxDB HTTP API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbSettings {
    /// Hostname, IP, or a full `http(s)://host:port` URL
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// InfluxDB 2.x compatibility token; takes precedence over username/password
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default)]
    pub verify_ssl: bool,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_database() -> String {
    "icinga2".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            token: None,
            ssl: false,
            verify_ssl: false,
            database: default_database(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DbSettings {
    /// Same server, different database
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Settings rendering safe for logs
    pub fn redacted(&self) -> String {
        format!(
            "{}:{} database={} user={} ssl={}",
            self.host,
            self.port,
            self.database,
            self.username.as_deref().unwrap_or("-"),
            self.ssl
        )
    }
}
