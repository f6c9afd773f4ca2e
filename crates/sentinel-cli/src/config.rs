//! Database settings loading
//!
//! Precedence, lowest first: built-in defaults, the `--db-settings` file,
//! `SENTINEL_DB_*` environment variables, explicit command-line flags.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use sentinel_lib::source::DbSettings;

/// Environment variable prefix for database settings
pub const ENV_PREFIX: &str = "SENTINEL_DB";

/// Connection flags shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct DbArgs {
    /// Settings file (JSON or TOML, picked by extension)
    #[arg(long)]
    pub db_settings: Option<PathBuf>,

    /// Hostname, IP or full URL of the InfluxDB server
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// API token, used instead of username/password
    #[arg(long)]
    pub token: Option<String>,

    /// Connect over HTTPS
    #[arg(long)]
    pub ssl: bool,

    /// Verify the server certificate when using HTTPS
    #[arg(long)]
    pub verify_ssl: bool,

    /// HTTP timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl DbArgs {
    pub fn load(&self) -> Result<DbSettings> {
        self.load_with_env(None)
    }

    /// `env` replaces the process environment when given
    pub fn load_with_env(&self, env: Option<HashMap<String, String>>) -> Result<DbSettings> {
        let defaults = DbSettings::default();

        let mut builder = config::Config::builder()
            .set_default("host", defaults.host)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("ssl", defaults.ssl)?
            .set_default("verify_ssl", defaults.verify_ssl)?
            .set_default("database", defaults.database)?
            .set_default("timeout_secs", defaults.timeout_secs as i64)?;

        if let Some(path) = &self.db_settings {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        builder = builder
            .set_override_option("host", self.host.clone())?
            .set_override_option("port", self.port.map(i64::from))?
            .set_override_option("username", self.username.clone())?
            .set_override_option("password", self.password.clone())?
            .set_override_option("token", self.token.clone())?
            .set_override_option("ssl", self.ssl.then_some(true))?
            .set_override_option("verify_ssl", self.verify_ssl.then_some(true))?
            .set_override_option("timeout_secs", self.timeout.map(|t| t as i64))?;

        builder
            .build()
            .context("Failed to load database settings")?
            .try_deserialize()
            .context("Invalid database settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = DbArgs::default()
            .load_with_env(Some(HashMap::new()))
            .unwrap();
        assert_eq!(settings, DbSettings::default());
    }

    #[test]
    fn test_precedence() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"host": "from-file", "port": 9000, "username": "reader", "database": "metrics"}}"#
        )
        .unwrap();

        let env = HashMap::from([
            ("SENTINEL_DB_PORT".to_string(), "9100".to_string()),
            ("SENTINEL_DB_PASSWORD".to_string(), "s3cret".to_string()),
        ]);
        let args = DbArgs {
            db_settings: Some(file.path().to_path_buf()),
            host: Some("from-flag".to_string()),
            ..DbArgs::default()
        };

        let settings = args.load_with_env(Some(env)).unwrap();
        assert_eq!(settings.host, "from-flag");
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.username.as_deref(), Some("reader"));
        assert_eq!(settings.password.as_deref(), Some("s3cret"));
        assert_eq!(settings.database, "metrics");
        assert!(!settings.ssl);
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "host = \"influx.example\"\nssl = true").unwrap();

        let args = DbArgs {
            db_settings: Some(file.path().to_path_buf()),
            ..DbArgs::default()
        };
        let settings = args.load_with_env(Some(HashMap::new())).unwrap();
        assert_eq!(settings.host, "influx.example");
        assert!(settings.ssl);
        assert_eq!(settings.port, 8086);
    }

    #[test]
    fn test_missing_file_is_error() {
        let args = DbArgs {
            db_settings: Some(PathBuf::from("/nonexistent/db_settings.json")),
            ..DbArgs::default()
        };
        assert!(args.load_with_env(Some(HashMap::new())).is_err());
    }
}
