#[macro_use]
extern crate slog_scope;

use std::env::{self, VarError};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

static PREFIX: &str = "agent";

/// Boot-time settings: everything the process needs before it can stand up
/// logging, the admin HTTP surface, and the Config Store (C6). Runtime
/// configuration keys (`USE_CONNECTION_POOL`, `ACK_INTERVAL_SECONDS`,
/// `JOB_TYPES`, ...) are deliberately *not* modeled here: those are owned by
/// the Config Store, which persists them either to a warehouse table or, in
/// its environment-backed strategy, reads them directly via
/// `agent_core::config_keys` at the point of use. `Settings` only carries
/// what's needed to construct that store and the rest of the process.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `SERVER_HOST`
    pub server_host: String,
    /// `SERVER_PORT`
    pub server_port: u16,
    /// `BACKEND_SERVICE_URL` - base URL of the orchestrator.
    pub backend_service_url: String,
    /// `DEBUG`
    pub debug: bool,
    /// `SNOWFLAKE_HOST` - presence indicates the process is running inside
    /// the warehouse container, rather than on a developer's machine.
    pub snowflake_host: Option<String>,

    pub human_logs: bool,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,

    /// Table the Config Store's warehouse-table persistence strategy reads
    /// and `MERGE`s into. Defaults to `CONFIG.APP_CONFIG`.
    pub config_table_name: String,
    /// Warehouse used for config store reads/writes; may differ from the
    /// warehouse(s) used to service queries.
    pub sna_warehouse_name: Option<String>,

    /// Path to the agent id/token secret file, JSON `{mcd_id, mcd_token}`.
    pub secret_string_path: String,
    /// Path to the warehouse session token, refreshed by the platform.
    pub warehouse_token_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_owned(),
            server_port: 8081,
            backend_service_url: "http://localhost:5000".to_owned(),
            debug: false,
            snowflake_host: None,
            human_logs: false,
            statsd_host: None,
            statsd_port: 8125,
            config_table_name: "CONFIG.APP_CONFIG".to_owned(),
            sna_warehouse_name: None,
            secret_string_path: "/var/run/secrets/creds/secret_string".to_owned(),
            warehouse_token_path: "/snowflake/session/token".to_owned(),
        }
    }
}

impl Settings {
    /// Load the settings from the config file if supplied, then the environment.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        if let Some(config_filename) = filename {
            s.merge(File::with_name(config_filename))?;
        }

        // Accepts vars as `AGENT__FOO__BAR="gorp"` -> `foo.bar = "gorp"`.
        s.merge(Environment::with_prefix(&PREFIX.to_uppercase()).separator("__"))?;

        let mut settings: Self = s.try_into()?;
        settings.apply_legacy_env_aliases();

        if matches!(env::var("RUST_LOG"), Err(VarError::NotPresent)) {
            trace!("No RUST_LOG set, using default logging level");
        }

        Ok(settings)
    }

    /// The reference deployment configures this process with bare,
    /// unprefixed environment variables (`SERVER_HOST`, `SNOWFLAKE_HOST`,
    /// ...) rather than the `AGENT__`-prefixed scheme `config::Environment`
    /// expects. Layer those in as an override so both conventions work.
    fn apply_legacy_env_aliases(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server_host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT") {
            if let Ok(port) = v.parse() {
                self.server_port = port;
            }
        }
        if let Ok(v) = env::var("BACKEND_SERVICE_URL") {
            self.backend_service_url = v;
        }
        if let Ok(v) = env::var("DEBUG") {
            self.debug = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = env::var("SNOWFLAKE_HOST") {
            self.snowflake_host = Some(v);
        }
    }

    /// True when running inside the warehouse container (as opposed to a
    /// developer's machine, where warehouse locals stand in for it).
    pub fn in_container(&self) -> bool {
        self.snowflake_host.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible_for_local_development() {
        let settings = Settings::default();
        assert_eq!(settings.server_host, "0.0.0.0");
        assert_eq!(settings.server_port, 8081);
        assert_eq!(settings.config_table_name, "CONFIG.APP_CONFIG");
        assert!(!settings.in_container());
    }

    #[test]
    fn legacy_env_aliases_override_defaults() {
        temp_env::with_vars(
            vec![
                ("SERVER_HOST", Some("127.0.0.1")),
                ("SERVER_PORT", Some("9090")),
                ("SNOWFLAKE_HOST", Some("sf.internal")),
            ],
            || {
                let mut settings = Settings::default();
                settings.apply_legacy_env_aliases();
                assert_eq!(settings.server_host, "127.0.0.1");
                assert_eq!(settings.server_port, 9090);
                assert!(settings.in_container());
            },
        );
    }
}
