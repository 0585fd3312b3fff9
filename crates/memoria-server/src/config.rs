//! `clap::Parser` + env-backed config: arg/env/default-value triples, a
//! `validate()` collecting pass, and a `Default` impl for tests.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use memoria_core::BackendConfig;
use serde::Deserialize;

#[derive(Parser, Debug, Clone)]
#[command(name = "memoria-server")]
#[command(about = "memoria graph memory store server")]
pub struct Config {
    /// HTTP bind address.
    #[arg(long, env = "MEMORIA_BIND_ADDR", default_value = "0.0.0.0:8900")]
    pub bind_addr: SocketAddr,

    /// Embedded-backend data directory; ignored when `database_url` is set.
    #[arg(long, env = "MEMORIA_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Postgres connection string for the network backend. When present,
    /// takes precedence over the embedded `data_dir` backend.
    #[arg(long, env = "MEMORIA_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Default view-composer token budget, used when a request omits one.
    #[arg(long, env = "MEMORIA_DEFAULT_BUDGET", default_value = "4000")]
    pub default_budget: u32,

    /// TLS certificate path. Both `tls_cert` and `tls_key` must be set to
    /// serve HTTPS; otherwise the server serves plain HTTP.
    #[arg(long, env = "MEMORIA_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "MEMORIA_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Admin password gating `/device/authorize` approvals. Devices cannot
    /// be approved (and the bearer-auth middleware passes every request
    /// through unauthenticated) until this is set.
    #[arg(long, env = "MEMORIA_ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    /// Enables the background auto-sync loop against `sync_remote_url`. env
    /// wins over the YAML flag when both are set; see `resolve_auto_sync`.
    #[arg(long, env = "MEMORIA_AUTO_SYNC")]
    pub auto_sync: Option<bool>,

    /// Remote `memoria-server` base URL to pull from and push to when
    /// auto-sync is enabled. Required for auto-sync to actually run; if
    /// auto-sync resolves true without this set, `validate` rejects it.
    #[arg(long, env = "MEMORIA_SYNC_REMOTE_URL")]
    pub sync_remote_url: Option<String>,

    /// Bearer token sent with every auto-sync request against
    /// `sync_remote_url`, for remotes that require device authentication.
    #[arg(long, env = "MEMORIA_SYNC_TOKEN")]
    pub sync_token: Option<String>,

    /// How often the auto-sync loop runs a pull-then-push cycle.
    #[arg(long, env = "MEMORIA_SYNC_INTERVAL_SECS", default_value = "300")]
    pub sync_interval_secs: u64,

    /// Optional YAML config file providing defaults this `clap` layer
    /// doesn't otherwise cover (currently just `auto_sync`).
    #[arg(long, env = "MEMORIA_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// The subset of settings sourced from an optional YAML file rather than
/// CLI flags or env vars.
#[derive(Debug, Clone, Default, Deserialize)]
struct YamlConfig {
    auto_sync: Option<bool>,
}

fn load_yaml_config(path: &std::path::Path) -> YamlConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str(&raw).unwrap_or_default(),
        Err(_) => YamlConfig::default(),
    }
}

impl Config {
    /// env wins over the YAML `auto_sync` flag when both are set; absent
    /// both, auto-sync defaults off.
    pub fn resolve_auto_sync(&self) -> bool {
        if let Some(v) = self.auto_sync {
            return v;
        }
        self.config_file
            .as_deref()
            .map(load_yaml_config)
            .and_then(|c| c.auto_sync)
            .unwrap_or(false)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memoria.redb")
    }

    /// Where the auto-sync loop persists its per-remote `SyncState`.
    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync_state.json")
    }

    pub fn backend(&self) -> BackendConfig {
        match &self.database_url {
            Some(url) => BackendConfig::Network {
                database_url: url.clone(),
            },
            None => BackendConfig::Embedded {
                path: self.db_path(),
            },
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        if self.database_url.is_none() && !self.data_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.data_dir) {
                errors.push(format!("cannot create data_dir {:?}: {e}", self.data_dir));
            }
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            errors.push("tls_cert and tls_key must both be set or both be omitted".to_string());
        }
        if self.resolve_auto_sync() && self.sync_remote_url.is_none() {
            errors.push("auto_sync is enabled but sync_remote_url is not set".to_string());
        }
        if !errors.is_empty() {
            anyhow::bail!("invalid configuration: {}", errors.join("; "));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:8900".parse().unwrap(),
            data_dir: PathBuf::from("./data"),
            database_url: None,
            default_budget: 4000,
            tls_cert: None,
            tls_key: None,
            admin_password: None,
            auto_sync: None,
            sync_remote_url: None,
            sync_token: None,
            sync_interval_secs: 300,
            config_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_sync_env_wins_over_absent_yaml() {
        let config = Config {
            auto_sync: Some(true),
            ..Config::default()
        };
        assert!(config.resolve_auto_sync());
    }

    #[test]
    fn auto_sync_defaults_false_without_env_or_yaml() {
        let config = Config::default();
        assert!(!config.resolve_auto_sync());
    }

    #[test]
    fn mismatched_tls_pair_fails_validation() {
        let config = Config {
            tls_cert: Some(PathBuf::from("cert.pem")),
            data_dir: std::env::temp_dir(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn auto_sync_without_remote_url_fails_validation() {
        let config = Config {
            auto_sync: Some(true),
            data_dir: std::env::temp_dir(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn auto_sync_with_remote_url_passes_validation() {
        let config = Config {
            auto_sync: Some(true),
            sync_remote_url: Some("https://example.com".to_string()),
            data_dir: std::env::temp_dir(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
