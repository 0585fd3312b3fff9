//! Backend selection shared between the server binary and tests. Env-var
//! parsing and CLI flags live in `memoria-server::config`; this module only
//! knows how to turn a resolved choice into an open `Store`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::{RedbStore, SqlStore, Store};

/// Which of the two backends to open.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Single-file `redb` database, for a single agent/device.
    Embedded { path: PathBuf },
    /// Shared Postgres database, for multi-device/team deployments.
    Network { database_url: String },
}

impl BackendConfig {
    pub async fn open(&self) -> Result<Arc<dyn Store>> {
        match self {
            BackendConfig::Embedded { path } => {
                let store = RedbStore::open(path)?;
                Ok(Arc::new(store))
            }
            BackendConfig::Network { database_url } => {
                let store = SqlStore::connect(database_url).await?;
                Ok(Arc::new(store))
            }
        }
    }
}
