//! Persistent device records. Storage has no dedicated table for devices —
//! they ride on the core `Store` trait's generic `pending` key-value
//! scratchpad. Keeping device storage backend-agnostic this way means
//! `memoria-server` needs no changes to the embedded/network `Store`
//! implementations to support auth.

use chrono::{DateTime, Utc};
use memoria_core::{Error, Result, Store};
use serde::{Deserialize, Serialize};

use super::tokens::hash_token;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_ip: Option<String>,
    pub revoked: bool,
}

fn device_key(id: &str) -> String {
    format!("auth:device:{id}")
}

fn access_index_key(access_hash: &str) -> String {
    format!("auth:token_index:{access_hash}")
}

fn refresh_index_key(refresh_hash: &str) -> String {
    format!("auth:refresh_index:{refresh_hash}")
}

const DEVICE_LIST_KEY: &str = "auth:device_list";

/// A thin view over `&dyn Store` for device CRUD. Holds no state of its
/// own — every method round-trips through the store's `pending` scratchpad.
pub struct DeviceRegistry<'a> {
    store: &'a dyn Store,
}

impl<'a> DeviceRegistry<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        DeviceRegistry { store }
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        match self.store.get_pending(DEVICE_LIST_KEY) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn save_ids(&self, ids: &[String]) -> Result<()> {
        let raw = serde_json::to_string(ids)?;
        self.store.set_pending(DEVICE_LIST_KEY, &raw)
    }

    /// Registers a newly approved device and its index rows. The caller
    /// is responsible for generating `access_token`/`refresh_token` and
    /// handing the raw values back to the polling client exactly once.
    pub fn register(
        &self,
        id: &str,
        name: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Device> {
        let device = Device {
            id: id.to_string(),
            name: name.to_string(),
            access_token_hash: hash_token(access_token),
            refresh_token_hash: hash_token(refresh_token),
            created_at: Utc::now(),
            last_seen: None,
            last_ip: None,
            revoked: false,
        };
        self.put(&device)?;

        self.store
            .set_pending(&access_index_key(&device.access_token_hash), id)?;
        self.store
            .set_pending(&refresh_index_key(&device.refresh_token_hash), id)?;

        let mut ids = self.list_ids()?;
        if !ids.contains(&id.to_string()) {
            ids.push(id.to_string());
            self.save_ids(&ids)?;
        }
        Ok(device)
    }

    fn put(&self, device: &Device) -> Result<()> {
        let raw = serde_json::to_string(device)?;
        self.store.set_pending(&device_key(&device.id), &raw)
    }

    pub fn get(&self, id: &str) -> Result<Device> {
        let raw = self
            .store
            .get_pending(&device_key(id))
            .map_err(|_| Error::not_found(format!("device {id}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn list(&self) -> Result<Vec<Device>> {
        self.list_ids()?.iter().map(|id| self.get(id)).collect()
    }

    /// Looks up a device by the raw access token presented in an
    /// `Authorization: Bearer` header, updating `last_seen`/`last_ip`.
    pub fn authenticate(&self, access_token: &str, remote_ip: Option<&str>) -> Result<Device> {
        let hash = hash_token(access_token);
        let id = self
            .store
            .get_pending(&access_index_key(&hash))
            .map_err(|_| Error::Unauthorized)?;
        let mut device = self.get(&id)?;
        if device.revoked {
            return Err(Error::Forbidden("device revoked".to_string()));
        }
        device.last_seen = Some(Utc::now());
        device.last_ip = remote_ip.map(str::to_string);
        self.put(&device)?;
        Ok(device)
    }

    /// Rotates the token pair for the device owning `refresh_token`,
    /// returning the updated record. Callers generate the new raw tokens
    /// and pass them in so they can be returned to the client.
    pub fn rotate(
        &self,
        refresh_token: &str,
        new_access_token: &str,
        new_refresh_token: &str,
    ) -> Result<Device> {
        let hash = hash_token(refresh_token);
        let id = self
            .store
            .get_pending(&refresh_index_key(&hash))
            .map_err(|_| Error::Unauthorized)?;
        let mut device = self.get(&id)?;
        if device.revoked {
            return Err(Error::Forbidden("device revoked".to_string()));
        }

        let _ = self.store.delete_pending(&refresh_index_key(&hash));
        let _ = self
            .store
            .delete_pending(&access_index_key(&device.access_token_hash));

        device.access_token_hash = hash_token(new_access_token);
        device.refresh_token_hash = hash_token(new_refresh_token);
        self.put(&device)?;

        self.store
            .set_pending(&access_index_key(&device.access_token_hash), &id)?;
        self.store
            .set_pending(&refresh_index_key(&device.refresh_token_hash), &id)?;
        Ok(device)
    }

    pub fn revoke(&self, id: &str) -> Result<()> {
        let mut device = self.get(id)?;
        device.revoked = true;
        self.put(&device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::RedbStore;
    use tempfile::TempDir;

    fn open_store() -> (RedbStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("t.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn register_then_authenticate_round_trips() {
        let (store, _dir) = open_store();
        let registry = DeviceRegistry::new(&store);
        registry.register("dev-1", "laptop", "access-tok", "refresh-tok").unwrap();

        let device = registry.authenticate("access-tok", Some("127.0.0.1")).unwrap();
        assert_eq!(device.id, "dev-1");
        assert!(device.last_seen.is_some());
    }

    #[test]
    fn revoked_device_fails_authentication() {
        let (store, _dir) = open_store();
        let registry = DeviceRegistry::new(&store);
        registry.register("dev-1", "laptop", "access-tok", "refresh-tok").unwrap();
        registry.revoke("dev-1").unwrap();

        let err = registry.authenticate("access-tok", None).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn rotate_invalidates_old_access_token() {
        let (store, _dir) = open_store();
        let registry = DeviceRegistry::new(&store);
        registry.register("dev-1", "laptop", "access-old", "refresh-old").unwrap();

        registry.rotate("refresh-old", "access-new", "refresh-new").unwrap();

        assert!(registry.authenticate("access-old", None).is_err());
        assert!(registry.authenticate("access-new", None).is_ok());
    }

    #[test]
    fn unknown_token_is_unauthorized() {
        let (store, _dir) = open_store();
        let registry = DeviceRegistry::new(&store);
        let err = registry.authenticate("nope", None).unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }
}
