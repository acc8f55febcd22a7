use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::PortalError;

pub const PROGRESS_KEY: &str = "portal.progress";
pub const CERTIFICATES_KEY: &str = "portal.certificates";
pub const SESSION_KEY: &str = "portal.session";
pub const READINESS_KEY: &str = "portal.readiness";

/// Scoped get/set/remove of JSON values under fixed keys.
pub trait KeyValueStore {
    /// # Errors
    /// Returns [`PortalError::Storage`] when the backing store cannot be read.
    fn get_value(&self, key: &str) -> Result<Option<Value>, PortalError>;

    /// # Errors
    /// Returns [`PortalError::Storage`] when the value cannot be written.
    fn set_value(&mut self, key: &str, value: &Value) -> Result<(), PortalError>;

    /// # Errors
    /// Returns [`PortalError::Storage`] when the key cannot be removed.
    fn remove_value(&mut self, key: &str) -> Result<(), PortalError>;
}

/// Binary payload store keyed by `student::belt-slug`.
pub trait BlobStore {
    /// # Errors
    /// Returns [`PortalError::Storage`] when the payload cannot be written.
    fn save_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), PortalError>;

    /// # Errors
    /// Returns [`PortalError::Storage`] when the store cannot be read.
    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, PortalError>;

    /// # Errors
    /// Returns [`PortalError::Storage`] when the payload cannot be removed.
    fn remove_blob(&mut self, key: &str) -> Result<(), PortalError>;
}

/// # Errors
/// Returns an error when the store fails or the stored value has the wrong shape.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, PortalError> {
    match store.get_value(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| PortalError::Storage(format!("malformed value under {key}: {err}"))),
        None => Ok(None),
    }
}

/// # Errors
/// Returns an error when the value cannot be serialized or written.
pub fn save_json<T: Serialize>(
    store: &mut dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), PortalError> {
    let value = serde_json::to_value(value).map_err(PortalError::storage)?;
    store.set_value(key, &value)
}

#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, PortalError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_value(&mut self, key: &str, value: &Value) -> Result<(), PortalError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove_value(&mut self, key: &str) -> Result<(), PortalError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }
}

impl BlobStore for MemoryBlobStore {
    fn save_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), PortalError> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, PortalError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn remove_blob(&mut self, key: &str) -> Result<(), PortalError> {
        self.blobs.remove(key);
        Ok(())
    }
}

/// A blob store whose every operation fails, standing in for an
/// unavailable or quota-exhausted backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBlobStore;

impl BlobStore for UnavailableBlobStore {
    fn save_blob(&mut self, _key: &str, _bytes: &[u8]) -> Result<(), PortalError> {
        Err(PortalError::Storage("blob store unavailable".to_string()))
    }

    fn load_blob(&self, _key: &str) -> Result<Option<Vec<u8>>, PortalError> {
        Err(PortalError::Storage("blob store unavailable".to_string()))
    }

    fn remove_blob(&mut self, _key: &str) -> Result<(), PortalError> {
        Err(PortalError::Storage("blob store unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressRecord;

    #[test]
    fn json_helpers_round_trip_through_memory_store() {
        let mut store = MemoryKeyValueStore::new();
        let mut records = BTreeMap::new();
        records.insert("S-1".to_string(), ProgressRecord { unlocked_index: 4, awarded_index: 3 });
        assert!(save_json(&mut store, PROGRESS_KEY, &records).is_ok());

        let loaded: Option<BTreeMap<String, ProgressRecord>> =
            load_json(&store, PROGRESS_KEY).unwrap_or_else(|_| unreachable!());
        assert_eq!(loaded, Some(records));

        assert!(store.remove_value(PROGRESS_KEY).is_ok());
        let missing: Option<BTreeMap<String, ProgressRecord>> =
            load_json(&store, PROGRESS_KEY).unwrap_or_else(|_| unreachable!());
        assert!(missing.is_none());
    }

    #[test]
    fn malformed_value_is_a_storage_error() {
        let mut store = MemoryKeyValueStore::new();
        assert!(store.set_value(PROGRESS_KEY, &serde_json::json!("not a map")).is_ok());
        let loaded: Result<Option<BTreeMap<String, ProgressRecord>>, _> = load_json(&store, PROGRESS_KEY);
        assert!(matches!(loaded, Err(PortalError::Storage(_))));
    }

    #[test]
    fn unavailable_blob_store_always_fails() {
        let mut store = UnavailableBlobStore;
        assert!(store.save_blob("S-1::yellow", b"png").is_err());
        assert!(store.load_blob("S-1::yellow").is_err());
    }
}
