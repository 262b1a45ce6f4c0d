//! The shared key/value store of one build.

use crate::errors::BuildError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Mutable state shared by every step of a single build.
///
/// Values are stored as JSON and decoded on read. The error slot is typed and
/// separate from the data so the runner can inspect it without knowing any
/// step's concrete keys. Both are behind locks, so a watcher task may read the
/// bag while the runner drives the build.
#[derive(Debug, Default)]
pub struct StateBag {
    data: RwLock<HashMap<String, serde_json::Value>>,
    error: RwLock<Option<BuildError>>,
}

impl StateBag {
    /// Creates an empty state bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, overwriting any previous value.
    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Serializes and stores a typed value.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::StateType` if the value cannot be represented as JSON.
    pub fn put_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), BuildError> {
        let key = key.into();
        let encoded = serde_json::to_value(value).map_err(|e| BuildError::StateType {
            key: key.clone(),
            expected: std::any::type_name::<T>().to_string(),
            message: e.to_string(),
        })?;
        self.put(key, encoded);
        Ok(())
    }

    /// Returns a copy of the raw value, or `None` if absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Decodes a value into `T`.
    ///
    /// Absent keys and JSON `null` decode to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::StateType` if the stored value has the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BuildError> {
        match self.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| BuildError::StateType {
                    key: key.to_string(),
                    expected: std::any::type_name::<T>().to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Decodes a value that a predecessor must have written.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::MissingState` if absent, `BuildError::StateType` if malformed.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, BuildError> {
        self.get_as(key)?
            .ok_or_else(|| BuildError::missing_state(key))
    }

    /// Reads a required string.
    pub fn require_string(&self, key: &str) -> Result<String, BuildError> {
        self.require(key)
    }

    /// Reads an optional string. Empty strings read as absent.
    pub fn get_string(&self, key: &str) -> Result<Option<String>, BuildError> {
        Ok(self
            .get_as::<String>(key)?
            .filter(|s| !s.is_empty()))
    }

    /// Returns true only if the key holds boolean `true`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(serde_json::Value::Bool(true)))
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Removes a key, returning its value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Records the build error.
    ///
    /// The first error wins: later errors are dropped so that a failure raised
    /// while tearing down never replaces the failure that triggered teardown.
    /// Returns true if this call set the slot.
    pub fn set_error(&self, error: BuildError) -> bool {
        let mut slot = self.error.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        true
    }

    /// Returns the recorded build error, if any.
    #[must_use]
    pub fn error(&self) -> Option<BuildError> {
        self.error.read().clone()
    }

    /// Returns true if a step has recorded an error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_put_overwrites() {
        let state = StateBag::new();
        state.put("location", json!("westus"));
        state.put("location", json!("eastus"));

        assert_eq!(state.get("location"), Some(json!("eastus")));
        assert_eq!(state.keys().len(), 1);
    }

    #[test]
    fn test_missing_key_is_absent_not_error() {
        let state = StateBag::new();
        assert!(state.get("nope").is_none());
        assert_eq!(state.get_as::<String>("nope"), Ok(None));
        assert!(!state.flag("nope"));
    }

    #[test]
    fn test_require_missing() {
        let state = StateBag::new();
        let err = state.require_string("arm.location").unwrap_err();
        assert_eq!(err, BuildError::missing_state("arm.location"));
    }

    #[test]
    fn test_type_mismatch() {
        let state = StateBag::new();
        state.put("count", json!("five"));

        let err = state.get_as::<u32>("count").unwrap_err();
        assert!(matches!(err, BuildError::StateType { ref key, .. } if key == "count"));
    }

    #[test]
    fn test_typed_round_trip_through_put_as() {
        let state = StateBag::new();
        let regions = vec!["westus".to_string(), "westus".to_string()];
        state.put_as("regions", &regions).unwrap();

        let read: Vec<String> = state.require("regions").unwrap();
        assert_eq!(read, regions);
    }

    #[test]
    fn test_empty_string_reads_as_absent() {
        let state = StateBag::new();
        state.put("name", json!(""));
        assert_eq!(state.get_string("name"), Ok(None));
    }

    #[test]
    fn test_flag_requires_bool_true() {
        let state = StateBag::new();
        state.put("a", json!(true));
        state.put("b", json!(false));
        state.put("c", json!("true"));

        assert!(state.flag("a"));
        assert!(!state.flag("b"));
        assert!(!state.flag("c"));
    }

    #[test]
    fn test_first_error_wins() {
        let state = StateBag::new();
        assert!(!state.has_error());

        assert!(state.set_error(BuildError::configuration("first")));
        assert!(!state.set_error(BuildError::Internal("second".into())));

        assert_eq!(state.error(), Some(BuildError::configuration("first")));
    }

    #[test]
    fn test_readable_from_another_thread() {
        let state = Arc::new(StateBag::new());
        state.put("vm", json!("vm-1"));

        let reader = state.clone();
        let handle = std::thread::spawn(move || reader.get_string("vm").unwrap());

        assert_eq!(handle.join().unwrap(), Some("vm-1".to_string()));
    }
}
