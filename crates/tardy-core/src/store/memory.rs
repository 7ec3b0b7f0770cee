use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{StateStore, StateWrite};
use crate::error::StoreError;

/// Mutex-guarded in-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<BTreeMap<(String, String), Vec<String>>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(namespace, key)` entries written so far.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if a writer panicked.
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.lock().map_err(|_| StoreError::Poisoned)?.len())
    }
}

impl StateStore for MemoryStateStore {
    fn values(&self, namespace: &str, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn replace_values(
        &self,
        namespace: &str,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert((namespace.to_string(), key.to_string()), values.to_vec());
        Ok(())
    }

    fn replace_batch(&self, writes: &[StateWrite]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        for write in writes {
            entries.insert(
                (write.namespace.clone(), write.key.clone()),
                write.values.clone(),
            );
        }
        Ok(())
    }

    fn is_initialized(&self, namespace: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.keys().any(|(ns, _)| ns == namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_are_isolated() {
        let store = MemoryStateStore::new();
        store
            .replace_values("alice/delinquency", "defaulted", &["1".into()])
            .expect("write");

        assert!(store.is_initialized("alice/delinquency").expect("init"));
        assert!(!store.is_initialized("bob/delinquency").expect("init"));
        assert_eq!(
            store.values("bob/delinquency", "defaulted").expect("read"),
            None
        );
    }

    #[test]
    fn empty_list_still_initializes_namespace() {
        let store = MemoryStateStore::new();
        store
            .replace_values("alice/delinquency", "delinquent", &[])
            .expect("write");
        assert!(store.is_initialized("alice/delinquency").expect("init"));
        assert_eq!(
            store.values("alice/delinquency", "delinquent").expect("read"),
            Some(Vec::new())
        );
        assert_eq!(store.entry_count().expect("count"), 1);
    }
}
