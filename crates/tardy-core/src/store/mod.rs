//! Durable key/value state substrate.
//!
//! Values are unordered lists of strings addressed by `(namespace, key)`.
//! The reconciliation core reads each list once per run and replaces it
//! wholesale at commit time.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

use crate::error::StoreError;

/// One wholesale replacement of the list under `(namespace, key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateWrite {
    pub namespace: String,
    pub key: String,
    pub values: Vec<String>,
}

/// Get-all / replace-all storage of string lists.
pub trait StateStore: Send + Sync {
    /// Stored values, or `None` when the key was never written.
    ///
    /// # Errors
    ///
    /// Backend read failures.
    fn values(&self, namespace: &str, key: &str) -> Result<Option<Vec<String>>, StoreError>;

    /// Replace the list stored under `key`.
    ///
    /// # Errors
    ///
    /// Backend write failures.
    fn replace_values(&self, namespace: &str, key: &str, values: &[String])
    -> Result<(), StoreError>;

    /// Apply `writes` in order as one unit.
    ///
    /// The default applies them one by one, so a failure part way leaves the
    /// earlier writes in place. Backends with real transactions override it.
    ///
    /// # Errors
    ///
    /// Backend write failures.
    fn replace_batch(&self, writes: &[StateWrite]) -> Result<(), StoreError> {
        for write in writes {
            self.replace_values(&write.namespace, &write.key, &write.values)?;
        }
        Ok(())
    }

    /// Whether anything was ever written into `namespace`.
    ///
    /// # Errors
    ///
    /// Backend read failures.
    fn is_initialized(&self, namespace: &str) -> Result<bool, StoreError>;
}

/// Tenant-scoped namespace, e.g. `alice/delinquency`.
#[must_use]
pub fn tenant_namespace(tenant: &str, section: &str) -> String {
    format!("{tenant}/{section}")
}
