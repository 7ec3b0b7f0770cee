//! Persisted membership set of one [`Category`].
//!
//! A [`Storage`] loads its ids once and then keeps a three-way view:
//!
//! - `original`: what the store held when the run started;
//! - `to_add` / `to_remove`: pending changes, disjoint per id.
//!
//! Queries only ever look at `original`. Changes become visible after
//! [`Storage::persist`], which writes `(original ∪ to_add) \ to_remove` back
//! as a sorted list of decimal strings.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::category::Category;
use crate::error::StoreError;
use crate::position::PositionId;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Contents {
    original: BTreeSet<PositionId>,
    to_add: BTreeSet<PositionId>,
    to_remove: BTreeSet<PositionId>,
}

/// Membership set of one category, with a mutation buffer.
///
/// All operations take the internal lock, so one instance can be shared by
/// parallel workers.
pub struct Storage<'s> {
    category: Category,
    namespace: String,
    store: &'s dyn StateStore,
    contents: Mutex<Contents>,
}

impl std::fmt::Debug for Storage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("category", &self.category)
            .field("namespace", &self.namespace)
            .field("contents", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl<'s> Storage<'s> {
    /// Load the membership set of `category` from `store`.
    ///
    /// # Errors
    ///
    /// Fails on store errors, or with [`StoreError::Corrupt`] when a stored
    /// value is not a decimal position id.
    pub fn load(
        store: &'s dyn StateStore,
        namespace: &str,
        category: Category,
    ) -> Result<Self, StoreError> {
        let key = category.storage_key();
        let original = store
            .values(namespace, key)?
            .unwrap_or_default()
            .into_iter()
            .map(|raw| {
                raw.parse::<PositionId>().map_err(|_| StoreError::Corrupt {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    value: raw,
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            category,
            namespace: namespace.to_string(),
            store,
            contents: Mutex::new(Contents {
                original,
                ..Contents::default()
            }),
        })
    }

    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Whether `id` was a member when loaded (or at the last persist).
    #[must_use]
    pub fn is_known(&self, id: PositionId) -> bool {
        self.lock().original.contains(&id)
    }

    /// Stage `id` for addition, cancelling a pending removal.
    ///
    /// Returns `false` if `id` is already a member or already staged.
    pub fn add(&self, id: PositionId) -> bool {
        let mut contents = self.lock();
        contents.to_remove.remove(&id);
        if contents.original.contains(&id) {
            return false;
        }
        contents.to_add.insert(id)
    }

    /// Stage `id` for removal, cancelling a pending addition.
    ///
    /// Returns `false` if `id` is not a member.
    pub fn remove(&self, id: PositionId) -> bool {
        let mut contents = self.lock();
        contents.to_add.remove(&id);
        if !contents.original.contains(&id) {
            return false;
        }
        contents.to_remove.insert(id);
        true
    }

    /// Members that are absent from `live`.
    #[must_use]
    pub fn complement(&self, live: &BTreeSet<PositionId>) -> Vec<PositionId> {
        self.lock().original.difference(live).copied().collect()
    }

    /// Current members, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<PositionId> {
        self.lock().original.iter().copied().collect()
    }

    /// Whether any change is staged.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let contents = self.lock();
        !contents.to_add.is_empty() || !contents.to_remove.is_empty()
    }

    /// Apply staged changes and write the full set to the store.
    ///
    /// Does nothing when no change is staged.
    ///
    /// # Errors
    ///
    /// Store write failures; the staged changes are kept in that case.
    pub fn persist(&self) -> Result<(), StoreError> {
        let mut contents = self.lock();
        if contents.to_add.is_empty() && contents.to_remove.is_empty() {
            return Ok(());
        }
        let mut next = &contents.original | &contents.to_add;
        for id in &contents.to_remove {
            next.remove(id);
        }
        self.write(&next)?;
        tracing::trace!(
            category = %self.category,
            added = contents.to_add.len(),
            removed = contents.to_remove.len(),
            members = next.len(),
            "storage persisted"
        );
        contents.original = next;
        contents.to_add.clear();
        contents.to_remove.clear();
        Ok(())
    }

    /// Write the current members even if nothing is staged.
    ///
    /// # Errors
    ///
    /// Store write failures.
    pub fn persist_forced(&self) -> Result<(), StoreError> {
        if self.is_dirty() {
            return self.persist();
        }
        let contents = self.lock();
        self.write(&contents.original)
    }

    fn write(&self, ids: &BTreeSet<PositionId>) -> Result<(), StoreError> {
        let values: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.store
            .replace_values(&self.namespace, self.category.storage_key(), &values)
    }

    fn lock(&self) -> MutexGuard<'_, Contents> {
        self.contents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
