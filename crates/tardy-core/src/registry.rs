//! One [`Storage`] per [`Category`], answering "what does this position carry".
//!
//! Promotion is monotonic: adding a day-based category also adds every lesser
//! one, and `Defaulted` implies every category. The source reports only the
//! current day count, so a position first seen at day 45 is recorded as
//! `New`, `Mild` and `Severe` at once.

use std::collections::{BTreeMap, BTreeSet};

use crate::category::Category;
use crate::error::{SourceError, StoreError};
use crate::position::{Position, PositionId};
use crate::source::PositionSource;
use crate::storage::Storage;
use crate::store::StateStore;

/// Tracked positions missing from the live snapshot, split by whether the
/// source still knows them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Complement {
    /// Fresh copies of positions that left delinquency.
    pub resolved: Vec<Position>,
    /// Ids the source no longer knows. They stay tracked.
    pub unresolved: Vec<PositionId>,
}

/// Membership of tracked positions across all categories.
pub struct Registry<'s> {
    namespace: String,
    store: &'s dyn StateStore,
    storages: [Storage<'s>; 6],
}

impl std::fmt::Debug for Registry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("namespace", &self.namespace)
            .field("storages", &self.storages)
            .finish_non_exhaustive()
    }
}

impl<'s> Registry<'s> {
    /// Load every category's membership from `namespace`.
    ///
    /// # Errors
    ///
    /// Store read failures or corrupt persisted values.
    pub fn load(store: &'s dyn StateStore, namespace: &str) -> Result<Self, StoreError> {
        let [new, mild, severe, critical, hopeless, defaulted] = Category::ALL;
        Ok(Self {
            namespace: namespace.to_string(),
            store,
            storages: [
                Storage::load(store, namespace, new)?,
                Storage::load(store, namespace, mild)?,
                Storage::load(store, namespace, severe)?,
                Storage::load(store, namespace, critical)?,
                Storage::load(store, namespace, hopeless)?,
                Storage::load(store, namespace, defaulted)?,
            ],
        })
    }

    /// Whether the namespace was ever written.
    ///
    /// # Errors
    ///
    /// Store read failures.
    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        self.store.is_initialized(&self.namespace)
    }

    #[must_use]
    pub fn storage(&self, category: Category) -> &Storage<'s> {
        // `storages` is laid out in `Category::ALL` order.
        &self.storages[category as usize]
    }

    /// Categories whose persisted membership contains `position`.
    #[must_use]
    pub fn categories(&self, position: &Position) -> BTreeSet<Category> {
        self.categories_of(position.id)
    }

    #[must_use]
    pub fn categories_of(&self, id: PositionId) -> BTreeSet<Category> {
        self.storages
            .iter()
            .filter(|storage| storage.is_known(id))
            .map(Storage::category)
            .collect()
    }

    /// Stage `category` for `position`, together with everything it implies.
    pub fn add_category(&self, position: &Position, category: Category) {
        let implied: &[Category] = if category == Category::Defaulted {
            &Category::ALL
        } else {
            category.lesser_categories()
        };
        self.storage(category).add(position.id);
        for lesser in implied {
            self.storage(*lesser).add(position.id);
        }
    }

    /// Stage removal of `position` from every category.
    pub fn remove(&self, position: &Position) {
        for storage in &self.storages {
            storage.remove(position.id);
        }
    }

    /// Tracked positions missing from `live`, re-fetched from `source`.
    ///
    /// `New` is a superset of every other category, so its complement covers
    /// all of them.
    ///
    /// # Errors
    ///
    /// Transient lookup failures.
    pub fn complement(
        &self,
        live: &BTreeSet<PositionId>,
        source: &dyn PositionSource,
    ) -> Result<Complement, SourceError> {
        let mut complement = Complement::default();
        for id in self.storage(Category::New).complement(live) {
            match source.position(id)? {
                Some(position) => complement.resolved.push(position),
                None => complement.unresolved.push(id),
            }
        }
        if !complement.unresolved.is_empty() {
            tracing::warn!(
                namespace = %self.namespace,
                count = complement.unresolved.len(),
                first = %complement.unresolved[0],
                "tracked positions unknown to the source, keeping them"
            );
        }
        Ok(complement)
    }

    /// Every tracked id and its categories.
    #[must_use]
    pub fn tracked(&self) -> BTreeMap<PositionId, BTreeSet<Category>> {
        let mut tracked: BTreeMap<PositionId, BTreeSet<Category>> = BTreeMap::new();
        for storage in &self.storages {
            for id in storage.ids() {
                tracked.entry(id).or_default().insert(storage.category());
            }
        }
        tracked
    }

    /// Persist every storage with staged changes.
    ///
    /// # Errors
    ///
    /// Store write failures.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.storages.iter().try_for_each(Storage::persist)
    }

    /// Persist every storage, including unchanged ones, so the namespace
    /// counts as initialized even when nothing is tracked.
    ///
    /// # Errors
    ///
    /// Store write failures.
    pub fn persist_all(&self) -> Result<(), StoreError> {
        self.storages.iter().try_for_each(Storage::persist_forced)
    }
}
