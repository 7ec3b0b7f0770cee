//! The external data source of positions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::SourceError;
use crate::position::{Position, PositionId, SaleInfo};

/// Read access to the remote portfolio.
///
/// The source only knows the present. It never reports history.
pub trait PositionSource: Send + Sync {
    /// Every position considered delinquent right now.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn delinquent_positions(&self) -> Result<Vec<Position>, SourceError>;

    /// Fresh copy of one position.
    ///
    /// `Ok(None)` means the position no longer exists at the source.
    ///
    /// # Errors
    ///
    /// Transient lookup failures.
    fn position(&self, id: PositionId) -> Result<Option<Position>, SourceError>;

    /// Sale terms for a position on the secondary market, if it can be sold.
    ///
    /// # Errors
    ///
    /// Transient lookup failures.
    fn sale_info(&self, id: PositionId) -> Result<Option<SaleInfo>, SourceError>;
}

/// In-memory [`PositionSource`].
///
/// The snapshot is what `delinquent_positions` returns; the catalogue answers
/// single-position lookups and also contains every snapshot entry.
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: Mutex<MemorySourceState>,
    sale_lookups: AtomicUsize,
    position_lookups: AtomicUsize,
}

#[derive(Debug, Default)]
struct MemorySourceState {
    snapshot: Vec<PositionId>,
    catalogue: BTreeMap<PositionId, Position>,
    sale_info: HashMap<PositionId, SaleInfo>,
    outage: Option<String>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Source whose snapshot is exactly `positions`.
    #[must_use]
    pub fn with_snapshot(positions: Vec<Position>) -> Self {
        let source = Self::new();
        source.set_snapshot(positions);
        source
    }

    /// Replace the delinquent snapshot. Positions that drop out of it stay
    /// resolvable by id until [`MemorySource::forget`] is called.
    pub fn set_snapshot(&self, positions: Vec<Position>) {
        let mut state = self.lock();
        state.snapshot = positions.iter().map(|p| p.id).collect();
        for position in positions {
            state.catalogue.insert(position.id, position);
        }
    }

    /// Make a position resolvable by id without it being delinquent.
    pub fn upsert(&self, position: Position) {
        self.lock().catalogue.insert(position.id, position);
    }

    /// Remove a position from the source entirely.
    pub fn forget(&self, id: PositionId) {
        let mut state = self.lock();
        state.catalogue.remove(&id);
        state.snapshot.retain(|known| *known != id);
    }

    pub fn set_sale_info(&self, id: PositionId, info: SaleInfo) {
        self.lock().sale_info.insert(id, info);
    }

    /// Fail every request with [`SourceError::Unavailable`] until cleared.
    pub fn set_outage(&self, reason: Option<&str>) {
        self.lock().outage = reason.map(str::to_string);
    }

    /// Number of sale-info lookups served so far.
    #[must_use]
    pub fn sale_lookups(&self) -> usize {
        self.sale_lookups.load(Ordering::SeqCst)
    }

    /// Number of single-position lookups served so far.
    #[must_use]
    pub fn position_lookups(&self) -> usize {
        self.position_lookups.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySourceState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn available(state: &MemorySourceState) -> Result<(), SourceError> {
        state
            .outage
            .as_ref()
            .map_or(Ok(()), |reason| Err(SourceError::Unavailable(reason.clone())))
    }
}

impl PositionSource for MemorySource {
    fn delinquent_positions(&self) -> Result<Vec<Position>, SourceError> {
        let state = self.lock();
        Self::available(&state)?;
        Ok(state
            .snapshot
            .iter()
            .filter_map(|id| state.catalogue.get(id).cloned())
            .collect())
    }

    fn position(&self, id: PositionId) -> Result<Option<Position>, SourceError> {
        let state = self.lock();
        Self::available(&state)?;
        self.position_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(state.catalogue.get(&id).cloned())
    }

    fn sale_info(&self, id: PositionId) -> Result<Option<SaleInfo>, SourceError> {
        let state = self.lock();
        Self::available(&state)?;
        self.sale_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(state.sale_info.get(&id).cloned())
    }
}
