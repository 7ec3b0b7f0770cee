//! One reconciliation run: diff the live snapshot against persisted
//! categories, queue transition events, commit.
//!
//! # First run
//!
//! An uninitialized namespace is seeded silently. Every live position gets
//! the categories it already qualifies for and no event fires, so later runs
//! only report genuinely new transitions.
//!
//! # Steady state
//!
//! 1. **Cured**: tracked positions absent from the snapshot are forgotten.
//!    Fully repaid ones are left to the repayment notifications; the rest
//!    fire `delinquency.cured`.
//! 2. **Defaulted**: positions flagged defaulted for the first time gain every
//!    category and fire `delinquency.defaulted` once.
//! 3. **Day-based**: each other position is promoted to the highest day-based
//!    category it newly qualifies for. Only that category fires; the skipped
//!    lower ones are recorded silently.
//!
//! Everything goes through one [`Transaction`]. Any error before commit leaves
//! both the store and the sink untouched.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;

use crate::category::Category;
use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::event::{Event, EventKind};
use crate::position::{Position, PositionId};
use crate::registry::Registry;
use crate::sink::EventSink;
use crate::source::PositionSource;
use crate::store::{StateStore, tenant_namespace};
use crate::transaction::{CommitReport, Transaction};

/// What a run ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nobody listens to any delinquency event; nothing was fetched.
    Skipped,
    /// First run for the tenant; state seeded without events.
    Seeded,
    /// Regular diff against existing state.
    Reconciled,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub tenant: String,
    pub outcome: RunOutcome,
    /// Positions in the live snapshot.
    pub live: usize,
    /// Tracked positions that left the snapshot.
    pub cured: usize,
    /// Cured positions whose event was suppressed as a plain repayment.
    pub repaid: usize,
    /// Tracked positions gone from the snapshot that the source no longer
    /// knows. They stay tracked and are looked up again next run.
    pub unresolved: usize,
    /// Day-based promotions.
    pub promoted: usize,
    /// Positions newly recorded as defaulted.
    pub defaulted: usize,
    pub commit: CommitReport,
}

impl RunReport {
    fn new(tenant: &str, outcome: RunOutcome) -> Self {
        Self {
            tenant: tenant.to_string(),
            outcome,
            live: 0,
            cured: 0,
            repaid: 0,
            unresolved: 0,
            promoted: 0,
            defaulted: 0,
            commit: CommitReport::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    cured: AtomicUsize,
    repaid: AtomicUsize,
    promoted: AtomicUsize,
    defaulted: AtomicUsize,
}

impl Tally {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn fill(&self, report: &mut RunReport) {
        report.cured = self.cured.load(Ordering::Relaxed);
        report.repaid = self.repaid.load(Ordering::Relaxed);
        report.promoted = self.promoted.load(Ordering::Relaxed);
        report.defaulted = self.defaulted.load(Ordering::Relaxed);
    }
}

/// Reconciles tenants' delinquency state against a position source.
///
/// Runs against the same store must not overlap; see [`crate::lock::RunLock`].
pub struct Reconciler<'a> {
    source: &'a dyn PositionSource,
    store: &'a dyn StateStore,
    sink: &'a dyn EventSink,
    config: ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        source: &'a dyn PositionSource,
        store: &'a dyn StateStore,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            source,
            store,
            sink,
            config: ReconcileConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one reconciliation for `tenant` as of `today`.
    ///
    /// # Errors
    ///
    /// Any source, store or data error. Nothing is persisted and no event is
    /// delivered when this returns an error.
    pub fn reconcile(&self, tenant: &str, today: NaiveDate) -> Result<RunReport, ReconcileError> {
        if !EventKind::ALL
            .into_iter()
            .any(|kind| self.sink.is_listener_registered(kind))
        {
            tracing::info!(tenant, "no delinquency listeners registered, skipping run");
            return Ok(RunReport::new(tenant, RunOutcome::Skipped));
        }

        let start = Instant::now();
        let tx = Transaction::new(tenant, self.store, self.sink);
        let mut report = match self.run(&tx, today) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(
                    tenant,
                    code = %err.code(),
                    error = %err,
                    "reconciliation aborted, nothing committed"
                );
                return Err(err);
            }
        };
        report.commit = tx.commit()?;

        tracing::info!(
            tenant,
            outcome = ?report.outcome,
            live = report.live,
            cured = report.cured,
            repaid = report.repaid,
            unresolved = report.unresolved,
            promoted = report.promoted,
            defaulted = report.defaulted,
            mutations = report.commit.mutations_applied,
            events_fired = report.commit.events_fired,
            events_skipped = report.commit.events_skipped,
            elapsed_ms = start.elapsed().as_millis(),
            "reconciliation complete"
        );
        Ok(report)
    }

    fn run(&self, tx: &Transaction<'a>, today: NaiveDate) -> Result<RunReport, ReconcileError> {
        let positions = self.source.delinquent_positions()?;
        let state = tx.state();
        let namespace = tenant_namespace(tx.tenant(), &self.config.namespace);
        let registry = Registry::load(&state, &namespace)?;

        let live: BTreeSet<PositionId> = positions.iter().map(|p| p.id).collect();
        let (defaulted, healthy): (Vec<Position>, Vec<Position>) =
            positions.into_iter().partition(|p| p.defaulted);

        if !registry.is_initialized()? {
            let mut report = RunReport::new(tx.tenant(), RunOutcome::Seeded);
            report.live = live.len();
            Self::seed(&registry, &defaulted, &healthy)?;
            registry.persist_all()?;
            tracing::info!(
                tenant = tx.tenant(),
                positions = live.len(),
                "first run, state seeded without events"
            );
            return Ok(report);
        }

        let tally = Tally::default();
        let complement = registry.complement(&live, self.source)?;
        self.fan_out(&complement.resolved, |position| {
            self.forget(tx, &registry, &tally, position);
            Ok(())
        })?;
        self.fan_out(&defaulted, |position| {
            self.mark_defaulted(tx, &registry, &tally, position, today)
        })?;
        self.fan_out(&healthy, |position| {
            self.promote(tx, &registry, &tally, position, today)
        })?;
        registry.persist()?;

        let mut report = RunReport::new(tx.tenant(), RunOutcome::Reconciled);
        report.live = live.len();
        report.unresolved = complement.unresolved.len();
        tally.fill(&mut report);
        Ok(report)
    }

    fn seed(
        registry: &Registry<'_>,
        defaulted: &[Position],
        healthy: &[Position],
    ) -> Result<(), ReconcileError> {
        for position in defaulted {
            registry.add_category(position, Category::Defaulted);
        }
        for position in healthy {
            let days = days_past_due(position)?;
            registry.add_category(position, Category::for_days(days));
        }
        Ok(())
    }

    fn forget(
        &self,
        tx: &Transaction<'a>,
        registry: &Registry<'_>,
        tally: &Tally,
        position: &Position,
    ) {
        registry.remove(position);
        Tally::bump(&tally.cured);

        if position.is_settled() {
            Tally::bump(&tally.repaid);
            tracing::debug!(position = %position.id, "repaid in full, no cure event");
            return;
        }

        let kind = EventKind::NoLongerDelinquent;
        if !tx.listens(kind) {
            return;
        }
        let source = self.source;
        let stale = position.clone();
        tx.fire_lazy(kind, move || {
            let fresh = source.position(stale.id)?.unwrap_or(stale);
            Ok(Event::new(kind, fresh))
        });
    }

    fn mark_defaulted(
        &self,
        tx: &Transaction<'a>,
        registry: &Registry<'_>,
        tally: &Tally,
        position: &Position,
        today: NaiveDate,
    ) -> Result<(), ReconcileError> {
        if registry.categories(position).contains(&Category::Defaulted) {
            return Ok(());
        }
        registry.add_category(position, Category::Defaulted);
        Category::Defaulted.process(tx, position, today, self.source)?;
        Tally::bump(&tally.defaulted);
        tracing::debug!(position = %position.id, "position defaulted");
        Ok(())
    }

    fn promote(
        &self,
        tx: &Transaction<'a>,
        registry: &Registry<'_>,
        tally: &Tally,
        position: &Position,
        today: NaiveDate,
    ) -> Result<(), ReconcileError> {
        let days = days_past_due(position)?;
        let known = registry.categories(position);
        let Some(category) = Category::DAY_BASED
            .into_iter()
            .rev()
            .find(|category| !known.contains(category) && category.admits(days))
        else {
            return Ok(());
        };

        registry.add_category(position, category);
        category.process(tx, position, today, self.source)?;
        Tally::bump(&tally.promoted);
        tracing::debug!(position = %position.id, %category, days, "position promoted");
        Ok(())
    }

    /// Apply `work` to every item, spread over the configured workers.
    fn fan_out<T, F>(&self, items: &[T], work: F) -> Result<(), ReconcileError>
    where
        T: Sync,
        F: Fn(&T) -> Result<(), ReconcileError> + Sync,
    {
        let workers = self.config.effective_workers();
        if workers == 1 || items.len() < 2 {
            return items.iter().try_for_each(work);
        }

        let work = &work;
        let chunk = items.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = items
                .chunks(chunk)
                .map(|part| scope.spawn(move || part.iter().try_for_each(work)))
                .collect();
            // Join every worker before looking at results.
            let joined: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();
            joined
                .into_iter()
                .try_for_each(|result| result.map_err(|_| ReconcileError::WorkerPanicked)?)
        })
    }
}

fn days_past_due(position: &Position) -> Result<u32, ReconcileError> {
    position.days_past_due.ok_or(ReconcileError::MissingData {
        position: position.id,
        field: "days_past_due",
    })
}
