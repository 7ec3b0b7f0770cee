//! Multi-run lifecycle tests: thresholds crossed over time, defaults, cures,
//! aborted runs and laziness of the sale-info lookup.
//!
//! Event order between independently processed positions is not asserted;
//! only that each expected event appears exactly once.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tardy_core::config::ReconcileConfig;
use tardy_core::{
    Category, EventKind, MemorySource, MemoryStateStore, Position, PositionId, ReconcileError,
    Reconciler, RecordingSink, Registry, RunOutcome, SaleInfo, SqliteStateStore, StateStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TENANT: &str = "alice";
const NS: &str = "alice/delinquency";

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.checked_add_days(chrono::Days::new(u64::from(n))))
        .expect("valid date")
}

fn workers(n: usize) -> ReconcileConfig {
    ReconcileConfig {
        workers: n,
        ..ReconcileConfig::default()
    }
}

fn categories(store: &dyn StateStore, id: i64) -> Vec<Category> {
    Registry::load(store, NS)
        .expect("load registry")
        .categories_of(PositionId(id))
        .into_iter()
        .collect()
}

/// Seed the tenant with an empty snapshot so later runs are steady-state.
fn initialize(source: &MemorySource, store: &dyn StateStore, sink: &RecordingSink) {
    source.set_snapshot(vec![]);
    let report = Reconciler::new(source, store, sink)
        .reconcile(TENANT, day(0))
        .expect("seed run");
    assert_eq!(report.outcome, RunOutcome::Seeded);
}

// ---------------------------------------------------------------------------
// Threshold crossings
// ---------------------------------------------------------------------------

#[test]
fn one_event_per_threshold_crossing() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    let expected = [
        (0, EventKind::NowDelinquent),
        (15, EventKind::Delinquent10DaysOrMore),
        (35, EventKind::Delinquent30DaysOrMore),
        (65, EventKind::Delinquent60DaysOrMore),
        (95, EventKind::Delinquent90DaysOrMore),
    ];
    for (days, kind) in expected {
        source.set_snapshot(vec![Position::overdue(7, days)]);
        reconciler.reconcile(TENANT, day(days)).expect("run");
        let delivered = sink.take();
        assert_eq!(delivered.len(), 1, "exactly one event at {days} days");
        assert_eq!(delivered[0].event.kind, kind);
    }

    // Re-running at the same or higher day count never repeats anything.
    for days in [95, 120, 400] {
        source.set_snapshot(vec![Position::overdue(7, days)]);
        reconciler.reconcile(TENANT, day(days)).expect("run");
    }
    assert!(sink.is_empty(), "nothing fires beyond hopeless");
    assert_eq!(categories(&store, 7).len(), 5);
}

#[test]
fn threshold_events_carry_kind_and_since_date() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(7, 12)]);
    reconciler.reconcile(TENANT, day(40)).expect("run");

    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].tenant.as_deref(), Some(TENANT));
    assert_eq!(delivered[0].event.kind, EventKind::Delinquent10DaysOrMore);
    assert_eq!(delivered[0].event.since, Some(day(28)));
}

#[test]
fn day_count_dropping_back_does_not_demote_or_fire() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(3, 40)]);
    reconciler.reconcile(TENANT, day(40)).expect("run");
    assert_eq!(sink.take().len(), 1);

    source.set_snapshot(vec![Position::overdue(3, 2)]);
    reconciler.reconcile(TENANT, day(41)).expect("run");
    assert!(sink.is_empty());
    assert_eq!(
        categories(&store, 3),
        vec![Category::New, Category::Mild, Category::Severe]
    );
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

#[test]
fn defaulted_fires_once_and_coexists_with_hopeless() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(9, 95)]);
    reconciler.reconcile(TENANT, day(95)).expect("run");
    assert_eq!(sink.kinds_for(9), vec![EventKind::Delinquent90DaysOrMore]);
    sink.take();

    for days in [100, 130, 160] {
        source.set_snapshot(vec![Position::overdue(9, days).with_defaulted(true)]);
        reconciler.reconcile(TENANT, day(days)).expect("run");
    }
    assert_eq!(sink.kinds_for(9), vec![EventKind::Defaulted]);
    assert_eq!(categories(&store, 9), Category::ALL.to_vec());
}

#[test]
fn defaulted_without_day_count_aborts_the_run() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);

    source.set_snapshot(vec![Position {
        days_past_due: None,
        ..Position::overdue(4, 0).with_defaulted(true)
    }]);
    let err = Reconciler::new(&source, &store, &sink)
        .reconcile(TENANT, day(10))
        .expect_err("missing day count");

    assert!(matches!(err, ReconcileError::MissingData { .. }));
    assert!(sink.is_empty());
    assert!(categories(&store, 4).is_empty());
}

// ---------------------------------------------------------------------------
// Cures
// ---------------------------------------------------------------------------

#[test]
fn cure_with_unpaid_amount_fires_and_uses_fresh_position() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(5, 20), Position::overdue(6, 20)]);
    reconciler.reconcile(TENANT, day(20)).expect("run");
    sink.take();

    let unpaid = Position::overdue(5, 0).with_unpaid(Decimal::new(12_345, 2), 2);
    source.upsert(unpaid.clone());
    source.upsert(Position::overdue(6, 0));
    source.set_snapshot(vec![]);
    let report = reconciler.reconcile(TENANT, day(21)).expect("run");

    assert_eq!(report.cured, 2);
    assert_eq!(report.repaid, 1);
    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].event.kind, EventKind::NoLongerDelinquent);
    assert_eq!(delivered[0].event.position, unpaid);
    assert!(categories(&store, 5).is_empty());
    assert!(categories(&store, 6).is_empty());
}

#[test]
fn expired_positions_are_dropped_silently_but_stay_tracked() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(8, 3)]);
    reconciler.reconcile(TENANT, day(3)).expect("run");
    sink.take();

    source.forget(PositionId(8));
    let report = reconciler.reconcile(TENANT, day(4)).expect("run");
    assert_eq!(report.cured, 0);
    assert_eq!(report.unresolved, 1);
    assert!(sink.is_empty());
    assert_eq!(categories(&store, 8), vec![Category::New]);

    // Still unresolved on the next run, and still counted.
    let report = reconciler.reconcile(TENANT, day(5)).expect("run");
    assert_eq!(report.unresolved, 1);
}

#[test]
fn relapse_after_cure_is_reported_again() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(2, 11)]);
    reconciler.reconcile(TENANT, day(11)).expect("run");
    source.set_snapshot(vec![]);
    reconciler.reconcile(TENANT, day(12)).expect("cure");
    source.set_snapshot(vec![Position::overdue(2, 1)]);
    reconciler.reconcile(TENANT, day(40)).expect("relapse");

    assert_eq!(
        sink.kinds_for(2),
        vec![
            EventKind::Delinquent10DaysOrMore,
            EventKind::NoLongerDelinquent,
            EventKind::NowDelinquent,
        ]
    );
}

// ---------------------------------------------------------------------------
// All-or-nothing
// ---------------------------------------------------------------------------

#[test]
fn failure_after_promotions_commits_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = dir.path().join("tardy.sqlite3");
    let source = MemorySource::new();
    let sink = RecordingSink::listening_to_all();
    {
        let store = SqliteStateStore::open(&db).expect("open");
        initialize(&source, &store, &sink);
    }

    source.set_snapshot(vec![
        Position::overdue(1, 15),
        Position::overdue(2, 35),
        Position::overdue(3, 65),
        Position {
            days_past_due: None,
            ..Position::overdue(4, 0)
        },
    ]);
    {
        let store = SqliteStateStore::open(&db).expect("open");
        let err = Reconciler::new(&source, &store, &sink)
            .with_config(workers(1))
            .reconcile(TENANT, day(70))
            .expect_err("position 4 lacks data");
        assert!(matches!(err, ReconcileError::MissingData { .. }));
    }

    let store = SqliteStateStore::open(&db).expect("reopen");
    for id in 1..=3 {
        assert!(categories(&store, id).is_empty(), "position {id} leaked");
    }
    assert!(sink.is_empty());
}

#[test]
fn store_failure_mid_commit_persists_no_category() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = dir.path().join("tardy.sqlite3");
    let source = MemorySource::new();
    let sink = RecordingSink::listening_to_all();
    {
        let store = SqliteStateStore::open(&db).expect("open");
        initialize(&source, &store, &sink);
    }
    rusqlite::Connection::open(&db)
        .expect("raw connection")
        .execute_batch(
            "CREATE TRIGGER reject_critical_insert BEFORE INSERT ON state_entries
             WHEN NEW.key = 'delinquent60plus'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;
             CREATE TRIGGER reject_critical_update BEFORE UPDATE ON state_entries
             WHEN NEW.key = 'delinquent60plus'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .expect("install failing trigger");

    source.set_snapshot(vec![
        Position::overdue(1, 15),
        Position::overdue(2, 35),
        Position::overdue(3, 65),
    ]);
    {
        let store = SqliteStateStore::open(&db).expect("open");
        let err = Reconciler::new(&source, &store, &sink)
            .reconcile(TENANT, day(70))
            .expect_err("critical write fails");
        assert!(matches!(err, ReconcileError::Store(_)));
    }

    let store = SqliteStateStore::open(&db).expect("reopen");
    for id in 1..=3 {
        assert!(categories(&store, id).is_empty(), "position {id} leaked");
    }
    assert!(sink.is_empty());
}

#[test]
fn source_outage_commits_nothing_and_next_run_recovers() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink);

    source.set_snapshot(vec![Position::overdue(1, 31)]);
    source.set_outage(Some("gateway timeout"));
    assert!(matches!(
        reconciler.reconcile(TENANT, day(31)),
        Err(ReconcileError::Source(_))
    ));
    assert!(sink.is_empty());

    source.set_outage(None);
    reconciler.reconcile(TENANT, day(32)).expect("retry");
    assert_eq!(sink.kinds_for(1), vec![EventKind::Delinquent30DaysOrMore]);
}

// ---------------------------------------------------------------------------
// Laziness
// ---------------------------------------------------------------------------

#[test]
fn sale_info_is_only_fetched_for_listened_events() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to([EventKind::Defaulted]);
    initialize(&source, &store, &sink);

    let sale = SaleInfo {
        price: Decimal::new(800, 0),
        fee: Decimal::new(8, 0),
        discount: Decimal::new(20, 2),
    };
    source.set_sale_info(PositionId(2), sale.clone());
    source.set_snapshot(vec![
        Position::overdue(1, 45),
        Position::overdue(2, 100).with_defaulted(true),
    ]);
    let report = Reconciler::new(&source, &store, &sink)
        .reconcile(TENANT, day(100))
        .expect("run");

    assert_eq!(report.promoted, 1, "state still tracks the promotion");
    assert_eq!(source.sale_lookups(), 1);
    let delivered = sink.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].event.sale_info, Some(sale));
    assert_eq!(categories(&store, 1).len(), 3);
}

// ---------------------------------------------------------------------------
// Parallel workers
// ---------------------------------------------------------------------------

#[test]
fn parallel_workers_fire_each_event_exactly_once() {
    let source = MemorySource::new();
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    initialize(&source, &store, &sink);
    let reconciler = Reconciler::new(&source, &store, &sink).with_config(workers(8));

    let positions: Vec<Position> = (0..200).map(|id| Position::overdue(id, 12)).collect();
    source.set_snapshot(positions);
    let report = reconciler.reconcile(TENANT, day(12)).expect("run");

    assert_eq!(report.promoted, 200);
    assert_eq!(sink.len(), 200);
    for id in 0..200 {
        assert_eq!(sink.kinds_for(id), vec![EventKind::Delinquent10DaysOrMore]);
    }

    reconciler.reconcile(TENANT, day(13)).expect("rerun");
    assert_eq!(sink.len(), 200, "second run adds nothing");
}

#[test]
fn tenants_do_not_share_state() {
    let source = MemorySource::with_snapshot(vec![Position::overdue(1, 12)]);
    let store = MemoryStateStore::new();
    let sink = RecordingSink::listening_to_all();
    let reconciler = Reconciler::new(&source, &store, &sink);

    reconciler.reconcile("alice", day(12)).expect("alice seeds");
    let bob = reconciler.reconcile("bob", day(12)).expect("bob seeds");
    assert_eq!(bob.outcome, RunOutcome::Seeded);
    assert!(sink.is_empty());
}
