//! The delinquency category lattice.
//!
//! Five day-based categories form a total order by threshold:
//!
//! | Category | Days past due | Event |
//! |---|---|---|
//! | `New` | 0 | `delinquency.new` |
//! | `Mild` | 10 | `delinquency.10plus` |
//! | `Severe` | 30 | `delinquency.30plus` |
//! | `Critical` | 60 | `delinquency.60plus` |
//! | `Hopeless` | 90 | `delinquency.90plus` |
//!
//! `Defaulted` sits outside the chain. A position may be defaulted and at
//! any day-based stage at the same time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReconcileError, SourceError};
use crate::event::{Event, EventKind};
use crate::position::{Position, SaleInfo};
use crate::source::PositionSource;
use crate::transaction::Transaction;

/// A severity label a position can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    New,
    Mild,
    Severe,
    Critical,
    Hopeless,
    Defaulted,
}

impl Category {
    /// Every category, day-based chain first.
    pub const ALL: [Self; 6] = [
        Self::New,
        Self::Mild,
        Self::Severe,
        Self::Critical,
        Self::Hopeless,
        Self::Defaulted,
    ];

    /// The day-based chain in ascending threshold order.
    pub const DAY_BASED: [Self; 5] = [
        Self::New,
        Self::Mild,
        Self::Severe,
        Self::Critical,
        Self::Hopeless,
    ];

    /// Minimum days past due for this category; `-1` for `Defaulted`, which is
    /// not comparable by day count.
    #[must_use]
    pub const fn threshold_in_days(self) -> i32 {
        match self {
            Self::New => 0,
            Self::Mild => 10,
            Self::Severe => 30,
            Self::Critical => 60,
            Self::Hopeless => 90,
            Self::Defaulted => -1,
        }
    }

    #[must_use]
    pub const fn is_day_based(self) -> bool {
        !matches!(self, Self::Defaulted)
    }

    /// Day-based categories strictly below this one, ascending.
    #[must_use]
    pub const fn lesser_categories(self) -> &'static [Self] {
        match self {
            Self::New | Self::Defaulted => &[],
            Self::Mild => &[Self::New],
            Self::Severe => &[Self::New, Self::Mild],
            Self::Critical => &[Self::New, Self::Mild, Self::Severe],
            Self::Hopeless => &[Self::New, Self::Mild, Self::Severe, Self::Critical],
        }
    }

    /// Highest day-based category a position `days` past due qualifies for.
    #[must_use]
    pub fn for_days(days: u32) -> Self {
        Self::DAY_BASED
            .into_iter()
            .rev()
            .find(|category| category.admits(days))
            .unwrap_or(Self::New)
    }

    /// Whether a position `days` past due has reached this category.
    /// Always false for `Defaulted`.
    #[must_use]
    pub fn admits(self, days: u32) -> bool {
        u32::try_from(self.threshold_in_days()).is_ok_and(|threshold| threshold <= days)
    }

    /// Key of this category's membership set in the state store.
    #[must_use]
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::New => "delinquent",
            Self::Mild => "delinquent10plus",
            Self::Severe => "delinquent30plus",
            Self::Critical => "delinquent60plus",
            Self::Hopeless => "delinquent90plus",
            Self::Defaulted => "defaulted",
        }
    }

    /// Kind of event fired when a position crosses into this category.
    #[must_use]
    pub const fn event_kind(self) -> EventKind {
        match self {
            Self::New => EventKind::NowDelinquent,
            Self::Mild => EventKind::Delinquent10DaysOrMore,
            Self::Severe => EventKind::Delinquent30DaysOrMore,
            Self::Critical => EventKind::Delinquent60DaysOrMore,
            Self::Hopeless => EventKind::Delinquent90DaysOrMore,
            Self::Defaulted => EventKind::Defaulted,
        }
    }

    /// Build the event for `position` having just entered this category.
    ///
    /// `extra` performs the sale-info lookup and is only called here, so the
    /// caller decides whether the lookup happens at all.
    ///
    /// # Errors
    ///
    /// Propagates the error of the sale-info lookup.
    pub fn build_event<F>(
        self,
        position: Position,
        since: NaiveDate,
        extra: F,
    ) -> Result<Event, SourceError>
    where
        F: FnOnce() -> Result<Option<SaleInfo>, SourceError>,
    {
        Ok(Event {
            kind: self.event_kind(),
            position,
            since: Some(since),
            sale_info: extra()?,
        })
    }

    /// Queue this category's event for `position` on the transaction.
    ///
    /// Nothing is queued when no listener is registered for the event kind.
    /// The sale-info lookup runs at commit time, never here.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MissingData`] when the position carries no
    /// days-past-due figure to date the event from.
    pub fn process<'a>(
        self,
        tx: &Transaction<'a>,
        position: &Position,
        today: NaiveDate,
        source: &'a dyn PositionSource,
    ) -> Result<(), ReconcileError> {
        let since = position
            .delinquent_since(today)
            .ok_or(ReconcileError::MissingData {
                position: position.id,
                field: "days_past_due",
            })?;
        let kind = self.event_kind();
        if !tx.listens(kind) {
            tracing::trace!(position = %position.id, %kind, "no listener, event not queued");
            return Ok(());
        }
        let position = position.clone();
        tx.fire_lazy(kind, move || {
            let id = position.id;
            self.build_event(position, since, || source.sale_info(id))
        });
        Ok(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Mild => "mild",
            Self::Severe => "severe",
            Self::Critical => "critical",
            Self::Hopeless => "hopeless",
            Self::Defaulted => "defaulted",
        };
        f.write_str(name)
    }
}
