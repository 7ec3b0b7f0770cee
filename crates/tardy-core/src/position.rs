//! Positions as reported by the external source.
//!
//! A [`Position`] is a fresh snapshot; nothing here is cached between runs.

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of a position at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub i64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PositionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl From<i64> for PositionId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// One delinquent obligation as currently seen by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    /// Days past due; `None` when the source did not report it.
    #[serde(default)]
    pub days_past_due: Option<u32>,
    /// The position is in a terminal, defaulted state.
    #[serde(default)]
    pub defaulted: bool,
    #[serde(default)]
    pub unpaid_amount: Decimal,
    #[serde(default)]
    pub unpaid_instalments: u32,
}

impl Position {
    /// A non-defaulted position `days` past due with nothing else known.
    #[must_use]
    pub const fn overdue(id: i64, days: u32) -> Self {
        Self {
            id: PositionId(id),
            days_past_due: Some(days),
            defaulted: false,
            unpaid_amount: Decimal::ZERO,
            unpaid_instalments: 0,
        }
    }

    #[must_use]
    pub const fn with_defaulted(mut self, defaulted: bool) -> Self {
        self.defaulted = defaulted;
        self
    }

    #[must_use]
    pub const fn with_unpaid(mut self, amount: Decimal, instalments: u32) -> Self {
        self.unpaid_amount = amount;
        self.unpaid_instalments = instalments;
        self
    }

    /// Nothing is owed any more: the position left delinquency by being repaid.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.unpaid_amount.is_zero() && self.unpaid_instalments == 0
    }

    /// First day of the current delinquency, counted back from `today`.
    #[must_use]
    pub fn delinquent_since(&self, today: NaiveDate) -> Option<NaiveDate> {
        let days = self.days_past_due?;
        today.checked_sub_days(Days::new(u64::from(days)))
    }
}

/// Secondary-market sale terms for a position.
///
/// Fetching these is expensive, so they are only looked up for events that
/// somebody listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleInfo {
    pub price: Decimal,
    pub fee: Decimal,
    pub discount: Decimal,
}
