//! Delinquency events emitted by a reconciliation run.
//!
//! String representation follows the `delinquency.<stage>` dotted convention
//! used in logs and on the CLI's JSON output.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::position::{Position, SaleInfo};

/// The seven event kinds this crate can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Position became overdue.
    NowDelinquent,
    Delinquent10DaysOrMore,
    Delinquent30DaysOrMore,
    Delinquent60DaysOrMore,
    Delinquent90DaysOrMore,
    /// Position entered the terminal defaulted state.
    Defaulted,
    /// Position left delinquency without being repaid in full.
    NoLongerDelinquent,
}

/// Where a fired event is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    /// Process-wide, not tied to any tenant.
    Global,
    /// Belongs to the tenant whose portfolio is being reconciled.
    Session,
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind '{raw}': expected one of {}", EventKind::catalog())]
pub struct UnknownEventKind {
    pub raw: String,
}

impl EventKind {
    /// All known kinds in catalog order.
    pub const ALL: [Self; 7] = [
        Self::NowDelinquent,
        Self::Delinquent10DaysOrMore,
        Self::Delinquent30DaysOrMore,
        Self::Delinquent60DaysOrMore,
        Self::Delinquent90DaysOrMore,
        Self::Defaulted,
        Self::NoLongerDelinquent,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NowDelinquent => "delinquency.new",
            Self::Delinquent10DaysOrMore => "delinquency.10plus",
            Self::Delinquent30DaysOrMore => "delinquency.30plus",
            Self::Delinquent60DaysOrMore => "delinquency.60plus",
            Self::Delinquent90DaysOrMore => "delinquency.90plus",
            Self::Defaulted => "delinquency.defaulted",
            Self::NoLongerDelinquent => "delinquency.cured",
        }
    }

    /// Every delinquency event belongs to the tenant being reconciled.
    #[must_use]
    pub const fn scope(self) -> EventScope {
        match self {
            Self::NowDelinquent
            | Self::Delinquent10DaysOrMore
            | Self::Delinquent30DaysOrMore
            | Self::Delinquent60DaysOrMore
            | Self::Delinquent90DaysOrMore
            | Self::Defaulted
            | Self::NoLongerDelinquent => EventScope::Session,
        }
    }

    fn catalog() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind { raw: s.to_string() })
    }
}

// Serialize as the dotted string.
impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A fully-built event, ready for a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub position: Position,
    /// First day of the delinquency; absent for [`EventKind::NoLongerDelinquent`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_info: Option<SaleInfo>,
}

impl Event {
    #[must_use]
    pub const fn new(kind: EventKind, position: Position) -> Self {
        Self {
            kind,
            position,
            since: None,
            sale_info: None,
        }
    }
}
