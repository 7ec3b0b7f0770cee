//! Snapshot files fed to `tardy reconcile`.
//!
//! ```json
//! {
//!   "positions": [{ "id": 7, "days_past_due": 12 }],
//!   "resolved": [{ "id": 3, "unpaid_amount": "40.00", "unpaid_instalments": 1 }],
//!   "sale_info": { "7": { "price": "1200.00", "fee": "12.00", "discount": "0" } }
//! }
//! ```
//!
//! `resolved` holds the current state of positions that are no longer
//! delinquent. A tracked id missing from both lists is treated as expired.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tardy_core::{MemorySource, Position, PositionId, SaleInfo};

#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    /// Positions currently delinquent.
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Positions that left delinquency, looked up when a tracked id is gone
    /// from `positions`.
    #[serde(default)]
    pub resolved: Vec<Position>,
    /// Enrichment data, looked up only when an event needs it.
    #[serde(default)]
    pub sale_info: BTreeMap<PositionId, SaleInfo>,
}

impl Snapshot {
    /// Read and parse a snapshot file.
    ///
    /// # Errors
    ///
    /// The file cannot be read or is not a valid snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }

    pub fn into_source(self) -> MemorySource {
        let source = MemorySource::new();
        for position in self.resolved {
            source.upsert(position);
        }
        // Loaded last so a delinquent entry wins over a stale resolved one.
        source.set_snapshot(self.positions);
        for (id, info) in self.sale_info {
            source.set_sale_info(id, info);
        }
        source
    }
}
