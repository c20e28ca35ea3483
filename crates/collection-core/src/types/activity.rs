//! Normalized activity entries from marketplace APIs, pages and streams.

use serde::{Deserialize, Serialize};

use super::SaleSource;

/// A marketplace activity entry after tolerant field mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub token_id: Option<String>,
    /// Price as reported by the source, already scaled to whole units.
    pub price: Option<String>,
    pub currency: Option<String>,
    pub seller: Option<String>,
    pub buyer: Option<String>,
    /// Unix seconds reported by the source.
    pub timestamp: Option<i64>,
    pub tx_hash: Option<String>,
    pub source: SaleSource,
}

impl ActivityRecord {
    /// Both fields a secondary record needs to count as a sale.
    pub fn has_sale_fields(&self) -> bool {
        self.token_id.as_deref().is_some_and(|t| !t.is_empty())
            && self.price.as_deref().is_some_and(|p| !p.is_empty())
    }
}
