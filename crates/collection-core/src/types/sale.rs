//! Sale candidate and finalized sale event types.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::TransferRecord;

/// Placeholder for fields a source did not report.
pub const UNKNOWN: &str = "Unknown";

/// Number of decimals in the chain's native unit (wei per ether).
pub const NATIVE_DECIMALS: u32 = 18;

/// Where a sale was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleSource {
    Chain,
    #[default]
    Api,
    Scrape,
    Stream,
}

impl fmt::Display for SaleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaleSource::Chain => "chain",
            SaleSource::Api => "api",
            SaleSource::Scrape => "scrape",
            SaleSource::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// A price with its currency symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHint {
    pub amount: Decimal,
    pub currency: String,
}

impl PriceHint {
    /// Convert a wei amount into whole native units, e.g. `1.5 ETH`.
    pub fn from_wei(value: U256, unit: &str) -> Option<Self> {
        let wei: i128 = value.to_string().parse().ok()?;
        let amount = Decimal::try_from_i128_with_scale(wei, NATIVE_DECIMALS)
            .ok()?
            .normalize();
        Some(Self {
            amount,
            currency: unit.to_string(),
        })
    }
}

impl fmt::Display for PriceHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.normalize(), self.currency)
    }
}

/// What a candidate was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateOrigin {
    Transfer(TransferRecord),
    External {
        token_id: Option<String>,
        price: Option<String>,
        seller: Option<String>,
        buyer: Option<String>,
        tx_hash: Option<String>,
        timestamp: Option<i64>,
    },
}

/// Individual scoring signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaleSignal {
    Payment { wei: String, points: u32 },
    Marketplace { address: Address, points: u32 },
    EventFanOut { events: usize, points: u32 },
    HeavyExecution { gas_used: u64, points: u32 },
    StructuredRecord { points: u32 },
}

impl SaleSignal {
    pub fn points(&self) -> u32 {
        match self {
            SaleSignal::Payment { points, .. }
            | SaleSignal::Marketplace { points, .. }
            | SaleSignal::EventFanOut { points, .. }
            | SaleSignal::HeavyExecution { points, .. }
            | SaleSignal::StructuredRecord { points } => *points,
        }
    }
}

/// A scored candidate. Built once by the classifier and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleCandidate {
    pub origin: CandidateOrigin,
    pub price_hint: Option<PriceHint>,
    pub marketplace_address: Option<Address>,
    /// 0..=100.
    pub confidence_score: u32,
    pub signals: Vec<SaleSignal>,
    pub is_sale: bool,
    pub source: SaleSource,
}

impl SaleCandidate {
    pub fn token_id(&self) -> Option<&str> {
        match &self.origin {
            CandidateOrigin::Transfer(t) => t.token_id.as_deref(),
            CandidateOrigin::External { token_id, .. } => token_id.as_deref(),
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match &self.origin {
            CandidateOrigin::Transfer(t) => Some(t.tx_hash.as_str()),
            CandidateOrigin::External { tx_hash, .. } => tx_hash.as_deref(),
        }
    }

    /// Rendered price, `"Unknown"` when no price was observed.
    pub fn price_label(&self) -> String {
        if let Some(hint) = &self.price_hint {
            return hint.to_string();
        }
        match &self.origin {
            CandidateOrigin::External {
                price: Some(price), ..
            } => price.clone(),
            _ => UNKNOWN.to_string(),
        }
    }
}

/// A finalized, notification-worthy sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleEvent {
    pub dedup_key: String,
    /// Extra keys under which other tiers may report the same sale.
    pub alias_keys: Vec<String>,
    pub token_id: String,
    pub price: String,
    pub seller: String,
    pub buyer: String,
    pub tx_hash: Option<String>,
    pub marketplace: Option<String>,
    pub source: SaleSource,
    pub confidence: u32,
    pub observed_at: DateTime<Utc>,
}

impl SaleEvent {
    /// Primary key followed by aliases.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.dedup_key.as_str()).chain(self.alias_keys.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_from_wei() {
        let wei = U256::from(1_500_000_000_000_000_000u128);
        let hint = PriceHint::from_wei(wei, "ETH").unwrap();
        assert_eq!(hint.to_string(), "1.5 ETH");

        let tiny = PriceHint::from_wei(U256::from(1u64), "ETH").unwrap();
        assert_eq!(tiny.to_string(), "0.000000000000000001 ETH");
    }

    #[test]
    fn test_price_from_wei_overflow() {
        assert!(PriceHint::from_wei(U256::MAX, "ETH").is_none());
    }

    #[test]
    fn test_source_display() {
        assert_eq!(SaleSource::Chain.to_string(), "chain");
        assert_eq!(SaleSource::Scrape.to_string(), "scrape");
        assert_eq!(
            serde_json::to_string(&SaleSource::Stream).unwrap(),
            "\"stream\""
        );
    }

    #[test]
    fn test_external_price_label() {
        let candidate = SaleCandidate {
            origin: CandidateOrigin::External {
                token_id: Some("7".to_string()),
                price: Some("0.42 ETH".to_string()),
                seller: None,
                buyer: None,
                tx_hash: None,
                timestamp: None,
            },
            price_hint: None,
            marketplace_address: None,
            confidence_score: 100,
            signals: vec![SaleSignal::StructuredRecord { points: 100 }],
            is_sale: true,
            source: SaleSource::Api,
        };
        assert_eq!(candidate.price_label(), "0.42 ETH");
        assert_eq!(candidate.token_id(), Some("7"));
        assert_eq!(candidate.tx_hash(), None);
    }
}
