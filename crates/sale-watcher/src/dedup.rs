//! Bounded memory of emitted sales.

use collection_core::types::{CandidateOrigin, SaleCandidate};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;

/// Insertion-ordered set of dedup keys.
///
/// Once the ledger holds more than `capacity` keys it drops the oldest until
/// `capacity / 2` remain.
#[derive(Debug, Clone)]
pub struct DedupLedger {
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            keys: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn has_any<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        keys.into_iter().any(|key| self.has(key))
    }

    /// Record a key. Returns `false` if it was already present; its position is kept.
    pub fn add(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
        if self.keys.len() > self.capacity {
            self.trim();
        }
        true
    }

    pub fn add_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.add(key);
        }
    }

    fn trim(&mut self) {
        let target = self.capacity / 2;
        while self.keys.len() > target {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.keys.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Key for a transfer log: unique per transaction and log position.
pub fn chain_key(tx_hash: &str, log_index: u64) -> String {
    format!("chain:{}:{}", tx_hash.to_lowercase(), log_index)
}

/// Key for a record that names its transaction.
pub fn tx_key(tx_hash: &str, token_id: &str) -> String {
    format!("tx:{}:{}", tx_hash.to_lowercase(), token_id)
}

/// Content hash over the stable fields of a record.
///
/// The record's own timestamp is included when present; the local clock never is.
pub fn content_key(
    token_id: Option<&str>,
    price: Option<&str>,
    seller: Option<&str>,
    buyer: Option<&str>,
    timestamp: Option<i64>,
) -> String {
    let normalized = [
        token_id.map(str::trim).unwrap_or_default().to_string(),
        price.map(normalize_price).unwrap_or_default(),
        seller.map(|s| s.trim().to_lowercase()).unwrap_or_default(),
        buyer.map(|b| b.trim().to_lowercase()).unwrap_or_default(),
        timestamp.map(|t| t.to_string()).unwrap_or_default(),
    ]
    .join("|");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("content:{}", &hex::encode(hasher.finalize())[..32])
}

/// `"1.50 eth"` and `"1.5 ETH"` normalize to the same string.
fn normalize_price(price: &str) -> String {
    let mut parts = price.split_whitespace();
    let amount = parts.next().unwrap_or_default();
    let amount = Decimal::from_str(amount)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|_| amount.to_string());
    let currency: Vec<String> = parts.map(str::to_uppercase).collect();
    if currency.is_empty() {
        amount
    } else {
        format!("{} {}", amount, currency.join(" "))
    }
}

/// Primary key and aliases for a scored candidate.
///
/// A chain transfer also answers to `tx:{hash}:{token}` so that a stream or API
/// record of the same sale is suppressed, and vice versa.
pub fn candidate_keys(candidate: &SaleCandidate) -> (String, Vec<String>) {
    match &candidate.origin {
        CandidateOrigin::Transfer(transfer) => {
            let primary = chain_key(&transfer.tx_hash, transfer.log_index);
            let aliases = transfer
                .token_id
                .as_deref()
                .map(|token| vec![tx_key(&transfer.tx_hash, token)])
                .unwrap_or_default();
            (primary, aliases)
        }
        CandidateOrigin::External {
            token_id,
            price,
            seller,
            buyer,
            tx_hash,
            timestamp,
        } => {
            let content = content_key(
                token_id.as_deref(),
                price.as_deref(),
                seller.as_deref(),
                buyer.as_deref(),
                *timestamp,
            );
            match (tx_hash, token_id) {
                (Some(hash), Some(token)) => (tx_key(hash, token), vec![content]),
                _ => (content, Vec::new()),
            }
        }
    }
}
