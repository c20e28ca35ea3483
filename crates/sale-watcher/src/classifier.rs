//! Sale classification.
//!
//! A transfer only says an item changed hands. Whether it was paid for is
//! inferred from the surrounding transaction with an additive score; the
//! acceptance threshold is the single precision/recall knob.

use alloy_primitives::{Address, U256};
use collection_core::api::chain::parse_hex_u64;
use collection_core::api::ChainReader;
use collection_core::config::Config;
use collection_core::types::{
    ActivityRecord, CandidateOrigin, PriceHint, SaleCandidate, SaleSignal, SaleSource,
    TransactionContext, TransferRecord,
};
use collection_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Points awarded per signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Native value attached to the transaction.
    pub payment: u32,
    /// Destination is a contract other than the collection.
    pub marketplace: u32,
    /// More than [`ClassifierConfig::fan_out_events`] logs emitted.
    pub event_fan_out: u32,
    /// Gas used above [`ClassifierConfig::gas_threshold`].
    pub heavy_execution: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            payment: 40,
            marketplace: 30,
            event_fan_out: 15,
            heavy_execution: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub weights: ScoreWeights,
    /// Minimum score for a transfer to count as a sale.
    pub acceptance_threshold: u32,
    pub gas_threshold: u64,
    /// Event count that must be exceeded for the fan-out signal.
    pub fan_out_events: usize,
    pub native_unit: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            acceptance_threshold: 50,
            gas_threshold: 100_000,
            fan_out_events: 2,
            native_unit: "ETH".to_string(),
        }
    }
}

impl ClassifierConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            acceptance_threshold: config.watcher.acceptance_threshold,
            gas_threshold: config.watcher.gas_threshold,
            native_unit: config.chain.native_unit.clone(),
            ..Default::default()
        }
    }
}

/// Scores transfers and activity records.
#[derive(Debug, Clone)]
pub struct SaleClassifier {
    config: ClassifierConfig,
    collection: Address,
}

impl SaleClassifier {
    pub const MAX_SCORE: u32 = 100;

    pub fn new(config: ClassifierConfig, collection: Address) -> Self {
        Self { config, collection }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn collection(&self) -> Address {
        self.collection
    }

    /// Score a decoded transfer against its transaction. Mints yield `None`.
    pub fn score_transfer(
        &self,
        transfer: &TransferRecord,
        ctx: &TransactionContext,
    ) -> Option<SaleCandidate> {
        if transfer.is_mint {
            return None;
        }

        let weights = &self.config.weights;
        let mut signals = Vec::new();
        let mut price_hint = None;
        let mut marketplace_address = None;

        if !ctx.value.is_zero() {
            signals.push(SaleSignal::Payment {
                wei: ctx.value.to_string(),
                points: weights.payment,
            });
            price_hint = PriceHint::from_wei(ctx.value, &self.config.native_unit);
        }

        if let Some(to) = ctx.to {
            if ctx.to_is_contract && to != self.collection {
                signals.push(SaleSignal::Marketplace {
                    address: to,
                    points: weights.marketplace,
                });
                marketplace_address = Some(to);
            }
        }

        if ctx.event_count > self.config.fan_out_events {
            signals.push(SaleSignal::EventFanOut {
                events: ctx.event_count,
                points: weights.event_fan_out,
            });
        }

        if ctx.gas_used > self.config.gas_threshold {
            signals.push(SaleSignal::HeavyExecution {
                gas_used: ctx.gas_used,
                points: weights.heavy_execution,
            });
        }

        let confidence_score = signals
            .iter()
            .map(SaleSignal::points)
            .sum::<u32>()
            .min(Self::MAX_SCORE);

        Some(SaleCandidate {
            origin: CandidateOrigin::Transfer(transfer.clone()),
            price_hint,
            marketplace_address,
            confidence_score,
            signals,
            is_sale: confidence_score >= self.config.acceptance_threshold,
            source: SaleSource::Chain,
        })
    }

    /// Structured marketplace records are sales when they name a token and a price.
    pub fn score_activity(&self, record: &ActivityRecord) -> SaleCandidate {
        let is_sale = record.has_sale_fields();
        let signals = if is_sale {
            vec![SaleSignal::StructuredRecord {
                points: Self::MAX_SCORE,
            }]
        } else {
            Vec::new()
        };

        let price = record.price.as_ref().map(|p| match &record.currency {
            Some(currency) if !p.contains(' ') => format!("{} {}", p, currency),
            _ => p.clone(),
        });

        SaleCandidate {
            origin: CandidateOrigin::External {
                token_id: record.token_id.clone(),
                price,
                seller: record.seller.clone(),
                buyer: record.buyer.clone(),
                tx_hash: record.tx_hash.clone(),
                timestamp: record.timestamp,
            },
            price_hint: None,
            marketplace_address: None,
            confidence_score: if is_sale { Self::MAX_SCORE } else { 0 },
            signals,
            is_sale,
            source: record.source,
        }
    }
}

/// Assemble the transaction context for one transfer.
///
/// Missing transactions or receipts are classification errors; transport
/// failures are returned unchanged so the caller can abort the cycle.
pub async fn fetch_context(
    reader: &dyn ChainReader,
    tx_hash: &str,
    collection: Address,
) -> Result<TransactionContext> {
    let tx = reader
        .get_transaction(tx_hash)
        .await?
        .ok_or_else(|| Error::Classification(format!("transaction {} not found", tx_hash)))?;
    let receipt = reader
        .get_transaction_receipt(tx_hash)
        .await?
        .ok_or_else(|| Error::Classification(format!("receipt for {} not found", tx_hash)))?;

    let value = if tx.value.trim().is_empty() {
        U256::ZERO
    } else {
        tx.value.trim().parse::<U256>().map_err(|e| {
            Error::Classification(format!("bad value {:?} in {}: {}", tx.value, tx_hash, e))
        })?
    };

    let to = match tx.to.as_deref() {
        Some(raw) => Some(raw.parse::<Address>().map_err(|e| {
            Error::Classification(format!("bad destination {:?} in {}: {}", raw, tx_hash, e))
        })?),
        None => None,
    };

    let to_is_contract = match (&to, tx.to.as_deref()) {
        (Some(addr), _) if *addr == collection => true,
        (Some(_), Some(raw)) => has_code(&reader.get_code(raw).await?),
        _ => false,
    };

    let gas_used = parse_hex_u64(&receipt.gas_used).ok_or_else(|| {
        Error::Classification(format!("bad gasUsed {:?} in {}", receipt.gas_used, tx_hash))
    })?;

    let ctx = TransactionContext {
        value,
        to,
        to_is_contract,
        event_count: receipt.logs.len(),
        gas_used,
    };
    debug!(tx = %tx_hash, ?ctx, "Fetched transaction context");
    Ok(ctx)
}

fn has_code(code: &str) -> bool {
    let digits = code.trim().trim_start_matches("0x");
    !digits.is_empty() && digits.chars().any(|c| c != '0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_core::api::chain::{MockChainReader, RawLog, Transaction, TransactionReceipt};
    use collection_core::ErrorKind;

    fn collection() -> Address {
        Address::repeat_byte(0xcc)
    }

    fn market() -> Address {
        Address::repeat_byte(0x11)
    }

    fn transfer(from: Address) -> TransferRecord {
        TransferRecord {
            token_id: Some("5".to_string()),
            from,
            to: Address::repeat_byte(0xbb),
            block_number: 100,
            tx_hash: "0xfeed".to_string(),
            log_index: 0,
            is_mint: from == Address::ZERO,
        }
    }

    fn classifier() -> SaleClassifier {
        SaleClassifier::new(ClassifierConfig::default(), collection())
    }

    fn eth(whole_tenths: u64) -> U256 {
        U256::from(whole_tenths) * U256::from(100_000_000_000_000_000u64)
    }

    #[test]
    fn test_score_table() {
        struct Case {
            name: &'static str,
            ctx: TransactionContext,
            score: u32,
            is_sale: bool,
        }

        let cases = vec![
            Case {
                name: "plain transfer through the collection",
                ctx: TransactionContext {
                    value: U256::ZERO,
                    to: Some(collection()),
                    to_is_contract: true,
                    event_count: 1,
                    gas_used: 60_000,
                },
                score: 0,
                is_sale: false,
            },
            Case {
                name: "full marketplace sale",
                ctx: TransactionContext {
                    value: eth(15),
                    to: Some(market()),
                    to_is_contract: true,
                    event_count: 3,
                    gas_used: 120_000,
                },
                score: 100,
                is_sale: true,
            },
            Case {
                name: "payment only",
                ctx: TransactionContext {
                    value: eth(1),
                    to: Some(Address::repeat_byte(0x22)),
                    to_is_contract: false,
                    event_count: 1,
                    gas_used: 21_000,
                },
                score: 40,
                is_sale: false,
            },
            Case {
                name: "token-paid marketplace fill",
                ctx: TransactionContext {
                    value: U256::ZERO,
                    to: Some(market()),
                    to_is_contract: true,
                    event_count: 5,
                    gas_used: 250_000,
                },
                score: 60,
                is_sale: true,
            },
            Case {
                name: "exactly two events and threshold gas",
                ctx: TransactionContext {
                    value: U256::ZERO,
                    to: Some(market()),
                    to_is_contract: true,
                    event_count: 2,
                    gas_used: 100_000,
                },
                score: 30,
                is_sale: false,
            },
        ];

        let classifier = classifier();
        for case in cases {
            let candidate = classifier
                .score_transfer(&transfer(Address::repeat_byte(0xaa)), &case.ctx)
                .unwrap();
            assert_eq!(candidate.confidence_score, case.score, "{}", case.name);
            assert_eq!(candidate.is_sale, case.is_sale, "{}", case.name);
        }
    }

    #[test]
    fn test_full_sale_metadata() {
        let ctx = TransactionContext {
            value: eth(15),
            to: Some(market()),
            to_is_contract: true,
            event_count: 3,
            gas_used: 120_000,
        };

        let candidate = classifier()
            .score_transfer(&transfer(Address::repeat_byte(0xaa)), &ctx)
            .unwrap();

        assert_eq!(candidate.price_label(), "1.5 ETH");
        assert_eq!(candidate.marketplace_address, Some(market()));
        assert_eq!(candidate.signals.len(), 4);
        assert_eq!(candidate.source, SaleSource::Chain);
    }

    #[test]
    fn test_mint_never_scored() {
        let ctx = TransactionContext {
            value: eth(10),
            to: Some(market()),
            to_is_contract: true,
            event_count: 9,
            gas_used: 500_000,
        };
        assert!(classifier()
            .score_transfer(&transfer(Address::ZERO), &ctx)
            .is_none());
    }

    #[test]
    fn test_deterministic() {
        let ctx = TransactionContext {
            value: eth(3),
            to: Some(market()),
            to_is_contract: true,
            event_count: 4,
            gas_used: 90_000,
        };
        let classifier = classifier();
        let record = transfer(Address::repeat_byte(0xaa));

        let first = classifier.score_transfer(&record, &ctx).unwrap();
        let second = classifier.score_transfer(&record, &ctx).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_threshold_is_tunable() {
        let ctx = TransactionContext {
            value: eth(1),
            to: None,
            to_is_contract: false,
            event_count: 1,
            gas_used: 21_000,
        };
        let lenient = SaleClassifier::new(
            ClassifierConfig {
                acceptance_threshold: 40,
                ..Default::default()
            },
            collection(),
        );

        let candidate = lenient
            .score_transfer(&transfer(Address::repeat_byte(0xaa)), &ctx)
            .unwrap();
        assert!(candidate.is_sale);
    }

    #[test]
    fn test_activity_records() {
        let classifier = classifier();

        let complete = ActivityRecord {
            token_id: Some("77".to_string()),
            price: Some("0.8".to_string()),
            currency: Some("ETH".to_string()),
            source: SaleSource::Api,
            ..Default::default()
        };
        let candidate = classifier.score_activity(&complete);
        assert!(candidate.is_sale);
        assert_eq!(candidate.confidence_score, 100);
        assert_eq!(candidate.price_label(), "0.8 ETH");

        let no_price = ActivityRecord {
            token_id: Some("77".to_string()),
            source: SaleSource::Scrape,
            ..Default::default()
        };
        let candidate = classifier.score_activity(&no_price);
        assert!(!candidate.is_sale);
        assert_eq!(candidate.confidence_score, 0);
    }

    fn receipt(logs: usize, gas_hex: &str) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: "0xfeed".to_string(),
            gas_used: gas_hex.to_string(),
            status: Some("0x1".to_string()),
            logs: vec![RawLog::default(); logs],
        }
    }

    #[tokio::test]
    async fn test_fetch_context() {
        let mut reader = MockChainReader::new();
        reader.expect_get_transaction().returning(|_| {
            Ok(Some(Transaction {
                hash: "0xfeed".to_string(),
                from: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
                to: Some("0x1111111111111111111111111111111111111111".to_string()),
                value: "0x14d1120d7b160000".to_string(),
                ..Default::default()
            }))
        });
        reader
            .expect_get_transaction_receipt()
            .returning(|_| Ok(Some(receipt(3, "0x1d4c0"))));
        reader
            .expect_get_code()
            .times(1)
            .returning(|_| Ok("0x6080604052".to_string()));

        let ctx = fetch_context(&reader, "0xfeed", collection()).await.unwrap();
        assert_eq!(ctx.value, eth(15));
        assert_eq!(ctx.to, Some(market()));
        assert!(ctx.to_is_contract);
        assert_eq!(ctx.event_count, 3);
        assert_eq!(ctx.gas_used, 120_000);
    }

    #[tokio::test]
    async fn test_fetch_context_missing_receipt() {
        let mut reader = MockChainReader::new();
        reader.expect_get_transaction().returning(|_| {
            Ok(Some(Transaction {
                hash: "0xfeed".to_string(),
                value: "0x0".to_string(),
                ..Default::default()
            }))
        });
        reader
            .expect_get_transaction_receipt()
            .returning(|_| Ok(None));

        let err = fetch_context(&reader, "0xfeed", collection())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Classification);
    }

    #[tokio::test]
    async fn test_fetch_context_transport_failure_propagates() {
        let mut reader = MockChainReader::new();
        reader
            .expect_get_transaction()
            .returning(|_| Err(Error::Timeout("eth_getTransactionByHash".to_string())));

        let err = fetch_context(&reader, "0xfeed", collection())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_has_code() {
        assert!(!has_code("0x"));
        assert!(!has_code("0x0"));
        assert!(has_code("0x60806040"));
    }
}
