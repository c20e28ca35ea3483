//! Ownership transfer types decoded from chain logs.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// `keccak256("Transfer(address,address,uint256)")`, shared by ERC-721 and ERC-20.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// One ownership change of a collection item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Decimal token id. Missing only when the log carried no id at all.
    pub token_id: Option<String>,
    pub from: Address,
    pub to: Address,
    pub block_number: u64,
    /// Lowercase `0x`-prefixed transaction hash.
    pub tx_hash: String,
    pub log_index: u64,
    /// Set when `from` is the zero address.
    pub is_mint: bool,
}

impl TransferRecord {
    /// Token id for display, `"Unknown"` when the log did not carry one.
    pub fn token_label(&self) -> &str {
        self.token_id.as_deref().unwrap_or("Unknown")
    }
}

/// Transaction-level facts the classifier scores a transfer against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionContext {
    /// Native value attached to the transaction, in wei.
    pub value: U256,
    /// Destination of the transaction; `None` for contract creation.
    pub to: Option<Address>,
    /// Whether the destination has deployed code.
    pub to_is_contract: bool,
    /// Number of logs emitted by the transaction.
    pub event_count: usize,
    pub gas_used: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_label() {
        let mut record = TransferRecord {
            token_id: None,
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            block_number: 1,
            tx_hash: "0x01".to_string(),
            log_index: 0,
            is_mint: false,
        };
        assert_eq!(record.token_label(), "Unknown");

        record.token_id = Some("42".to_string());
        assert_eq!(record.token_label(), "42");
    }
}
