//! Transfer log decoding.
//!
//! Collections emit `Transfer` in several shapes: the standard ERC-721 layout
//! with all three arguments indexed, older contracts that put everything in
//! `data`, and hybrids that index only the two addresses.

use alloy_primitives::{Address, U256};
use collection_core::api::chain::{parse_hex_u64, RawLog};
use collection_core::types::TransferRecord;
use collection_core::{Error, Result};

const WORD: usize = 32;

/// Decode one raw log into a transfer record.
pub fn decode_transfer(log: &RawLog) -> Result<TransferRecord> {
    let (from, to, token_id) = decode_parties(log)?;

    if from == to {
        return Err(Error::undecodable(format!(
            "self-transfer {} in tx {}",
            from, log.transaction_hash
        )));
    }

    let block_number = parse_hex_u64(&log.block_number).ok_or_else(|| {
        Error::undecodable(format!("bad block number {:?}", log.block_number))
    })?;
    let log_index = parse_hex_u64(&log.log_index)
        .ok_or_else(|| Error::undecodable(format!("bad log index {:?}", log.log_index)))?;

    let tx_hash = log.transaction_hash.trim().to_lowercase();
    if tx_hash.len() < 3 || !tx_hash.starts_with("0x") {
        return Err(Error::undecodable(format!(
            "bad transaction hash {:?}",
            log.transaction_hash
        )));
    }

    Ok(TransferRecord {
        token_id,
        is_mint: from == Address::ZERO,
        from,
        to,
        block_number,
        tx_hash,
        log_index,
    })
}

fn decode_parties(log: &RawLog) -> Result<(Address, Address, Option<String>)> {
    // Standard indexed triple. Never falls through to `data`.
    if log.topics.len() >= 4 {
        let from = topic_address(&log.topics[1])?;
        let to = topic_address(&log.topics[2])?;
        let token_id = word_to_decimal(&hex_word(&log.topics[3])?);
        return Ok((from, to, Some(token_id)));
    }

    // Malformed `data` only rules out the data-based decodes.
    let data = hex_bytes(&log.data).unwrap_or_default();

    if !data.is_empty() {
        if let Some(decoded) = decode_data_triple(&data) {
            return Ok(decoded);
        }
    }

    if log.topics.len() >= 3 {
        let from = topic_address(&log.topics[1])?;
        let to = topic_address(&log.topics[2])?;
        let token_id = (data.len() == WORD).then(|| word_to_decimal(&data));
        return Ok((from, to, token_id));
    }

    Err(Error::undecodable(format!(
        "{} topics and {} data bytes in tx {}",
        log.topics.len(),
        data.len(),
        log.transaction_hash
    )))
}

/// Fixed-width ABI `(address, address, uint256)`.
fn decode_data_triple(data: &[u8]) -> Option<(Address, Address, Option<String>)> {
    if data.len() < 3 * WORD {
        return None;
    }
    let from = word_address(&data[..WORD])?;
    let to = word_address(&data[WORD..2 * WORD])?;
    let token_id = word_to_decimal(&data[2 * WORD..3 * WORD]);
    Some((from, to, Some(token_id)))
}

/// Lower 20 bytes of an indexed topic.
fn topic_address(topic: &str) -> Result<Address> {
    let word = hex_word(topic)?;
    Ok(Address::from_slice(&word[12..]))
}

/// Lower 20 bytes of a data word; the upper 12 must be zero padding.
fn word_address(word: &[u8]) -> Option<Address> {
    if word.len() != WORD || word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}

fn word_to_decimal(word: &[u8]) -> String {
    U256::from_be_slice(word).to_string()
}

fn hex_word(value: &str) -> Result<Vec<u8>> {
    let bytes = hex_bytes(value)?;
    if bytes.len() > WORD {
        return Err(Error::undecodable(format!("topic {} is longer than a word", value)));
    }
    // Left-pad short topics such as `0x05`.
    let mut word = vec![0u8; WORD - bytes.len()];
    word.extend_from_slice(&bytes);
    Ok(word)
}

fn hex_bytes(value: &str) -> Result<Vec<u8>> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(Vec::new());
    }
    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{}", digits);
        padded.as_str()
    } else {
        digits
    };
    hex::decode(digits).map_err(|e| Error::undecodable(format!("invalid hex {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_core::types::TRANSFER_TOPIC;
    use collection_core::ErrorKind;

    const AAA: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BBB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn pad(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn word(value: u64) -> String {
        format!("{:064x}", value)
    }

    fn log(topics: Vec<String>, data: &str) -> RawLog {
        RawLog {
            address: "0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d".to_string(),
            topics,
            data: data.to_string(),
            block_number: "0x64".to_string(),
            transaction_hash: "0xABCDEF".to_string(),
            log_index: "0x2".to_string(),
        }
    }

    #[test]
    fn test_indexed_triple() {
        let raw = log(
            vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(BBB), "0x05".to_string()],
            "0x",
        );

        let record = decode_transfer(&raw).unwrap();
        assert_eq!(record.from, AAA.parse::<Address>().unwrap());
        assert_eq!(record.to, BBB.parse::<Address>().unwrap());
        assert_eq!(record.token_id.as_deref(), Some("5"));
        assert_eq!(record.block_number, 100);
        assert_eq!(record.log_index, 2);
        assert_eq!(record.tx_hash, "0xabcdef");
        assert!(!record.is_mint);
    }

    #[test]
    fn test_four_topics_ignore_data() {
        // Data encodes a different transfer; the indexed topics must win.
        let data = format!("0x{}{}{}", &pad(BBB)[2..], &pad(AAA)[2..], word(99));
        let raw = log(
            vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(BBB), pad("0x07")],
            &data,
        );

        let record = decode_transfer(&raw).unwrap();
        assert_eq!(record.from, AAA.parse::<Address>().unwrap());
        assert_eq!(record.token_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_data_triple() {
        let data = format!("0x{}{}{}", &pad(AAA)[2..], &pad(BBB)[2..], word(1234));
        let raw = log(vec![TRANSFER_TOPIC.to_string()], &data);

        let record = decode_transfer(&raw).unwrap();
        assert_eq!(record.from, AAA.parse::<Address>().unwrap());
        assert_eq!(record.to, BBB.parse::<Address>().unwrap());
        assert_eq!(record.token_id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_indexed_pair_with_token_in_data() {
        let raw = log(
            vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(BBB)],
            &format!("0x{}", word(42)),
        );

        let record = decode_transfer(&raw).unwrap();
        assert_eq!(record.token_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_indexed_pair_without_token() {
        let raw = log(vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(BBB)], "0x");

        let record = decode_transfer(&raw).unwrap();
        assert_eq!(record.token_id, None);
        assert_eq!(record.token_label(), "Unknown");

        let raw = log(vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(BBB)], "0xzz");
        let record = decode_transfer(&raw).unwrap();
        assert_eq!(record.from, AAA.parse::<Address>().unwrap());
        assert_eq!(record.to, BBB.parse::<Address>().unwrap());
        assert_eq!(record.token_id, None);
    }

    #[test]
    fn test_mint_is_tagged() {
        let raw = log(
            vec![
                TRANSFER_TOPIC.to_string(),
                pad("0x0000000000000000000000000000000000000000"),
                pad(BBB),
                pad("0x01"),
            ],
            "0x",
        );

        let record = decode_transfer(&raw).unwrap();
        assert!(record.is_mint);
    }

    #[test]
    fn test_undecodable_logs() {
        let cases = vec![
            log(vec![TRANSFER_TOPIC.to_string()], "0x"),
            log(vec![TRANSFER_TOPIC.to_string(), pad(AAA)], "0x"),
            log(vec![TRANSFER_TOPIC.to_string()], "0x1234"),
            log(
                vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(AAA), pad("0x01")],
                "0x",
            ),
            log(
                vec![TRANSFER_TOPIC.to_string(), "0xnothex".to_string(), pad(BBB), pad("0x01")],
                "0x",
            ),
        ];

        for raw in cases {
            let err = decode_transfer(&raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UndecodableLog, "{:?}", raw.topics);
        }
    }

    #[test]
    fn test_bad_block_number() {
        let mut raw = log(
            vec![TRANSFER_TOPIC.to_string(), pad(AAA), pad(BBB), pad("0x01")],
            "0x",
        );
        raw.block_number = String::new();
        assert_eq!(
            decode_transfer(&raw).unwrap_err().kind(),
            ErrorKind::UndecodableLog
        );
    }
}
