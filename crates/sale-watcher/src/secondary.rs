//! Marketplace activity adapter.
//!
//! Tries a fixed list of activity endpoints and stops at the first one that
//! returns a non-empty array. When none do, the activity page is fetched and
//! its inline script payloads are searched for sale-shaped objects. Marketplaces
//! rename fields freely, so every field is read through an alias list.

use collection_core::api::MarketplaceSource;
use collection_core::config::{Config, SourceFlags};
use collection_core::types::{ActivityRecord, SaleSource};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TOKEN_ID_KEYS: &[&str] = &[
    "tokenId", "token_id", "tokenID", "nftId", "nft_id", "identifier", "tokenIndex",
];
const PRICE_KEYS: &[&str] = &[
    "price", "salePrice", "sale_price", "total_price", "totalPrice", "priceEth", "amount",
    "value", "payment",
];
const CURRENCY_KEYS: &[&str] = &["currency", "symbol", "paymentToken", "payment_token"];
const SELLER_KEYS: &[&str] = &[
    "seller", "from", "maker", "from_address", "fromAddress", "seller_address",
];
const BUYER_KEYS: &[&str] = &[
    "buyer", "to", "taker", "to_address", "toAddress", "buyer_address", "winner_account",
];
const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp", "time", "createdAt", "created_at", "event_timestamp", "blockTimestamp",
    "closing_date", "date",
];
const HASH_KEYS: &[&str] = &[
    "txHash", "tx_hash", "transactionHash", "transaction_hash", "hash", "transaction",
];
/// Containers some sources nest the token under.
const NESTED_KEYS: &[&str] = &["nft", "token", "asset", "item", "transaction"];
/// Wrappers around the activity array in API responses.
const WRAPPER_KEYS: &[&str] = &[
    "data", "items", "activities", "activity", "asset_events", "events", "sales", "results",
];
/// Script assignments that carry page state.
const STATE_ASSIGNMENTS: &[&str] = &[
    "window.__INITIAL_STATE__",
    "window.__NEXT_DATA__",
    "window.__APOLLO_STATE__",
    "window.__PRELOADED_STATE__",
    "__INITIAL_STATE__",
    "__PRELOADED_STATE__",
];
const ARRAY_KEY_HINTS: &[&str] = &["sale", "activity", "trade"];

const MAX_DEPTH: usize = 12;

/// Records returned by one adapter pass and the tier that produced them.
#[derive(Debug, Clone, Default)]
pub struct SecondaryFetch {
    pub records: Vec<ActivityRecord>,
    pub tier: Option<SaleSource>,
    /// Requests that failed during this pass.
    pub failures: u32,
}

/// Marketplace API and page-scrape fallback.
pub struct SecondarySource {
    client: Arc<dyn MarketplaceSource>,
    api_paths: Vec<String>,
    page_path: Option<String>,
}

impl SecondarySource {
    pub fn new(
        client: Arc<dyn MarketplaceSource>,
        api_paths: Vec<String>,
        page_path: Option<String>,
    ) -> Self {
        Self {
            client,
            api_paths,
            page_path,
        }
    }

    /// Build from configuration, substituting `{collection}` and `{slug}`.
    pub fn from_config(
        client: Arc<dyn MarketplaceSource>,
        config: &Config,
        sources: SourceFlags,
    ) -> Self {
        let collection = &config.collection.address;
        let slug = config.collection.slug.as_deref().unwrap_or(collection);
        let expand = |path: &str| path.replace("{collection}", collection).replace("{slug}", slug);

        let api_paths = if sources.marketplace_api {
            config.marketplace.api_paths.iter().map(|p| expand(p)).collect()
        } else {
            Vec::new()
        };
        let page_path = if sources.page_scrape {
            config.marketplace.page_path.as_deref().map(expand)
        } else {
            None
        };

        Self::new(client, api_paths, page_path)
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_paths.is_empty() || self.page_path.is_some()
    }

    /// Fetch activity. Never fails: absence of data is an empty result.
    pub async fn fetch_activity(&self) -> SecondaryFetch {
        let mut failures = 0;

        for path in &self.api_paths {
            match self.client.fetch_json(path).await {
                Ok(body) => {
                    let Some(entries) = activity_array(&body) else {
                        debug!(path = %path, "Activity endpoint returned no entries");
                        continue;
                    };
                    let records: Vec<ActivityRecord> = entries
                        .iter()
                        .filter_map(|entry| parse_activity_entry(entry, SaleSource::Api))
                        .collect();
                    info!(
                        path = %path,
                        entries = entries.len(),
                        records = records.len(),
                        "Fetched marketplace activity"
                    );
                    return SecondaryFetch {
                        records,
                        tier: Some(SaleSource::Api),
                        failures,
                    };
                }
                Err(e) => {
                    failures += 1;
                    debug!(path = %path, error = %e, "Activity endpoint failed");
                }
            }
        }

        if let Some(page_path) = &self.page_path {
            match self.client.fetch_page(page_path).await {
                Ok(html) => {
                    let records = scrape_page(&html);
                    if !records.is_empty() {
                        info!(
                            path = %page_path,
                            records = records.len(),
                            "Scraped marketplace activity page"
                        );
                    }
                    return SecondaryFetch {
                        tier: Some(SaleSource::Scrape),
                        records,
                        failures,
                    };
                }
                Err(e) => {
                    failures += 1;
                    warn!(path = %page_path, error = %e, "Activity page fetch failed");
                }
            }
        }

        SecondaryFetch {
            records: Vec::new(),
            tier: None,
            failures,
        }
    }
}

/// The activity array of an API response, if non-empty.
fn activity_array(body: &Value) -> Option<&Vec<Value>> {
    let array = match body {
        Value::Array(items) => Some(items),
        Value::Object(map) => WRAPPER_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array)),
        _ => None,
    }?;
    (!array.is_empty()).then_some(array)
}

/// Map one loosely-shaped activity object onto an [`ActivityRecord`].
pub fn parse_activity_entry(entry: &Value, source: SaleSource) -> Option<ActivityRecord> {
    let map = entry.as_object()?;

    let token_id = lookup(map, TOKEN_ID_KEYS, &scalar_string)
        .or_else(|| nested(map, |inner| lookup(inner, TOKEN_ID_KEYS, &scalar_string)));
    let (price, price_currency) = lookup(map, PRICE_KEYS, &price_value)
        .or_else(|| nested(map, |inner| lookup(inner, PRICE_KEYS, &price_value)))
        .map(|(p, c)| (Some(p), c))
        .unwrap_or((None, None));
    let currency = price_currency
        .or_else(|| lookup(map, CURRENCY_KEYS, &currency_value))
        .or_else(|| nested(map, |inner| lookup(inner, CURRENCY_KEYS, &currency_value)));
    let seller = lookup(map, SELLER_KEYS, &party_value);
    let buyer = lookup(map, BUYER_KEYS, &party_value);
    let timestamp = lookup(map, TIMESTAMP_KEYS, &timestamp_value);
    let tx_hash = lookup(map, HASH_KEYS, &hash_value)
        .or_else(|| nested(map, |inner| lookup(inner, HASH_KEYS, &hash_value)));

    if token_id.is_none() && price.is_none() {
        return None;
    }

    Some(ActivityRecord {
        token_id,
        price,
        currency,
        seller,
        buyer,
        timestamp,
        tx_hash,
        source,
    })
}

fn lookup<T>(map: &Map<String, Value>, keys: &[&str], read: &dyn Fn(&Value) -> Option<T>) -> Option<T> {
    keys.iter().find_map(|key| map.get(*key).and_then(read))
}

fn nested<T>(
    map: &Map<String, Value>,
    read: impl Fn(&Map<String, Value>) -> Option<T>,
) -> Option<T> {
    NESTED_KEYS
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_object))
        .find_map(read)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Price as `(amount, currency)`. Objects with `decimals` are scaled.
fn price_value(value: &Value) -> Option<(String, Option<String>)> {
    match value {
        Value::Object(map) => {
            let raw = lookup(map, &["amount", "quantity", "value", "price", "total"], &scalar_string)?;
            let currency = lookup(map, CURRENCY_KEYS, &currency_value);
            let amount = match map.get("decimals").and_then(Value::as_u64) {
                Some(decimals) => scale_integer(&raw, decimals as u32).unwrap_or(raw),
                None => raw,
            };
            Some((amount, currency))
        }
        other => scalar_string(other).map(|amount| (amount, None)),
    }
}

fn scale_integer(raw: &str, decimals: u32) -> Option<String> {
    let units = i128::from_str(raw).ok()?;
    let amount = Decimal::try_from_i128_with_scale(units, decimals).ok()?;
    Some(amount.normalize().to_string())
}

fn currency_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => lookup(map, &["symbol", "name"], &scalar_string),
        _ => None,
    }
}

/// Addresses or usernames, possibly wrapped in an account object.
fn party_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => lookup(map, &["address", "username", "name", "id"], &scalar_string),
        other => scalar_string(other),
    }
}

fn hash_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.starts_with("0x") && s.len() == 66 => Some(s.to_lowercase()),
        Value::Object(map) => lookup(map, &["transaction_hash", "hash", "txHash"], &hash_value),
        _ => None,
    }
}

/// Unix seconds from numbers (seconds or milliseconds) or RFC 3339 strings.
fn timestamp_value(value: &Value) -> Option<i64> {
    let normalize = |n: i64| if n > 10_000_000_000 { n / 1000 } else { n };
    match value {
        Value::Number(n) => n.as_i64().map(normalize),
        Value::String(s) => {
            if let Ok(n) = s.parse::<i64>() {
                return Some(normalize(n));
            }
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp())
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|dt| dt.and_utc().timestamp())
                })
                .ok()
        }
        _ => None,
    }
}

/// Search every inline script of an activity page for sale records.
pub fn scrape_page(html: &str) -> Vec<ActivityRecord> {
    let mut records = Vec::new();
    for script in script_bodies(html) {
        for payload in script_payloads(script) {
            collect_records(&payload, 0, &mut records);
        }
    }
    records
}

/// Bodies of all `<script>` elements.
fn script_bodies(html: &str) -> Vec<&str> {
    let lower = html.to_ascii_lowercase();
    let mut bodies = Vec::new();
    let mut cursor = 0;

    while let Some(open) = lower[cursor..].find("<script") {
        let tag_start = cursor + open;
        let Some(tag_end) = lower[tag_start..].find('>') else {
            break;
        };
        let body_start = tag_start + tag_end + 1;
        let Some(close) = lower[body_start..].find("</script") else {
            break;
        };
        let body_end = body_start + close;
        bodies.push(&html[body_start..body_end]);
        cursor = body_end;
    }

    bodies
}

/// JSON values embedded in one script body.
fn script_payloads(script: &str) -> Vec<Value> {
    let trimmed = script.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return vec![value];
        }
    }

    let mut payloads = Vec::new();

    for marker in STATE_ASSIGNMENTS {
        let mut search_from = 0;
        while let Some(pos) = script[search_from..].find(marker) {
            let after = search_from + pos + marker.len();
            search_from = after;
            let rest = script[after..].trim_start();
            let Some(rest) = rest.strip_prefix('=') else {
                continue;
            };
            if let Some(value) = first_json_value(rest) {
                payloads.push(value);
            }
        }
        if !payloads.is_empty() {
            return payloads;
        }
    }

    for start in keyed_array_starts(script) {
        if let Some(value) = first_json_value(&script[start..]) {
            payloads.push(value);
        }
    }

    payloads
}

/// Parse the JSON value at the start of `text`, ignoring whatever follows it.
fn first_json_value(text: &str) -> Option<Value> {
    let text = text.trim_start();
    let text = text
        .strip_prefix("JSON.parse(")
        .map(|inner| inner.trim_start())
        .unwrap_or(text);

    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next()? {
        // `JSON.parse("...")` wraps the payload in a string literal.
        Ok(Value::String(inner)) => serde_json::from_str(&inner).ok(),
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

/// Offsets of `[` that open an array under a key mentioning sales, activity or trades.
fn keyed_array_starts(script: &str) -> Vec<usize> {
    let bytes = script.as_bytes();
    let mut starts = Vec::new();

    for (idx, _) in script.match_indices('[') {
        let mut i = idx;
        while i > 0 && bytes[i - 1].is_ascii_whitespace() {
            i -= 1;
        }
        if i == 0 || bytes[i - 1] != b':' {
            continue;
        }
        i -= 1;
        while i > 0 && bytes[i - 1].is_ascii_whitespace() {
            i -= 1;
        }
        if i == 0 || bytes[i - 1] != b'"' {
            continue;
        }
        let key_end = i - 1;
        let Some(key_start) = script[..key_end].rfind('"') else {
            continue;
        };
        let key = script[key_start + 1..key_end].to_ascii_lowercase();
        if ARRAY_KEY_HINTS.iter().any(|hint| key.contains(hint)) {
            starts.push(idx);
        }
    }

    starts
}

/// Walk nested containers collecting objects with both a token id and a price.
fn collect_records(value: &Value, depth: usize, out: &mut Vec<ActivityRecord>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect_records(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            if looks_like_sale(map) {
                if let Some(record) = parse_activity_entry(value, SaleSource::Scrape) {
                    if record.has_sale_fields() {
                        out.push(record);
                        return;
                    }
                }
            }
            for child in map.values() {
                collect_records(child, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn looks_like_sale(map: &Map<String, Value>) -> bool {
    let has_token = TOKEN_ID_KEYS.iter().any(|k| map.contains_key(*k))
        || NESTED_KEYS.iter().any(|k| {
            map.get(*k)
                .and_then(Value::as_object)
                .is_some_and(|inner| TOKEN_ID_KEYS.iter().any(|t| inner.contains_key(*t)))
        });
    let has_price = PRICE_KEYS.iter().any(|k| map.contains_key(*k));
    has_token && has_price
}
