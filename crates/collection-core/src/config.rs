//! Configuration management for the sale watcher.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub collection: CollectionConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub sources: SourceFlags,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Collection contract address.
    pub address: String,
    /// Display name used in notifications.
    #[serde(default)]
    pub name: Option<String>,
    /// Marketplace slug, substituted for `{slug}` in marketplace paths.
    #[serde(default)]
    pub slug: Option<String>,
}

impl CollectionConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub alchemy_api_key: Option<String>,
    /// Symbol of the chain's native currency.
    pub native_unit: String,
    /// Block explorer base, used for transaction links.
    pub explorer_url: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            alchemy_api_key: None,
            native_unit: "ETH".to_string(),
            explorer_url: "https://etherscan.io".to_string(),
        }
    }
}

impl ChainConfig {
    pub fn get_rpc_url(&self) -> Option<String> {
        self.rpc_url.clone().or_else(|| {
            self.alchemy_api_key
                .as_ref()
                .map(|key| format!("https://eth-mainnet.g.alchemy.com/v2/{}", key))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub base_url: Option<String>,
    /// Candidate activity endpoints, tried in order.
    pub api_paths: Vec<String>,
    /// Page scraped when no API path yields data.
    pub page_path: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_paths: default_api_paths(),
            page_path: Some("/collection/{slug}/activity".to_string()),
            api_key: None,
            api_key_header: "X-API-KEY".to_string(),
        }
    }
}

fn default_api_paths() -> Vec<String> {
    vec![
        "/api/v2/events/collection/{slug}?event_type=sale".to_string(),
        "/api/v1/collections/{collection}/activity?type=sale".to_string(),
        "/api/collections/{collection}/sales".to_string(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: Option<String>,
    /// Raw text frame sent right after the handshake.
    pub subscribe_message: Option<String>,
    pub base_delay_ms: u64,
    pub max_attempts: u32,
    pub handshake_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            subscribe_message: None,
            base_delay_ms: 5000,
            max_attempts: 5,
            handshake_timeout_secs: 10,
            ping_interval_secs: 20,
            read_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
    /// Most blocks rescanned by one chain cycle.
    pub lookback_blocks: u64,
    pub dedup_capacity: usize,
    /// Pause between transfers inside a chain cycle.
    pub item_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub acceptance_threshold: u32,
    pub gas_threshold: u64,
    /// Consecutive failed chain cycles before polling falls back to the marketplace.
    pub tier_failure_threshold: u32,
    pub status_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            lookback_blocks: 50,
            dedup_capacity: 1000,
            item_delay_ms: 250,
            request_timeout_secs: 8,
            acceptance_threshold: 50,
            gas_threshold: 100_000,
            tier_failure_threshold: 3,
            status_interval_secs: 60,
        }
    }
}

/// Which source tiers the watcher may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceFlags {
    pub stream: bool,
    pub chain: bool,
    pub marketplace_api: bool,
    pub page_scrape: bool,
}

impl Default for SourceFlags {
    fn default() -> Self {
        Self {
            stream: true,
            chain: true,
            marketplace_api: true,
            page_scrape: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl AlertsConfig {
    pub fn has_channels(&self) -> bool {
        self.discord_webhook_url.is_some()
            || (self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StatusConfig {
    /// Address for the health endpoint, e.g. `0.0.0.0:8080`.
    pub bind_addr: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a file, with `WATCH__SECTION__KEY` environment overrides.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: Config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WATCH").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an arbitrary key lookup.
    #[allow(clippy::result_large_err)]
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| -> bool {
            lookup(key)
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
                .unwrap_or(true)
        };

        let address = lookup("COLLECTION_ADDRESS").ok_or_else(|| Error::Config {
            message: "COLLECTION_ADDRESS environment variable not set".to_string(),
        })?;

        let watcher_defaults = WatcherConfig::default();
        let stream_defaults = StreamConfig::default();
        let marketplace_defaults = MarketplaceConfig::default();
        let chain_defaults = ChainConfig::default();

        let config = Self {
            collection: CollectionConfig {
                address,
                name: lookup("COLLECTION_NAME"),
                slug: lookup("COLLECTION_SLUG"),
            },
            chain: ChainConfig {
                rpc_url: lookup("RPC_URL"),
                alchemy_api_key: lookup("ALCHEMY_API_KEY"),
                native_unit: lookup("NATIVE_UNIT").unwrap_or(chain_defaults.native_unit),
                explorer_url: lookup("EXPLORER_URL").unwrap_or(chain_defaults.explorer_url),
            },
            marketplace: MarketplaceConfig {
                base_url: lookup("MARKETPLACE_BASE_URL"),
                api_paths: lookup("MARKETPLACE_API_PATHS")
                    .map(|s| {
                        s.split(',')
                            .map(|p| p.trim().to_string())
                            .filter(|p| !p.is_empty())
                            .collect()
                    })
                    .unwrap_or(marketplace_defaults.api_paths),
                page_path: lookup("MARKETPLACE_PAGE_PATH").or(marketplace_defaults.page_path),
                api_key: lookup("MARKETPLACE_API_KEY"),
                api_key_header: lookup("MARKETPLACE_API_KEY_HEADER")
                    .unwrap_or(marketplace_defaults.api_key_header),
            },
            stream: StreamConfig {
                url: lookup("STREAM_URL"),
                subscribe_message: lookup("STREAM_SUBSCRIBE_MESSAGE"),
                base_delay_ms: parse_var(
                    &lookup,
                    "STREAM_BASE_DELAY_MS",
                    stream_defaults.base_delay_ms,
                )?,
                max_attempts: parse_var(
                    &lookup,
                    "STREAM_MAX_ATTEMPTS",
                    stream_defaults.max_attempts,
                )?,
                handshake_timeout_secs: parse_var(
                    &lookup,
                    "STREAM_HANDSHAKE_TIMEOUT_SECS",
                    stream_defaults.handshake_timeout_secs,
                )?,
                ping_interval_secs: parse_var(
                    &lookup,
                    "STREAM_PING_INTERVAL_SECS",
                    stream_defaults.ping_interval_secs,
                )?,
                read_timeout_secs: parse_var(
                    &lookup,
                    "STREAM_READ_TIMEOUT_SECS",
                    stream_defaults.read_timeout_secs,
                )?,
            },
            watcher: WatcherConfig {
                poll_interval_secs: parse_var(
                    &lookup,
                    "POLL_INTERVAL_SECS",
                    watcher_defaults.poll_interval_secs,
                )?,
                lookback_blocks: parse_var(
                    &lookup,
                    "LOOKBACK_BLOCKS",
                    watcher_defaults.lookback_blocks,
                )?,
                dedup_capacity: parse_var(
                    &lookup,
                    "DEDUP_CAPACITY",
                    watcher_defaults.dedup_capacity,
                )?,
                item_delay_ms: parse_var(&lookup, "ITEM_DELAY_MS", watcher_defaults.item_delay_ms)?,
                request_timeout_secs: parse_var(
                    &lookup,
                    "REQUEST_TIMEOUT_SECS",
                    watcher_defaults.request_timeout_secs,
                )?,
                acceptance_threshold: parse_var(
                    &lookup,
                    "SALE_ACCEPTANCE_THRESHOLD",
                    watcher_defaults.acceptance_threshold,
                )?,
                gas_threshold: parse_var(
                    &lookup,
                    "SALE_GAS_THRESHOLD",
                    watcher_defaults.gas_threshold,
                )?,
                tier_failure_threshold: parse_var(
                    &lookup,
                    "TIER_FAILURE_THRESHOLD",
                    watcher_defaults.tier_failure_threshold,
                )?,
                status_interval_secs: parse_var(
                    &lookup,
                    "STATUS_INTERVAL_SECS",
                    watcher_defaults.status_interval_secs,
                )?,
            },
            sources: SourceFlags {
                stream: flag("ENABLE_STREAM"),
                chain: flag("ENABLE_CHAIN"),
                marketplace_api: flag("ENABLE_MARKETPLACE_API"),
                page_scrape: flag("ENABLE_PAGE_SCRAPE"),
            },
            alerts: AlertsConfig {
                telegram_bot_token: lookup("TELEGRAM_BOT_TOKEN"),
                telegram_chat_id: lookup("TELEGRAM_CHAT_ID"),
                discord_webhook_url: lookup("DISCORD_WEBHOOK_URL"),
            },
            status: StatusConfig {
                bind_addr: lookup("STATUS_BIND_ADDR"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration with defaults for a single collection and no sources wired.
    pub fn for_collection(address: &str) -> Self {
        Self {
            collection: CollectionConfig {
                address: address.to_string(),
                name: None,
                slug: None,
            },
            chain: ChainConfig::default(),
            marketplace: MarketplaceConfig::default(),
            stream: StreamConfig::default(),
            watcher: WatcherConfig::default(),
            sources: SourceFlags::default(),
            alerts: AlertsConfig::default(),
            status: StatusConfig::default(),
        }
    }

    /// Source flags narrowed to the tiers that are actually configured.
    pub fn effective_sources(&self) -> SourceFlags {
        let has_marketplace = self.marketplace.base_url.is_some();
        SourceFlags {
            stream: self.sources.stream && self.stream.url.is_some(),
            chain: self.sources.chain && self.chain.get_rpc_url().is_some(),
            marketplace_api: self.sources.marketplace_api
                && has_marketplace
                && !self.marketplace.api_paths.is_empty(),
            page_scrape: self.sources.page_scrape
                && has_marketplace
                && self.marketplace.page_path.is_some(),
        }
    }

    /// Reject configurations the watcher cannot run with.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.collection.address.parse::<alloy_primitives::Address>().is_err() {
            return Err(Error::Config {
                message: format!(
                    "collection address {} is not a valid 20-byte hex address",
                    self.collection.address
                ),
            });
        }

        let sources = self.effective_sources();
        if !(sources.stream || sources.chain || sources.marketplace_api || sources.page_scrape) {
            return Err(Error::Config {
                message: "no usable source: set RPC_URL, STREAM_URL or MARKETPLACE_BASE_URL"
                    .to_string(),
            });
        }

        if self.watcher.dedup_capacity < 2 {
            return Err(Error::Config {
                message: "dedup capacity must be at least 2".to_string(),
            });
        }

        Ok(())
    }
}

/// Parse `key` into its target type, or fall back to `default` when unset.
#[allow(clippy::result_large_err)]
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| Error::Config {
            message: format!("{} has invalid value {:?}", key, raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const COLLECTION: &str = "0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d";

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_collection_is_config_error() {
        let err = Config::from_lookup(lookup_from(&[("RPC_URL", "http://localhost:8545")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_defaults_from_env() {
        let config = Config::from_lookup(lookup_from(&[
            ("COLLECTION_ADDRESS", COLLECTION),
            ("RPC_URL", "http://localhost:8545"),
        ]))
        .unwrap();

        assert_eq!(config.watcher.lookback_blocks, 50);
        assert_eq!(config.watcher.acceptance_threshold, 50);
        assert_eq!(config.stream.base_delay_ms, 5000);
        assert_eq!(config.chain.native_unit, "ETH");
        assert_eq!(config.marketplace.api_paths.len(), 3);

        let sources = config.effective_sources();
        assert!(sources.chain);
        assert!(!sources.stream);
        assert!(!sources.marketplace_api);
        assert!(!sources.page_scrape);
    }

    #[test]
    fn test_overrides_and_flags() {
        let config = Config::from_lookup(lookup_from(&[
            ("COLLECTION_ADDRESS", COLLECTION),
            ("COLLECTION_SLUG", "boredapeyachtclub"),
            ("MARKETPLACE_BASE_URL", "https://market.example"),
            ("MARKETPLACE_API_PATHS", "/a, /b ,"),
            ("ENABLE_PAGE_SCRAPE", "false"),
            ("POLL_INTERVAL_SECS", "12"),
            ("SALE_ACCEPTANCE_THRESHOLD", "70"),
        ]))
        .unwrap();

        assert_eq!(config.marketplace.api_paths, vec!["/a", "/b"]);
        assert_eq!(config.watcher.poll_interval_secs, 12);
        assert_eq!(config.watcher.acceptance_threshold, 70);

        let sources = config.effective_sources();
        assert!(sources.marketplace_api);
        assert!(!sources.page_scrape);
        assert!(!sources.chain);
    }

    #[test]
    fn test_out_of_range_numbers_rejected() {
        for (key, value) in [
            ("STREAM_MAX_ATTEMPTS", "4294967301"),
            ("SALE_ACCEPTANCE_THRESHOLD", "-1"),
            ("POLL_INTERVAL_SECS", "soon"),
        ] {
            let err = Config::from_lookup(lookup_from(&[
                ("COLLECTION_ADDRESS", COLLECTION),
                ("RPC_URL", "http://localhost:8545"),
                (key, value),
            ]))
            .unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "{}", key);
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn test_no_usable_source_rejected() {
        let err = Config::from_lookup(lookup_from(&[("COLLECTION_ADDRESS", COLLECTION)]))
            .unwrap_err();
        assert!(err.to_string().contains("no usable source"));
    }

    #[test]
    fn test_invalid_collection_address_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("COLLECTION_ADDRESS", "not-an-address"),
            ("RPC_URL", "http://localhost:8545"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("not a valid"));
    }

    #[test]
    fn test_alchemy_url_fallback() {
        let chain = ChainConfig {
            alchemy_api_key: Some("key123".to_string()),
            ..Default::default()
        };
        assert_eq!(
            chain.get_rpc_url().as_deref(),
            Some("https://eth-mainnet.g.alchemy.com/v2/key123")
        );
    }
}
