//! API clients for external services.

pub mod chain;
pub mod marketplace;
pub mod stream;

pub use chain::{ChainClient, ChainReader, RawLog, Transaction, TransactionReceipt};
pub use marketplace::{MarketplaceClient, MarketplaceSource};
pub use stream::{SessionEnd, StreamClient, StreamEvent, WsConnection};
