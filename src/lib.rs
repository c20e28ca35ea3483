//! NFT Sale Watch
//!
//! Root crate that gives integration tests and benchmarks access to the
//! workspace crates. For functionality use the crates directly:
//!
//! - `collection-core`: Shared types, configuration, chain/marketplace/stream clients
//! - `sale-watcher`: Decoding, classification, dedup, scheduling and notification

// Re-export for benchmarks
pub use collection_core as core;
pub use sale_watcher as watcher;
