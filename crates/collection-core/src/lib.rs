//! Collection Core Library
//!
//! Shared types, configuration and API clients for the NFT sale watcher.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
