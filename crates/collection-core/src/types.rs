//! Core domain types for the sale watcher.

pub mod activity;
pub mod sale;
pub mod transfer;

pub use activity::*;
pub use sale::*;
pub use transfer::*;
