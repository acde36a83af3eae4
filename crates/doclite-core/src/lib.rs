//! doclite-core - Core types for the doclite document store
//!
//! This crate provides the foundational types, configuration, and error
//! handling used throughout the doclite workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::{JournalMode, StoreConfig};
pub use error::{DocError, Result};
pub use types::*;
