//! MemoryOS
//!
//! A shared-memory coordination layer for cooperating agents:
//! - Versioned, access-controlled shared entries with optimistic updates and locks
//! - Token-budgeted context assembly with pluggable strategies
//! - A per-agent skill index with mastery tracking
//! - An HTTP API, client and CLI over a single `MemoryOs` facade

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod service;
pub mod shared;
pub mod skills;

pub use error::Result;

// Re-export common types
pub use client::MemoryOsClient;
pub use config::MemoryOsConfig;
pub use error::MemoryOsError;
pub use models::*;
pub use service::MemoryOs;
