//! Core of webmemo: a tiered cache and selector tracker for browser automation.
//!
//! This crate provides:
//! - Canonical cache keys and TTL classification
//! - An in-memory L1 tier and a SQLite-backed L2 tier behind one coordinator
//! - Per-domain selector performance tracking
//! - A background expiry sweeper
//! - Unified error types and layered configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod sweeper;
pub mod tracker;

pub use cache::{CacheDb, CacheKey, KeyNormalizer, TieredCache};
pub use config::AppConfig;
pub use error::Error;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use tracker::{SelectorRecord, SelectorTracker};
