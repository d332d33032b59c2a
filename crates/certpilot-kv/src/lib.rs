//! certpilot-kv: shared counter/value store with per-key expiry.
//!
//! Backs four independent mechanisms: request-rate limiting,
//! duplicate-submission suppression, cached vendor auth keys and bounded
//! retry counters. All coordination goes through the `CounterStore` trait
//! so a networked backend can replace the in-process one.

pub mod error;
pub mod services;

pub use error::KvError;
pub use services::{CounterStore, DuplicateGuard, MemoryCounterStore, RateLimiter, RetryGuard};
