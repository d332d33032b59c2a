mod counter_store;
mod guards;

pub use counter_store::{CounterStore, MemoryCounterStore};
pub use guards::{DuplicateGuard, RateLimiter, RetryGuard};
