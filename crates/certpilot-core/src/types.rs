//! Canonical datetime types used across all Certpilot crates

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type used for all TIMESTAMPTZ columns
pub type DBDateTime = ChronoDateTime<Utc>;

/// Standard UTC DateTime type for service-level values
/// (serializes as ISO 8601 with 'Z' suffix)
pub type UtcDateTime = ChronoDateTime<Utc>;
