//! Common utility functions

use chrono::Months;
use md5::Md5;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::UtcDateTime;

/// Generate a fresh idempotency key for a cert submission:
/// 32 hex characters, no hyphens.
pub fn generate_refer_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a vendor-facing unique value ("cn" + time particle + random
/// digits). Alphanumeric, 16-24 characters.
pub fn generate_unique_value() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let tail: u16 = rand::thread_rng().gen_range(0..10000);
    format!("cn{}{:04}", millis, tail)
}

/// Random lowercase alphanumeric string.
pub fn random_alnum(length: usize) -> String {
    const POOL: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| POOL[rng.gen_range(0..POOL.len())] as char)
        .collect()
}

/// Lowercase hex MD5 digest.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fingerprint of an action plus its canonical parameter JSON, used for
/// duplicate-submission suppression windows.
pub fn params_fingerprint(action: &str, params: &serde_json::Value) -> String {
    let encoded = serde_json::to_string(params).unwrap_or_default();
    format!("{}_{}", action, md5_hex(encoded.as_bytes()))
}

/// Certificate validity arithmetic: `timestamp + months`, ending one second
/// before the anniversary instant.
pub fn add_months(timestamp: UtcDateTime, months: u32) -> Option<UtcDateTime> {
    timestamp
        .checked_add_months(Months::new(months))
        .map(|t| t - chrono::Duration::seconds(1))
}

/// Mask sensitive data for logging
pub fn mask_sensitive(data: &str) -> String {
    if data.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***{}", &data[..4], &data[data.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn refer_id_is_32_hex_chars() {
        let id = generate_refer_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unique_value_shape() {
        let v = generate_unique_value();
        assert!(v.starts_with("cn"));
        assert!(v.len() >= 16 && v.len() <= 24);
        assert!(v.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn md5_matches_known_vector() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn add_months_lands_one_second_short() {
        let start = chrono::Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let end = add_months(start, 12).unwrap();
        assert_eq!(
            end,
            chrono::Utc.with_ymd_and_hms(2025, 1, 15, 11, 59, 59).unwrap()
        );
    }

    #[test]
    fn fingerprint_changes_with_params() {
        let a = params_fingerprint("new", &serde_json::json!({"domains": "a.com"}));
        let b = params_fingerprint("new", &serde_json::json!({"domains": "b.com"}));
        assert_ne!(a, b);
        assert!(a.starts_with("new_"));
    }
}
