//! Database connection management for Certpilot

pub mod connection;
pub mod test_utils;

pub use connection::{establish_connection, supports_row_locks, DbConnection};
