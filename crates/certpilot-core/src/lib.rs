//! Core utilities and types shared across all Certpilot crates

pub mod app_settings;
pub mod dcv;
pub mod error;
pub mod jobs;
pub mod status;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use app_settings::*;
pub use dcv::*;
pub use error::*;
pub use jobs::*;
pub use status::*;
pub use types::*;
pub use utils::*;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
