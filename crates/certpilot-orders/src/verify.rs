//! Client for the external DNS/HTTP validation helper: a prioritized list
//! of redundant endpoints, short per-call timeout, fallback to the next
//! endpoint on any transport error. When every endpoint is unreachable the
//! result is "unknown" and the pipeline is not blocked.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use certpilot_core::DomainValidation;

const CALL_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Passed,
    Failed { msg: String, errors: Option<Value> },
    /// Every endpoint was unreachable; treat as unconfirmed, not as a
    /// failure.
    Unknown,
}

#[async_trait]
pub trait VerifyClient: Send + Sync {
    /// Check published DCV records before poking the CA.
    async fn verify_validation(&self, records: &[DomainValidation]) -> VerifyOutcome;

    /// Pre-submission issuability check (CAA, blocked words) per brand.
    async fn issue_verify(&self, brand: &str, domains: &str) -> VerifyOutcome;
}

pub struct HttpVerifyClient {
    client: Client,
    endpoints: Vec<String>,
}

impl HttpVerifyClient {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(CALL_TIMEOUT)
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap_or_default(),
            endpoints,
        }
    }

    async fn post_first(&self, path: &str, body: &Value) -> Option<Value> {
        for endpoint in &self.endpoints {
            let url = format!("{}{}", endpoint, path);
            match self.client.post(&url).json(body).send().await {
                Ok(response) => match response.json::<Value>().await {
                    Ok(result) => return Some(result),
                    Err(e) => {
                        warn!("validation helper returned invalid JSON from {}: {}", url, e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("validation helper request failed for {}: {}", url, e);
                    continue;
                }
            }
        }
        None
    }

    fn outcome(result: Value) -> VerifyOutcome {
        let code = result.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
        if code == 1 {
            VerifyOutcome::Passed
        } else {
            VerifyOutcome::Failed {
                msg: result
                    .get("msg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("validation failed")
                    .to_string(),
                errors: result.get("errors").cloned(),
            }
        }
    }
}

#[async_trait]
impl VerifyClient for HttpVerifyClient {
    async fn verify_validation(&self, records: &[DomainValidation]) -> VerifyOutcome {
        if self.endpoints.is_empty() {
            warn!("no validation helper endpoints configured");
            return VerifyOutcome::Unknown;
        }

        match self
            .post_first("/api/dcv/verify", &json!(records))
            .await
        {
            Some(result) => Self::outcome(result),
            None => VerifyOutcome::Unknown,
        }
    }

    async fn issue_verify(&self, brand: &str, domains: &str) -> VerifyOutcome {
        if self.endpoints.is_empty() {
            return VerifyOutcome::Unknown;
        }

        match self
            .post_first(
                "/api/domain/issue-verify",
                &json!({ "brand": brand, "domains": domains }),
            )
            .await
        {
            Some(result) => Self::outcome(result),
            None => VerifyOutcome::Unknown,
        }
    }
}

/// Scripted client for tests.
pub struct MockVerifyClient {
    pub validation_outcome: VerifyOutcome,
    pub issue_outcome: VerifyOutcome,
}

impl Default for MockVerifyClient {
    fn default() -> Self {
        Self {
            validation_outcome: VerifyOutcome::Passed,
            issue_outcome: VerifyOutcome::Passed,
        }
    }
}

impl MockVerifyClient {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            validation_outcome: VerifyOutcome::Failed {
                msg: msg.to_string(),
                errors: None,
            },
            issue_outcome: VerifyOutcome::Failed {
                msg: msg.to_string(),
                errors: None,
            },
        }
    }

    pub fn unknown() -> Self {
        Self {
            validation_outcome: VerifyOutcome::Unknown,
            issue_outcome: VerifyOutcome::Unknown,
        }
    }
}

#[async_trait]
impl VerifyClient for MockVerifyClient {
    async fn verify_validation(&self, _records: &[DomainValidation]) -> VerifyOutcome {
        self.validation_outcome.clone()
    }

    async fn issue_verify(&self, _brand: &str, _domains: &str) -> VerifyOutcome {
        self.issue_outcome.clone()
    }
}
