//! Typed request/result models for the orchestrator. The per-action field
//! allow-lists of the wire layer collapse into these structs; anything not
//! representable here cannot reach the engine.

use serde::{Deserialize, Serialize};

use certpilot_core::{CertKind, Channel, ValidationMethod};
use certpilot_vendors::{ContactInfo, OrganizationInfo};

/// Who is acting. Customer-initiated calls are scoped to their own orders
/// and subject to the balance floor; operator calls are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<i64>,
    pub channel: Channel,
}

impl Actor {
    pub fn customer(user_id: i64, channel: Channel) -> Self {
        Actor {
            user_id: Some(user_id),
            channel,
        }
    }

    pub fn operator() -> Self {
        Actor {
            user_id: None,
            channel: Channel::Admin,
        }
    }

    pub fn is_customer(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Requested key/digest parameters for CSR generation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionInput {
    pub alg: Option<String>,
    pub bits: Option<u32>,
    pub digest_alg: Option<String>,
}

/// One new/renew/reissue submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionParams {
    pub action: CertKind,
    pub channel: Channel,
    #[serde(default = "default_plus")]
    pub plus: bool,
    pub refer_id: Option<String>,
    pub unique_value: Option<String>,
    /// Required for renew/reissue: the order being extended.
    pub order_id: Option<i64>,
    /// Target user for operator-submitted new orders.
    pub user_id: Option<i64>,
    pub product_id: Option<i64>,
    /// Months.
    pub period: i32,
    pub csr: Option<String>,
    #[serde(default)]
    pub csr_generate: bool,
    pub encryption: Option<EncryptionInput>,
    pub private_key: Option<String>,
    pub validation_method: ValidationMethod,
    /// Comma-joined, common name first.
    pub domains: String,
    pub contact: Option<ContactInfo>,
    pub organization: Option<OrganizationInfo>,
    /// Pre-check issuability through the DNS-tools helper before payment.
    #[serde(default)]
    pub issue_verify: bool,
}

fn default_plus() -> bool {
    true
}

/// Handle to the order/cert a submission produced.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRef {
    pub order_id: i64,
    pub cert_id: i64,
}

/// What a charge attempt did. A failed charge is an outcome, not an
/// error: the commit task is scheduled either way.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeOutcome {
    pub order_id: i64,
    pub charged: bool,
    pub message: Option<String>,
    pub errors: Option<serde_json::Value>,
}
