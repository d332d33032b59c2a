//! Canonical request/response types shared by every adapter.

use serde::{Deserialize, Serialize};

use certpilot_core::{CertKind, CertStatus, Dcv, DomainValidation, ValidationMethod};

/// Administrator contact attached to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContactInfo {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub email: String,
    pub phone: String,
}

/// Organization details for OV/EV submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrganizationInfo {
    pub name: String,
    pub registration_number: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postcode: String,
}

/// Everything an adapter needs to submit a new/renew/reissue request.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub action: CertKind,
    /// Vendor-side product identifier.
    pub product_api_id: String,
    pub period_months: i32,
    /// Bonus validity on issuance.
    pub plus: bool,
    pub refer_id: String,
    pub unique_value: Option<String>,
    pub csr: String,
    pub common_name: String,
    /// Comma-joined SAN list, common name first.
    pub alternative_names: String,
    pub dcv: Dcv,
    /// Vendor reference of the cert being renewed/reissued.
    pub last_api_id: Option<String>,
    /// PEM of the previous certificate, for vendors that want it echoed.
    pub last_cert_pem: Option<String>,
    pub contact: Option<ContactInfo>,
    pub organization: Option<OrganizationInfo>,
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub api_id: String,
    pub cert_apply_status: i32,
    pub dcv: Option<Dcv>,
    pub validation: Option<Vec<DomainValidation>>,
}

/// The canonical certificate snapshot every `get` call normalizes into.
#[derive(Debug, Clone, Default)]
pub struct CertSnapshot {
    pub status: Option<CertStatus>,
    pub cert_apply_status: i32,
    pub domain_verify_status: i32,
    pub org_verify_status: i32,
    pub vendor_id: Option<String>,
    pub common_name: Option<String>,
    pub alternative_names: Option<String>,
    pub dcv: Option<Dcv>,
    pub validation: Option<Vec<DomainValidation>>,
    pub certificate: Option<String>,
    pub intermediate_cert: Option<String>,
    pub csr: Option<String>,
    pub contact: Option<ContactInfo>,
    pub organization: Option<OrganizationInfo>,
}

/// Fresh DCV material returned by `update_dcv`/`revalidate`.
#[derive(Debug, Clone, Default)]
pub struct DcvUpdate {
    pub dcv: Option<Dcv>,
    pub validation: Option<Vec<DomainValidation>>,
}

/// Locally persisted cert state an adapter may need alongside the vendor
/// reference (current DCV, validation records, SAN list, serial).
#[derive(Debug, Clone, Default)]
pub struct CertContext {
    pub dcv: Option<Dcv>,
    pub validation: Vec<DomainValidation>,
    pub alternative_names: String,
    pub serial_number: Option<String>,
    pub requested_method: Option<ValidationMethod>,
}

/// The vendor-level response envelope every SDK call normalizes into
/// before the adapter converts it to a typed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorResponse {
    /// 1 = vendor-reported success, 0 = vendor-reported failure.
    pub code: i32,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
}

impl VendorResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        VendorResponse {
            code: 1,
            data,
            msg: None,
            errors: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        VendorResponse {
            code: 0,
            data: serde_json::Value::Null,
            msg: Some(msg.into()),
            errors: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 1
    }
}
