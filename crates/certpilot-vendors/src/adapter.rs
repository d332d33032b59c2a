//! The adapter contract every vendor implements.

use async_trait::async_trait;

use certpilot_core::ValidationMethod;

use crate::errors::VendorError;
use crate::types::{CertContext, CertSnapshot, DcvUpdate, IssueOutcome, IssueRequest};

/// One CA vendor behind one operation set. Each implementation owns its
/// transport, credential handling, status vocabulary and DCV token format,
/// and normalizes everything into the canonical types.
///
/// Unknown vendor statuses map to `failed` - never silently to success.
/// A cancel/revoke the vendor reports as "already done" is a success.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// The registry key this adapter serves (a product's `source` field).
    fn source(&self) -> &'static str;

    async fn new_order(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError>;

    async fn renew(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError>;

    async fn reissue(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError>;

    async fn get(&self, api_id: &str) -> Result<CertSnapshot, VendorError>;

    async fn cancel(&self, api_id: &str, cert: &CertContext) -> Result<(), VendorError>;

    async fn revalidate(&self, api_id: &str, cert: &CertContext) -> Result<(), VendorError>;

    async fn update_dcv(
        &self,
        api_id: &str,
        method: ValidationMethod,
        cert: &CertContext,
    ) -> Result<DcvUpdate, VendorError>;

    /// Drop domains whose validation never completed from a multi-domain
    /// order so the rest can issue.
    async fn remove_unverified_domains(
        &self,
        _api_id: &str,
        _cert: &CertContext,
    ) -> Result<(), VendorError> {
        Err(VendorError::UnsupportedOperation(
            "remove_unverified_domains".to_string(),
        ))
    }
}
