//! Vendor adapter layer: four structurally different CA wire protocols
//! normalized into one operation contract and one canonical snapshot.

pub mod adapter;
pub mod audit;
pub mod certum;
pub mod errors;
pub mod gogetssl;
pub mod racent;
pub mod registry;
pub mod trustasia;
pub mod types;

pub use adapter::VendorAdapter;
pub use audit::{CaLogEntry, CaLogStore, MemoryCaLogStore, SeaOrmCaLogStore};
pub use errors::VendorError;
pub use registry::VendorRegistry;
pub use types::{
    CertContext, CertSnapshot, ContactInfo, DcvUpdate, IssueOutcome, IssueRequest,
    OrganizationInfo, VendorResponse,
};

use certpilot_core::CertStatus;

/// Map a vendor-reported status (already translated into the canonical
/// vocabulary) onto the subset adapters are allowed to report. Anything
/// unrecognized fails closed - never silently treated as success.
pub fn status_from_vendor(status: &str) -> CertStatus {
    match status {
        "processing" => CertStatus::Processing,
        "approving" => CertStatus::Approving,
        "active" => CertStatus::Active,
        "cancelled" => CertStatus::Cancelled,
        "reissued" => CertStatus::Reissued,
        "renewed" => CertStatus::Renewed,
        "revoked" => CertStatus::Revoked,
        "expired" => CertStatus::Expired,
        _ => CertStatus::Failed,
    }
}
