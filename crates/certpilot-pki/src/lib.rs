//! CSR/key handling, domain classification and DCV token derivation.

pub mod csr;
pub mod dcv;
pub mod domain;
pub mod errors;

pub use csr::{CsrInfo, EncryptionParams, GeneratedCsr, ParsedCertificate, SubjectInfo};
pub use dcv::{generate_dcv, generate_validation, merge_validation};
pub use domain::DomainType;
pub use errors::PkiError;
