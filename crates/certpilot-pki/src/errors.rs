use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("CSR is empty")]
    EmptyCsr,

    #[error("CSR parse error: {0}")]
    CsrParse(String),

    #[error("Failed to generate private key: {0}")]
    KeyGeneration(String),

    #[error("Failed to generate CSR: {0}")]
    CsrGeneration(String),

    #[error("CSR Common Name does not match the certificate Common Name")]
    CommonNameMismatch,

    #[error("CSR organization name does not match the submitted organization name")]
    OrganizationMismatch,

    #[error("CSR and private key do not match")]
    KeyMismatch,

    #[error("The Common Name cannot exceed 64 characters")]
    CommonNameTooLong,

    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    #[error("Unsupported encryption parameters: {0}")]
    UnsupportedEncryption(String),
}
