//! CSR generation and inspection.
//!
//! Key generation goes through `rcgen` for ECDSA and the `rsa` crate for
//! RSA (loaded back into an rcgen key pair for signing the request).
//! Parsing uses `x509-parser` on both CSRs and issued certificates.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::{FromDer, X509Certificate};

use certpilot_core::{sha256_hex, UtcDateTime};

use crate::errors::PkiError;

pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "rsa";
pub const DEFAULT_BITS: u32 = 2048;
pub const DEFAULT_DIGEST_ALGORITHM: &str = "sha256";

/// Normalized encryption parameters for key/CSR generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionParams {
    pub alg: String,
    pub bits: u32,
    pub digest_alg: String,
}

impl EncryptionParams {
    /// Clamp arbitrary submitted values to the supported set, falling back
    /// to the defaults.
    pub fn normalize(alg: Option<&str>, bits: Option<u32>, digest_alg: Option<&str>) -> Self {
        let alg = match alg.map(|a| a.to_ascii_lowercase()) {
            Some(a) if a == "rsa" || a == "ecdsa" => a,
            _ => DEFAULT_ENCRYPTION_ALGORITHM.to_string(),
        };

        let bits = match alg.as_str() {
            "rsa" => match bits {
                Some(b) if b == 2048 || b == 4096 => b,
                _ => DEFAULT_BITS,
            },
            _ => match bits {
                Some(b) if b == 256 || b == 384 => b,
                _ => 256,
            },
        };

        let digest_alg = match digest_alg.map(|d| d.to_ascii_lowercase()) {
            Some(d) if d == "sha256" || d == "sha384" || d == "sha512" => d,
            _ => DEFAULT_DIGEST_ALGORITHM.to_string(),
        };

        EncryptionParams {
            alg,
            bits,
            digest_alg,
        }
    }
}

impl Default for EncryptionParams {
    fn default() -> Self {
        Self::normalize(None, None, None)
    }
}

/// Subject fields placed into a generated CSR.
#[derive(Debug, Clone, Default)]
pub struct SubjectInfo {
    pub common_name: String,
    pub organization: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedCsr {
    pub csr: String,
    pub private_key: String,
}

/// Subject data read back out of a CSR.
#[derive(Debug, Clone)]
pub struct CsrInfo {
    pub common_name: String,
    pub organization: Option<String>,
}

/// Generate a private key and CSR for the given subject.
pub fn generate(
    encryption: &EncryptionParams,
    subject: &SubjectInfo,
) -> Result<GeneratedCsr, PkiError> {
    if subject.common_name.len() > 64 {
        return Err(PkiError::CommonNameTooLong);
    }

    let key_pair = match encryption.alg.as_str() {
        "rsa" => {
            let key = RsaPrivateKey::new(&mut rand::thread_rng(), encryption.bits as usize)
                .map_err(|e| PkiError::KeyGeneration(e.to_string()))?;
            let pem = key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| PkiError::KeyGeneration(e.to_string()))?;
            KeyPair::from_pem(&pem).map_err(|e| PkiError::KeyGeneration(e.to_string()))?
        }
        "ecdsa" => {
            let alg = match encryption.bits {
                256 => &rcgen::PKCS_ECDSA_P256_SHA256,
                384 => &rcgen::PKCS_ECDSA_P384_SHA384,
                other => {
                    return Err(PkiError::UnsupportedEncryption(format!(
                        "ecdsa-{} keys are not supported",
                        other
                    )))
                }
            };
            KeyPair::generate_for(alg).map_err(|e| PkiError::KeyGeneration(e.to_string()))?
        }
        other => {
            return Err(PkiError::UnsupportedEncryption(other.to_string()));
        }
    };

    let mut params = CertificateParams::new(vec![subject.common_name.clone()])
        .map_err(|e| PkiError::CsrGeneration(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject.common_name.clone());
    if let Some(org) = subject.organization.as_deref().filter(|o| !o.is_empty()) {
        dn.push(DnType::OrganizationName, org);
    }
    dn.push(
        DnType::CountryName,
        subject.country.clone().unwrap_or_else(|| "CN".to_string()),
    );
    dn.push(
        DnType::StateOrProvinceName,
        subject.state.clone().unwrap_or_else(|| "Shanghai".to_string()),
    );
    dn.push(
        DnType::LocalityName,
        subject.city.clone().unwrap_or_else(|| "Shanghai".to_string()),
    );
    params.distinguished_name = dn;

    let request = params
        .serialize_request(&key_pair)
        .map_err(|e| PkiError::CsrGeneration(e.to_string()))?;
    let csr = request
        .pem()
        .map_err(|e| PkiError::CsrGeneration(e.to_string()))?;

    Ok(GeneratedCsr {
        csr: csr.trim().replace("\r\n", "\n"),
        private_key: key_pair.serialize_pem().trim().replace("\r\n", "\n"),
    })
}

/// Decode the DER bytes out of a PEM-wrapped CSR.
pub fn csr_der(csr_pem: &str) -> Result<Vec<u8>, PkiError> {
    if csr_pem.trim().is_empty() {
        return Err(PkiError::EmptyCsr);
    }

    let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem.as_bytes())
        .map_err(|e| PkiError::CsrParse(e.to_string()))?;

    Ok(pem.contents)
}

/// Read the subject out of a PEM CSR.
pub fn parse(csr_pem: &str) -> Result<CsrInfo, PkiError> {
    let der = csr_der(csr_pem)?;
    let (_, request) = X509CertificationRequest::from_der(&der)
        .map_err(|e| PkiError::CsrParse(e.to_string()))?;

    let subject = &request.certification_request_info.subject;
    let common_name = subject
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| PkiError::CsrParse("missing common name".to_string()))?
        .to_string();
    let organization = subject
        .iter_organization()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(|s| s.to_string());

    Ok(CsrInfo {
        common_name,
        organization,
    })
}

/// CSR common name must equal the certificate common name.
pub fn check_domain(csr_pem: &str, common_name: &str) -> Result<(), PkiError> {
    let info = parse(csr_pem)?;
    if !info.common_name.eq_ignore_ascii_case(common_name) {
        return Err(PkiError::CommonNameMismatch);
    }
    Ok(())
}

/// CSR organization must equal the submitted organization name.
pub fn check_organization(csr_pem: &str, organization: &str) -> Result<(), PkiError> {
    let info = parse(csr_pem)?;
    if info.organization.as_deref() != Some(organization) {
        return Err(PkiError::OrganizationMismatch);
    }
    Ok(())
}

/// Whether the private key's public half matches the CSR's subject public
/// key info (compared as DER).
pub fn match_key(csr_pem: &str, key_pem: &str) -> bool {
    let Ok(der) = csr_der(csr_pem) else {
        return false;
    };
    let Ok((_, request)) = X509CertificationRequest::from_der(&der) else {
        return false;
    };
    let Ok(key_pair) = KeyPair::from_pem(key_pem) else {
        return false;
    };

    request.certification_request_info.subject_pki.raw == key_pair.public_key_der()
}

/// Hash-algorithm hint some vendors want alongside the CSR, derived from
/// the request's key type.
pub fn csr_hash_algorithm(csr_pem: &str) -> String {
    let algorithm = csr_der(csr_pem)
        .ok()
        .and_then(|der| {
            X509CertificationRequest::from_der(&der)
                .ok()
                .and_then(|(_, request)| {
                    request
                        .certification_request_info
                        .subject_pki
                        .parsed()
                        .ok()
                        .map(|key| match key {
                            x509_parser::public_key::PublicKey::EC(_) => "ECC-SHA256",
                            _ => "RSA-SHA256",
                        })
                })
        })
        .unwrap_or("RSA-SHA256");

    algorithm.to_string()
}

/// Data extracted from an issued certificate.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub issuer: String,
    pub serial_number: String,
    pub encryption_alg: String,
    pub encryption_bits: i32,
    pub signature_digest_alg: String,
    pub fingerprint: String,
    pub issued_at: UtcDateTime,
    pub expires_at: UtcDateTime,
}

/// Parse an issued PEM certificate into its stored attributes.
pub fn parse_certificate(cert_pem: &str) -> Result<ParsedCertificate, PkiError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| PkiError::CertificateParse(e.to_string()))?;
    let (_, x509) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| PkiError::CertificateParse(e.to_string()))?;

    let issuer = x509
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let (encryption_alg, signature_digest_alg) =
        signature_algorithm_names(&x509.signature_algorithm.algorithm.to_id_string());

    let encryption_bits = x509
        .public_key()
        .parsed()
        .map(|key| key.key_size() as i32)
        .unwrap_or(0);

    let issued_at = chrono::DateTime::from_timestamp(x509.validity().not_before.timestamp(), 0)
        .ok_or_else(|| PkiError::CertificateParse("invalid notBefore".to_string()))?;
    let expires_at = chrono::DateTime::from_timestamp(x509.validity().not_after.timestamp(), 0)
        .ok_or_else(|| PkiError::CertificateParse("invalid notAfter".to_string()))?;

    Ok(ParsedCertificate {
        issuer,
        serial_number: hex::encode(x509.raw_serial()),
        encryption_alg,
        encryption_bits,
        signature_digest_alg,
        fingerprint: sha256_hex(&pem.contents),
        issued_at,
        expires_at,
    })
}

fn signature_algorithm_names(oid: &str) -> (String, String) {
    match oid {
        "1.2.840.113549.1.1.11" => ("RSA".to_string(), "SHA256".to_string()),
        "1.2.840.113549.1.1.12" => ("RSA".to_string(), "SHA384".to_string()),
        "1.2.840.113549.1.1.13" => ("RSA".to_string(), "SHA512".to_string()),
        "1.2.840.10045.4.3.2" => ("ECDSA".to_string(), "SHA256".to_string()),
        "1.2.840.10045.4.3.3" => ("ECDSA".to_string(), "SHA384".to_string()),
        "1.2.840.10045.4.3.4" => ("ECDSA".to_string(), "SHA512".to_string()),
        other => (other.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(cn: &str) -> SubjectInfo {
        SubjectInfo {
            common_name: cn.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn generates_and_parses_ecdsa_csr() {
        let enc = EncryptionParams::normalize(Some("ecdsa"), Some(256), None);
        let generated = generate(&enc, &subject("example.com")).unwrap();

        assert!(generated.csr.contains("BEGIN CERTIFICATE REQUEST"));
        let info = parse(&generated.csr).unwrap();
        assert_eq!(info.common_name, "example.com");
    }

    #[test]
    fn generated_key_matches_its_csr() {
        let enc = EncryptionParams::normalize(Some("ecdsa"), Some(256), None);
        let a = generate(&enc, &subject("example.com")).unwrap();
        let b = generate(&enc, &subject("example.com")).unwrap();

        assert!(match_key(&a.csr, &a.private_key));
        assert!(!match_key(&a.csr, &b.private_key));
    }

    #[test]
    fn rejects_common_name_over_64_chars() {
        let cn = format!("{}.example.com", "a".repeat(64));
        let result = generate(&EncryptionParams::default(), &subject(&cn));
        assert!(matches!(result, Err(PkiError::CommonNameTooLong)));
    }

    #[test]
    fn check_domain_detects_mismatch() {
        let enc = EncryptionParams::normalize(Some("ecdsa"), Some(256), None);
        let generated = generate(&enc, &subject("example.com")).unwrap();

        assert!(check_domain(&generated.csr, "example.com").is_ok());
        assert!(matches!(
            check_domain(&generated.csr, "other.com"),
            Err(PkiError::CommonNameMismatch)
        ));
    }

    #[test]
    fn organization_is_carried_and_checked() {
        let enc = EncryptionParams::normalize(Some("ecdsa"), Some(256), None);
        let generated = generate(
            &enc,
            &SubjectInfo {
                common_name: "example.com".to_string(),
                organization: Some("Example Ltd".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(check_organization(&generated.csr, "Example Ltd").is_ok());
        assert!(check_organization(&generated.csr, "Other Ltd").is_err());
    }

    #[test]
    fn normalize_falls_back_to_defaults() {
        let enc = EncryptionParams::normalize(Some("des"), Some(1024), Some("md5"));
        assert_eq!(enc.alg, "rsa");
        assert_eq!(enc.bits, 2048);
        assert_eq!(enc.digest_alg, "sha256");
    }

    #[test]
    fn empty_csr_is_rejected() {
        assert!(matches!(parse(""), Err(PkiError::EmptyCsr)));
    }
}
