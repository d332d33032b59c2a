//! DCV instruction generation.
//!
//! Most CAs hand the verification material back after submission; Sectigo
//! expects the reseller to derive it from the CSR itself. The derivation
//! is deterministic: the same CSR and unique value always produce the same
//! CNAME target and file content.

use md5::Md5;
use sha2::{Digest, Sha256};

use certpilot_core::{Dcv, DcvDns, DcvFile, DomainValidation, ValidationMethod};

use crate::domain::{root_domain, split_domains};
use crate::errors::PkiError;

const SECTIGO_SUFFIX: &str = "sectigo.com";
const WELL_KNOWN_PATH: &str = "/.well-known/pki-validation/";

/// Produce the DCV instruction set for a submission. Only Sectigo-rooted
/// products carry CSR-derived material; every other CA starts bare and is
/// filled from the vendor response.
pub fn generate_dcv(
    ca: &str,
    method: ValidationMethod,
    csr_pem: &str,
    unique_value: &str,
) -> Result<Dcv, PkiError> {
    if ca.eq_ignore_ascii_case("sectigo")
        && matches!(
            method,
            ValidationMethod::Cname | ValidationMethod::Http | ValidationMethod::Https
        )
    {
        return sectigo_dcv(method, csr_pem, unique_value);
    }

    Ok(Dcv::bare(method))
}

/// Sectigo token derivation from the DER form of the CSR:
/// MD5 seeds the host label and file name, SHA-256 split into two
/// 32-character halves builds the CNAME target, and the file content is
/// the uppercase SHA-256 plus a marker line plus the lowercase unique
/// value.
fn sectigo_dcv(
    method: ValidationMethod,
    csr_pem: &str,
    unique_value: &str,
) -> Result<Dcv, PkiError> {
    let der = crate::csr::csr_der(csr_pem)?;

    let md5 = hex::encode(Md5::digest(&der));
    let sha256 = hex::encode(Sha256::digest(&der));
    let (half1, half2) = sha256.split_at(32);

    let file_name = format!("{}.txt", md5.to_uppercase());

    Ok(Dcv {
        method,
        dns: Some(DcvDns {
            host: format!("_{}", md5),
            record_type: "CNAME".to_string(),
            value: format!(
                "{}.{}.{}.{}",
                half1,
                half2,
                unique_value.to_lowercase(),
                SECTIGO_SUFFIX
            ),
        }),
        file: Some(DcvFile {
            path: format!("{}{}", WELL_KNOWN_PATH, file_name),
            content: format!(
                "{}\n{}\n{}",
                sha256.to_uppercase(),
                SECTIGO_SUFFIX,
                unique_value.to_lowercase()
            ),
            name: file_name,
        }),
    })
}

/// Fan the single instruction set out over every domain in the SAN list.
pub fn generate_validation(dcv: &Dcv, domains: &str) -> Vec<DomainValidation> {
    split_domains(domains)
        .into_iter()
        .map(|domain| {
            let mut record = DomainValidation::new(domain.clone(), dcv.method);

            if dcv.method.is_dns() {
                if let Some(dns) = &dcv.dns {
                    record.host = Some(dns.host.clone());
                    record.value = Some(dns.value.clone());
                }
            }

            if dcv.method.is_file() {
                if let Some(file) = &dcv.file {
                    record.name = Some(file.name.clone());
                    record.content = Some(file.content.clone());
                    let scheme = match dcv.method {
                        ValidationMethod::File => "//".to_string(),
                        method => format!("{}://", method),
                    };
                    record.link = Some(format!("{}{}{}", scheme, domain, file.path));
                }
            }

            if dcv.method.is_email() {
                record.email = Some(format!("{}@{}", dcv.method, root_domain(&domain)));
            }

            record
        })
        .collect()
}

/// Merge vendor-reported validation records with locally generated ones:
/// vendor fields win, locally derived fields fill the gaps.
pub fn merge_validation(
    from_vendor: Vec<DomainValidation>,
    local: &[DomainValidation],
) -> Vec<DomainValidation> {
    from_vendor
        .into_iter()
        .map(|mut record| {
            if let Some(own) = local.iter().find(|v| v.domain == record.domain) {
                record.host = record.host.or_else(|| own.host.clone());
                record.value = record.value.or_else(|| own.value.clone());
                record.name = record.name.or_else(|| own.name.clone());
                record.content = record.content.or_else(|| own.content.clone());
                record.link = record.link.or_else(|| own.link.clone());
                record.email = record.email.or_else(|| own.email.clone());
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{generate, EncryptionParams, SubjectInfo};

    fn test_csr() -> String {
        let enc = EncryptionParams::normalize(Some("ecdsa"), Some(256), None);
        generate(
            &enc,
            &SubjectInfo {
                common_name: "example.com".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
        .csr
    }

    #[test]
    fn sectigo_derivation_is_deterministic() {
        let csr = test_csr();

        let a = generate_dcv("sectigo", ValidationMethod::Cname, &csr, "cn12345678901234").unwrap();
        let b = generate_dcv("sectigo", ValidationMethod::Cname, &csr, "cn12345678901234").unwrap();
        assert_eq!(a, b);

        // A different unique value changes the CNAME target and the file
        // content but not the MD5-derived parts.
        let c = generate_dcv("sectigo", ValidationMethod::Cname, &csr, "cn99999999999999").unwrap();
        assert_ne!(a.dns.as_ref().unwrap().value, c.dns.as_ref().unwrap().value);
        assert_eq!(a.file.as_ref().unwrap().name, c.file.as_ref().unwrap().name);

        // A different CSR changes everything derived.
        let other = test_csr();
        let d =
            generate_dcv("sectigo", ValidationMethod::Cname, &other, "cn12345678901234").unwrap();
        assert_ne!(a.dns.as_ref().unwrap().host, d.dns.as_ref().unwrap().host);
    }

    #[test]
    fn sectigo_token_shape() {
        let csr = test_csr();
        let dcv = generate_dcv("sectigo", ValidationMethod::Https, &csr, "cnABCdef123456789").unwrap();

        let dns = dcv.dns.as_ref().unwrap();
        assert!(dns.host.starts_with('_'));
        assert_eq!(dns.host.len(), 33);
        assert_eq!(dns.record_type, "CNAME");
        assert!(dns.value.ends_with(".cnabcdef123456789.sectigo.com"));
        // Two 32-char halves ahead of the unique value.
        let parts: Vec<&str> = dns.value.split('.').collect();
        assert_eq!(parts[0].len(), 32);
        assert_eq!(parts[1].len(), 32);

        let file = dcv.file.as_ref().unwrap();
        assert!(file.name.ends_with(".txt"));
        assert_eq!(file.path, format!("/.well-known/pki-validation/{}", file.name));
        let lines: Vec<&str> = file.content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], lines[0].to_uppercase());
        assert_eq!(lines[1], "sectigo.com");
        assert_eq!(lines[2], "cnabcdef123456789");
    }

    #[test]
    fn non_sectigo_dcv_stays_bare() {
        let csr = test_csr();
        let dcv = generate_dcv("digicert", ValidationMethod::Cname, &csr, "cn12345678901234").unwrap();
        assert_eq!(dcv, Dcv::bare(ValidationMethod::Cname));

        // Email methods are never derived, even for sectigo.
        let dcv = generate_dcv("sectigo", ValidationMethod::Admin, &csr, "cn12345678901234").unwrap();
        assert_eq!(dcv, Dcv::bare(ValidationMethod::Admin));
    }

    #[test]
    fn validation_fanout_per_method() {
        let csr = test_csr();
        let dcv = generate_dcv("sectigo", ValidationMethod::Cname, &csr, "cn12345678901234").unwrap();
        let records = generate_validation(&dcv, "example.com,www.example.com");

        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.method, ValidationMethod::Cname);
            assert!(record.host.is_some());
            assert!(record.value.is_some());
            assert!(record.email.is_none());
        }

        let file_dcv = generate_dcv("sectigo", ValidationMethod::Http, &csr, "cn12345678901234").unwrap();
        let records = generate_validation(&file_dcv, "example.com");
        assert!(records[0]
            .link
            .as_ref()
            .unwrap()
            .starts_with("http://example.com/.well-known/pki-validation/"));

        let records = generate_validation(&Dcv::bare(ValidationMethod::Admin), "www.example.com");
        assert_eq!(records[0].email.as_deref(), Some("admin@example.com"));
    }

    #[test]
    fn merge_prefers_vendor_fields() {
        let mut vendor = DomainValidation::new("example.com", ValidationMethod::Cname);
        vendor.host = Some("_vendor".to_string());

        let mut local = DomainValidation::new("example.com", ValidationMethod::Cname);
        local.host = Some("_local".to_string());
        local.value = Some("target.example.net".to_string());

        let merged = merge_validation(vec![vendor], &[local]);
        assert_eq!(merged[0].host.as_deref(), Some("_vendor"));
        assert_eq!(merged[0].value.as_deref(), Some("target.example.net"));
    }
}
