//! TrustAsia adapter. Fulfills single-shot DV products only: the vendor
//! offers no renew or reissue, and a cancel is always reported as success.
//! A duplicate refer-id on submit is recovered through the alternate-id
//! lookup, making `new_order` idempotent.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

use certpilot_core::{
    CertStatus, Dcv, DcvDns, DcvFile, DomainValidation, TrustasiaSettings, ValidationMethod,
};
use certpilot_pki::domain::{root_domain, split_domains};

use crate::adapter::VendorAdapter;
use crate::audit::CaLogStore;
use crate::errors::VendorError;
use crate::trustasia::sdk::TrustasiaSdk;
use crate::types::{CertContext, CertSnapshot, DcvUpdate, IssueOutcome, IssueRequest, VendorResponse};

const WELL_KNOWN_PATH: &str = "/.well-known/pki-validation/";

pub struct TrustasiaAdapter {
    sdk: TrustasiaSdk,
}

impl TrustasiaAdapter {
    pub fn new(settings: TrustasiaSettings, audit: Arc<dyn CaLogStore>) -> Self {
        Self {
            sdk: TrustasiaSdk::new(settings, audit),
        }
    }

    fn issue_params(request: &IssueRequest, pay_product_id: i64) -> Value {
        let dcv_method = match request.dcv.method {
            method if method.is_dns() => "dns",
            method if method.is_file() => "file",
            _ => "email",
        };

        json!({
            "certificate": {
                "csr": request.csr,
                "common_name": request.common_name,
                "dns_names": split_domains(&request.alternative_names),
            },
            "validity_months": request.period_months,
            "alternative_order_id": request.refer_id,
            "dcv_method": dcv_method,
            "pay_product_id": pay_product_id,
        })
    }

    async fn snapshot(&self, api_id: &str) -> Result<CertSnapshot, VendorError> {
        let response = self.sdk.get_order(api_id).await?;
        if !response.is_success() {
            return Err(rejected(response));
        }

        let data = response.data;
        let mut snapshot = parse_snapshot(&data);

        // The intermediate rides on the cert resource, not the order.
        if snapshot.certificate.is_some() {
            if let Some(cert_id) = data.pointer("/certificate/id").and_then(|v| v.as_str()) {
                if let Ok(cert) = self.sdk.get_cert(cert_id).await {
                    snapshot.intermediate_cert = cert
                        .data
                        .pointer("/Certificate/ica_pem")
                        .and_then(|v| v.as_str())
                        .map(|c| c.trim().replace("\r\n", "\n"));
                }
            }
        }

        Ok(snapshot)
    }
}

#[async_trait]
impl VendorAdapter for TrustasiaAdapter {
    fn source(&self) -> &'static str {
        "trustasia"
    }

    async fn new_order(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        // product_api_id is "<vendor-product>-<pay-product>".
        let (product_id, pay_product_id) = request
            .product_api_id
            .split_once('-')
            .map(|(p, pay)| (p.to_string(), pay.parse::<i64>().unwrap_or(0)))
            .unwrap_or_else(|| (request.product_api_id.clone(), 0));

        let params = Self::issue_params(request, pay_product_id);
        let response = self.sdk.new_order(&product_id, &params).await?;

        let api_id = match response.data.get("id").and_then(|v| v.as_str()) {
            Some(id) if response.is_success() => id.to_string(),
            _ => {
                // The refer id was already used: this submission happened
                // before, recover the existing vendor order.
                let duplicate = response
                    .errors
                    .as_ref()
                    .and_then(|e| e.as_str())
                    .map(|code| code == "duplicate_alternative_order_id")
                    .unwrap_or(false);
                if !duplicate {
                    return Err(rejected(response));
                }

                let lookup = self
                    .sdk
                    .order_id_by_alternative_id(&request.refer_id)
                    .await?;
                match lookup.data.get("order_id").and_then(|v| v.as_str()) {
                    Some(id) if lookup.is_success() => id.to_string(),
                    _ => return Err(rejected(lookup)),
                }
            }
        };

        let snapshot = self.snapshot(&api_id).await?;

        Ok(IssueOutcome {
            api_id,
            cert_apply_status: 2,
            dcv: snapshot.dcv,
            validation: snapshot.validation,
        })
    }

    async fn renew(&self, _request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        Err(VendorError::UnsupportedOperation("renew".to_string()))
    }

    async fn reissue(&self, _request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        Err(VendorError::UnsupportedOperation("reissue".to_string()))
    }

    async fn get(&self, api_id: &str) -> Result<CertSnapshot, VendorError> {
        self.snapshot(api_id).await
    }

    async fn cancel(&self, api_id: &str, _cert: &CertContext) -> Result<(), VendorError> {
        // Free certificates only; whatever the vendor answers, the cancel
        // is treated as done.
        let _ = self.sdk.cancel(api_id).await;
        Ok(())
    }

    async fn revalidate(&self, api_id: &str, _cert: &CertContext) -> Result<(), VendorError> {
        let response = self.sdk.revalidate(api_id).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(rejected(response))
        }
    }

    async fn update_dcv(
        &self,
        api_id: &str,
        method: ValidationMethod,
        cert: &CertContext,
    ) -> Result<DcvUpdate, VendorError> {
        let mut params = json!({ "dcv_method": method.as_str() });

        if method.is_email() {
            params["dcv_method"] = json!("email");
            let emails: Vec<Value> = split_domains(&cert.alternative_names)
                .into_iter()
                .map(|domain| {
                    json!({
                        "domain": domain,
                        "email": format!("{}@{}", method, root_domain(&domain)),
                    })
                })
                .collect();
            params["approval_emails"] = Value::Array(emails);
        }

        let response = self.sdk.update_dcv(api_id, &params).await?;
        if !response.is_success() {
            return Err(rejected(response));
        }

        let dcv_vals = response
            .data
            .get("dcv_vals")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(DcvUpdate {
            dcv: parse_dcv(&dcv_vals),
            validation: Some(parse_validation(&dcv_vals)),
        })
    }
}

fn rejected(response: VendorResponse) -> VendorError {
    VendorError::Rejected {
        message: response
            .msg
            .unwrap_or_else(|| "CA call failed".to_string()),
        errors: response.errors,
    }
}

fn map_status(status: &str) -> CertStatus {
    let status = match status {
        "" | "auditing" | "submitting" | "domain_verifing" | "issuing" | "reissue"
        | "reissuing" => "processing",
        "revoke_approving" | "revoke_confirming" | "revoking" | "cancel_confirm"
        | "confirming" => "approving",
        "issued" | "need_renew" => "active",
        "rejected" | "overtime" => "failed",
        "canceled" => "cancelled",
        other => other,
    };

    crate::status_from_vendor(status)
}

fn record_method(entry: &Value) -> ValidationMethod {
    match entry.get("dcv_method").and_then(|v| v.as_str()).unwrap_or("") {
        "dns" => ValidationMethod::Txt,
        "file" => ValidationMethod::File,
        _ => entry
            .get("approval_email")
            .and_then(|v| v.as_str())
            .and_then(|email| email.split('@').next())
            .and_then(|prefix| ValidationMethod::from_str(prefix).ok())
            .unwrap_or(ValidationMethod::Admin),
    }
}

fn parse_validation(dcv_vals: &[Value]) -> Vec<DomainValidation> {
    dcv_vals
        .iter()
        .map(|entry| {
            let domain = entry
                .get("domain")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let method = record_method(entry);
            let mut record = DomainValidation::new(domain.clone(), method);

            match method {
                ValidationMethod::Txt => {
                    record.host = entry
                        .get("auth_path")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_lowercase());
                    record.value = entry
                        .get("auth_val")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_lowercase());
                }
                ValidationMethod::File => {
                    let path = entry
                        .get("auth_path")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    record.name = Some(path.replace(WELL_KNOWN_PATH, ""));
                    record.link = Some(format!("//{}{}", domain, path));
                    record.content = entry
                        .get("auth_val")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                }
                _ => {
                    record.email = entry
                        .get("approval_email")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                }
            }

            record.verified = entry
                .get("verified")
                .map(|v| v.as_bool().unwrap_or(false) || v.as_i64().unwrap_or(0) != 0)
                .unwrap_or(false);
            record
        })
        .collect()
}

fn parse_dcv(dcv_vals: &[Value]) -> Option<Dcv> {
    let entry = dcv_vals.first()?;
    let method = record_method(entry);
    let mut dcv = Dcv::bare(method);

    match method {
        ValidationMethod::Txt => {
            dcv.dns = Some(DcvDns {
                host: entry
                    .get("auth_path")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_lowercase())
                    .unwrap_or_default()
                    .split('.')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                record_type: "TXT".to_string(),
                value: entry
                    .get("auth_val")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_lowercase())
                    .unwrap_or_default(),
            });
        }
        ValidationMethod::File => {
            let path = entry
                .get("auth_path")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            dcv.file = Some(DcvFile {
                name: path.replace(WELL_KNOWN_PATH, ""),
                path: path.to_string(),
                content: entry
                    .get("auth_val")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        _ => {}
    }

    Some(dcv)
}

fn parse_snapshot(data: &Value) -> CertSnapshot {
    let dcv_vals = data
        .get("dcv_val")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let status = map_status(data.get("status").and_then(|v| v.as_str()).unwrap_or(""));

    let (domain_verify, org_verify) = if status == CertStatus::Processing {
        (1, 1)
    } else {
        (2, 2)
    };

    CertSnapshot {
        status: Some(status),
        cert_apply_status: 2,
        domain_verify_status: domain_verify,
        org_verify_status: org_verify,
        common_name: data
            .pointer("/certificate/common_name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        alternative_names: data
            .pointer("/certificate/dns_names")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            }),
        dcv: parse_dcv(&dcv_vals),
        validation: Some(parse_validation(&dcv_vals)).filter(|v| !v.is_empty()),
        certificate: data
            .pointer("/certificate/pem")
            .and_then(|v| v.as_str())
            .filter(|pem| !pem.is_empty())
            .map(|pem| pem.trim().replace("\r\n", "\n")),
        csr: data
            .pointer("/certificate/csr")
            .and_then(|v| v.as_str())
            .filter(|csr| !csr.is_empty())
            .map(|csr| csr.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_maps() {
        assert_eq!(map_status("auditing"), CertStatus::Processing);
        assert_eq!(map_status(""), CertStatus::Processing);
        assert_eq!(map_status("revoke_confirming"), CertStatus::Approving);
        assert_eq!(map_status("issued"), CertStatus::Active);
        assert_eq!(map_status("need_renew"), CertStatus::Active);
        assert_eq!(map_status("canceled"), CertStatus::Cancelled);
        assert_eq!(map_status("overtime"), CertStatus::Failed);
        assert_eq!(map_status("garbage"), CertStatus::Failed);
    }

    #[test]
    fn dns_records_become_txt_validation() {
        let vals = vec![serde_json::json!({
            "domain": "example.com",
            "dcv_method": "dns",
            "auth_path": "_DNSAUTH.example.com",
            "auth_val": "TOKEN-VALUE",
            "verified": false
        })];

        let validation = parse_validation(&vals);
        assert_eq!(validation[0].method, ValidationMethod::Txt);
        assert_eq!(validation[0].host.as_deref(), Some("_dnsauth.example.com"));
        assert_eq!(validation[0].value.as_deref(), Some("token-value"));

        let dcv = parse_dcv(&vals).unwrap();
        assert_eq!(dcv.dns.as_ref().unwrap().host, "_dnsauth");
        assert_eq!(dcv.dns.as_ref().unwrap().record_type, "TXT");
    }

    #[test]
    fn file_records_keep_well_known_path() {
        let vals = vec![serde_json::json!({
            "domain": "example.com",
            "dcv_method": "file",
            "auth_path": "/.well-known/pki-validation/fileauth.txt",
            "auth_val": "content-token",
            "verified": 1
        })];

        let validation = parse_validation(&vals);
        assert_eq!(validation[0].name.as_deref(), Some("fileauth.txt"));
        assert_eq!(
            validation[0].link.as_deref(),
            Some("//example.com/.well-known/pki-validation/fileauth.txt")
        );
        assert!(validation[0].verified);
    }

    #[test]
    fn snapshot_substatus_follows_lifecycle() {
        let processing = parse_snapshot(&serde_json::json!({
            "status": "auditing",
            "certificate": { "common_name": "example.com", "dns_names": ["example.com"] },
            "dcv_val": []
        }));
        assert_eq!(processing.domain_verify_status, 1);

        let active = parse_snapshot(&serde_json::json!({
            "status": "issued",
            "certificate": { "common_name": "example.com", "dns_names": ["example.com"], "pem": "PEM" },
            "dcv_val": []
        }));
        assert_eq!(active.domain_verify_status, 2);
        assert_eq!(active.certificate.as_deref(), Some("PEM"));
    }
}
