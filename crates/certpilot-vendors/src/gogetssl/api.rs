//! GoGetSSL adapter. The vendor's order model reports the common name and
//! the SAN list separately, hands DNS tokens back as whole record strings,
//! and uses a placeholder admin contact for submissions without one.

use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use certpilot_core::{
    generate_unique_value, CertStatus, Dcv, DcvDns, DcvFile, DomainValidation, GogetsslSettings,
    ValidationMethod,
};
use certpilot_kv::CounterStore;
use certpilot_pki::domain::{root_domain, split_domains};

use crate::adapter::VendorAdapter;
use crate::audit::CaLogStore;
use crate::errors::VendorError;
use crate::gogetssl::sdk::GogetsslSdk;
use crate::types::{
    CertContext, CertSnapshot, ContactInfo, DcvUpdate, IssueOutcome, IssueRequest,
    OrganizationInfo, VendorResponse,
};

const WELL_KNOWN_PATH: &str = "/.well-known/pki-validation/";

/// Contact sentinel written when a submission carries no admin contact;
/// suppressed when the vendor echoes it back.
const PLACEHOLDER_NAME: &str = "default";

pub struct GogetsslAdapter {
    sdk: GogetsslSdk,
}

impl GogetsslAdapter {
    pub fn new(
        settings: GogetsslSettings,
        audit: Arc<dyn CaLogStore>,
        kv: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            sdk: GogetsslSdk::new(settings, audit, kv),
        }
    }

    fn base_params(request: &IssueRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("server_count".to_string(), "-1".to_string()),
            ("webserver_type".to_string(), "-1".to_string()),
            ("product_id".to_string(), request.product_api_id.clone()),
            ("period".to_string(), request.period_months.to_string()),
            ("csr".to_string(), request.csr.clone()),
            (
                "unique_code".to_string(),
                request
                    .unique_value
                    .clone()
                    .unwrap_or_else(generate_unique_value),
            ),
        ];

        let domains = split_domains(&request.alternative_names);
        if domains.len() > 1 {
            params.push(("dns_names".to_string(), domains[1..].join(",")));
        }

        let api_method = dcv_to_api(request.dcv.method);
        params.push(("dcv_method".to_string(), api_method.to_string()));

        if api_method == "email" {
            params.push((
                "approver_email".to_string(),
                format!("{}@{}", request.dcv.method, root_domain(&request.common_name)),
            ));
            if domains.len() > 2 {
                let emails: Vec<String> = domains[1..]
                    .iter()
                    .map(|d| format!("{}@{}", request.dcv.method, root_domain(d)))
                    .collect();
                params.push(("approver_emails".to_string(), emails.join(",")));
            }
        }

        params
    }

    fn order_params(request: &IssueRequest) -> Vec<(String, String)> {
        let mut params = Self::base_params(request);

        let (first, last, phone, title, email) = match &request.contact {
            Some(contact) => (
                contact.first_name.clone(),
                contact.last_name.clone(),
                contact.phone.clone(),
                contact.title.clone().unwrap_or_else(|| "IT".to_string()),
                contact.email.clone(),
            ),
            None => (
                PLACEHOLDER_NAME.to_string(),
                PLACEHOLDER_NAME.to_string(),
                "13900000000".to_string(),
                "IT".to_string(),
                "admin@reseller.invalid".to_string(),
            ),
        };

        params.push(("admin_firstname".to_string(), first.clone()));
        params.push(("admin_lastname".to_string(), last.clone()));
        params.push(("admin_phone".to_string(), phone.clone()));
        params.push(("admin_title".to_string(), title.clone()));
        params.push(("admin_email".to_string(), email.clone()));

        params.push(("tech_firstname".to_string(), first));
        params.push(("tech_lastname".to_string(), last));
        params.push(("tech_phone".to_string(), phone));
        params.push(("tech_title".to_string(), title));
        params.push(("tech_email".to_string(), email));

        if let Some(org) = &request.organization {
            params.push(("org_name".to_string(), org.name.clone()));
            params.push(("org_division".to_string(), "IT".to_string()));
            params.push(("org_addressline1".to_string(), org.address.clone()));
            params.push(("org_city".to_string(), org.city.clone()));
            params.push(("org_region".to_string(), org.state.clone()));
            params.push(("org_country".to_string(), org.country.clone()));
            params.push(("org_phone".to_string(), org.phone.clone()));
            params.push(("org_postalcode".to_string(), org.postcode.clone()));

            params.push(("admin_organization".to_string(), org.name.clone()));
            params.push(("admin_addressline1".to_string(), org.address.clone()));
            params.push(("admin_city".to_string(), org.city.clone()));
            params.push(("admin_country".to_string(), org.country.clone()));

            params.push(("tech_organization".to_string(), org.name.clone()));
            params.push(("tech_addressline1".to_string(), org.address.clone()));
            params.push(("tech_city".to_string(), org.city.clone()));
            params.push(("tech_country".to_string(), org.country.clone()));
        }

        params
    }

    fn outcome(response: VendorResponse) -> Result<IssueOutcome, VendorError> {
        let api_id = response
            .data
            .get("order_id")
            .and_then(value_as_string)
            .unwrap_or_default();

        if response.is_success() && !api_id.is_empty() {
            return Ok(IssueOutcome {
                api_id,
                cert_apply_status: 0,
                dcv: None,
                validation: None,
            });
        }

        Err(rejected(response))
    }

    /// Domains still awaiting validation, paired with the per-domain
    /// method value the change endpoint expects.
    fn unverified(
        cert: &CertContext,
        method: ValidationMethod,
    ) -> (Vec<String>, Vec<String>) {
        let api_method = dcv_to_api(method);
        let mut domains = Vec::new();
        let mut methods = Vec::new();

        for record in &cert.validation {
            if !record.verified {
                domains.push(record.domain.clone());
                methods.push(if api_method == "email" {
                    format!("{}@{}", method, root_domain(&record.domain))
                } else {
                    api_method.to_string()
                });
            }
        }

        (domains, methods)
    }
}

#[async_trait]
impl VendorAdapter for GogetsslAdapter {
    fn source(&self) -> &'static str {
        "gogetssl"
    }

    async fn new_order(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let params = Self::order_params(request);
        // Orders with bonus validity go through the renew endpoint, which
        // grants the extra time on the vendor side.
        let response = if request.plus {
            self.sdk.renew_order(params).await?
        } else {
            self.sdk.new_order(params).await?
        };
        Self::outcome(response)
    }

    async fn renew(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let response = self.sdk.renew_order(Self::order_params(request)).await?;
        Self::outcome(response)
    }

    async fn reissue(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let order_id = request
            .last_api_id
            .as_deref()
            .ok_or_else(|| VendorError::rejected("missing vendor reference for reissue"))?;
        let response = self
            .sdk
            .reissue(order_id, Self::base_params(request))
            .await?;
        Self::outcome(response)
    }

    async fn get(&self, api_id: &str) -> Result<CertSnapshot, VendorError> {
        let response = self.sdk.get_status(api_id).await?;
        if !response.is_success() {
            return Err(rejected(response));
        }
        Ok(parse_snapshot(&response.data))
    }

    async fn cancel(&self, api_id: &str, _cert: &CertContext) -> Result<(), VendorError> {
        let response = self.sdk.cancel(api_id).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(rejected(response))
        }
    }

    async fn revalidate(&self, api_id: &str, cert: &CertContext) -> Result<(), VendorError> {
        let method = cert
            .dcv
            .as_ref()
            .map(|dcv| dcv.method)
            .ok_or_else(|| VendorError::rejected("no validation method on record"))?;

        let (domains, methods) = Self::unverified(cert, method);
        if domains.is_empty() {
            return Err(VendorError::rejected("no unverified domains"));
        }

        let response = self
            .sdk
            .batch_update_dcv(api_id, &domains.join(","), &methods.join(","))
            .await?;
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
        let (domains, methods) = Self::unverified(cert, method);
        if domains.is_empty() {
            return Err(VendorError::rejected("no unverified domains"));
        }

        let response = self
            .sdk
            .batch_update_dcv(api_id, &domains.join(","), &methods.join(","))
            .await?;
        if !response.is_success() {
            return Err(rejected(response));
        }

        let status = self.sdk.get_status(api_id).await?;
        if !status.is_success() {
            return Err(rejected(status));
        }

        let snapshot = parse_snapshot(&status.data);
        Ok(DcvUpdate {
            dcv: snapshot.dcv,
            validation: snapshot.validation,
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

fn dcv_to_api(method: ValidationMethod) -> &'static str {
    match method {
        ValidationMethod::Cname | ValidationMethod::Txt => "dns",
        ValidationMethod::File => "file",
        ValidationMethod::Http => "http",
        ValidationMethod::Https => "https",
        _ => "email",
    }
}

fn map_status(status: &str) -> CertStatus {
    let status = status.to_ascii_lowercase();
    let status = match status.as_str() {
        "pending" | "incomplete" | "new_order" | "unpaid" | "reissued" => "processing",
        "rejected" => "revoked",
        other => other,
    };

    crate::status_from_vendor(status)
}

/// `"_host.domain. CNAME target."` / `"_host.domain.   IN   TXT   value"`
/// record strings broken into host/type/value.
fn parse_dns_record(record: &str) -> Option<DcvDns> {
    for (separator, record_type) in [(" CNAME ", "cname"), ("   IN   TXT   ", "txt")] {
        if let Some((left, right)) = record.split_once(separator) {
            let left = left.trim();
            let host = if left.starts_with('_') {
                left.split('.').next().unwrap_or(left).to_string()
            } else {
                "@".to_string()
            };
            return Some(DcvDns {
                host,
                record_type: record_type.to_string(),
                value: right.trim().replace('"', "").to_lowercase(),
            });
        }
    }
    None
}

fn parse_approver_dcv(approver_method: &Value) -> Option<Dcv> {
    let map = approver_method.as_object()?;
    let (kind, payload) = map.iter().next()?;

    match kind.as_str() {
        "dns" => {
            let dns = parse_dns_record(payload.get("record")?.as_str()?)?;
            let method = ValidationMethod::from_str(&dns.record_type).ok()?;
            Some(Dcv {
                method,
                dns: Some(dns),
                file: None,
            })
        }
        "http" | "https" | "file" => {
            let method = ValidationMethod::from_str(kind).ok()?;
            let name = payload.get("filename")?.as_str()?.trim().to_string();
            Some(Dcv {
                method,
                dns: None,
                file: Some(DcvFile {
                    path: format!("{}{}", WELL_KNOWN_PATH, name),
                    content: payload
                        .get("content")?
                        .as_str()?
                        .replace("\r\n", "\n")
                        .trim()
                        .to_string(),
                    name,
                }),
            })
        }
        "email" => {
            let prefix = payload.as_str()?.split('@').next()?;
            ValidationMethod::from_str(prefix).ok().map(Dcv::bare)
        }
        _ => None,
    }
}

fn common_name_validation(common_name: &str, dcv: &Dcv, dcv_status: i64) -> DomainValidation {
    let mut record = DomainValidation::new(common_name, dcv.method);

    if dcv.method.is_dns() {
        if let Some(dns) = &dcv.dns {
            record.host = Some(dns.host.clone());
            record.value = Some(dns.value.clone());
        }
    } else if dcv.method.is_file() {
        if let Some(file) = &dcv.file {
            let scheme = match dcv.method {
                ValidationMethod::File => "//".to_string(),
                method => format!("{}://", method),
            };
            record.link = Some(format!("{}{}{}{}", scheme, common_name, WELL_KNOWN_PATH, file.name));
            record.name = Some(file.name.clone());
            record.content = Some(file.content.clone());
        }
    } else {
        record.email = Some(format!("{}@{}", dcv.method, root_domain(common_name)));
    }

    record.verified = dcv_status == 2;
    record
}

fn san_validation(san: &[Value]) -> Vec<DomainValidation> {
    san.iter()
        .filter_map(|entry| {
            let domain = entry.get("san_name")?.as_str()?.to_string();
            let api_method = entry
                .get("validation_method")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let mut record = DomainValidation::new(domain.clone(), ValidationMethod::Admin);
            match api_method {
                "dns" => {
                    let dns = parse_dns_record(
                        entry
                            .pointer("/validation/dns/record")
                            .and_then(|v| v.as_str())?,
                    )?;
                    record.method = ValidationMethod::from_str(&dns.record_type).ok()?;
                    record.host = Some(dns.host);
                    record.value = Some(dns.value);
                }
                "http" | "https" | "file" => {
                    record.method = ValidationMethod::from_str(api_method).ok()?;
                    let name = entry
                        .pointer(&format!("/validation/{}/filename", api_method))
                        .and_then(|v| v.as_str())?
                        .trim()
                        .to_string();
                    let scheme = if api_method == "file" {
                        "//".to_string()
                    } else {
                        format!("{}://", api_method)
                    };
                    record.link = Some(format!("{}{}{}{}", scheme, domain, WELL_KNOWN_PATH, name));
                    record.name = Some(name);
                    record.content = entry
                        .pointer(&format!("/validation/{}/content", api_method))
                        .and_then(|v| v.as_str())
                        .map(|c| c.replace("\r\n", "\n").trim().to_string());
                }
                _ => {
                    let email = entry.get("email").and_then(|v| v.as_str()).unwrap_or("");
                    record.method = email
                        .split('@')
                        .next()
                        .and_then(|prefix| ValidationMethod::from_str(prefix).ok())
                        .unwrap_or(ValidationMethod::Admin);
                    record.email = Some(email.to_string());
                }
            }

            record.verified = entry.get("status").and_then(|v| v.as_i64()).unwrap_or(0) == 2;
            Some(record)
        })
        .collect()
}

fn parse_snapshot(data: &Value) -> CertSnapshot {
    let raw_status = data
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let status = map_status(raw_status);

    let mut snapshot = CertSnapshot {
        vendor_id: data.get("partner_order_id").and_then(value_as_string),
        common_name: data.get("domain").and_then(value_as_string),
        status: Some(status),
        ..Default::default()
    };

    let raw_is_early = matches!(raw_status, "pending" | "unpaid");
    if status == CertStatus::Processing {
        snapshot.cert_apply_status = if raw_is_early { 0 } else { 2 };
        snapshot.domain_verify_status = if raw_is_early { 0 } else { 1 };
        snapshot.org_verify_status = if raw_is_early { 0 } else { 1 };
    }
    if status == CertStatus::Active {
        snapshot.cert_apply_status = 2;
        snapshot.domain_verify_status = 2;
        snapshot.org_verify_status = 2;
    }

    if snapshot.cert_apply_status == 2 {
        if let Some(dcv) = data
            .get("approver_method")
            .and_then(parse_approver_dcv)
        {
            let dcv_status = data.get("dcv_status").and_then(|v| v.as_i64()).unwrap_or(0);
            let mut validation = vec![common_name_validation(
                snapshot.common_name.as_deref().unwrap_or_default(),
                &dcv,
                dcv_status,
            )];
            validation.extend(san_validation(
                data.get("san").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]),
            ));

            snapshot.alternative_names = Some(
                validation
                    .iter()
                    .map(|v| v.domain.clone())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            snapshot.validation = Some(validation);
            snapshot.dcv = Some(dcv);
        }
    }

    let first = data
        .get("admin_firstname")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let last = data
        .get("admin_lastname")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if first != PLACEHOLDER_NAME || last != PLACEHOLDER_NAME {
        snapshot.contact = Some(ContactInfo {
            first_name: first.to_string(),
            last_name: last.to_string(),
            title: data.get("admin_title").and_then(value_as_string),
            email: data
                .get("admin_email")
                .and_then(value_as_string)
                .unwrap_or_default(),
            phone: data
                .get("admin_phone")
                .and_then(value_as_string)
                .unwrap_or_default(),
        });
    }

    let org_name = data
        .get("org_name")
        .and_then(value_as_string)
        .or_else(|| data.get("admin_organization").and_then(value_as_string));
    if let Some(name) = org_name.filter(|n| !n.is_empty()) {
        snapshot.organization = Some(OrganizationInfo {
            name,
            registration_number: String::new(),
            phone: data
                .get("org_phone")
                .and_then(value_as_string)
                .unwrap_or_default(),
            address: data
                .get("org_addressline1")
                .and_then(value_as_string)
                .unwrap_or_default(),
            city: data
                .get("org_city")
                .and_then(value_as_string)
                .unwrap_or_default(),
            state: data
                .get("org_region")
                .and_then(value_as_string)
                .unwrap_or_default(),
            country: data
                .get("org_country")
                .and_then(value_as_string)
                .unwrap_or_default(),
            postcode: data
                .get("org_postalcode")
                .and_then(value_as_string)
                .unwrap_or_default(),
        });
    }

    snapshot.csr = data.get("csr_code").and_then(value_as_string);
    snapshot.certificate = data
        .get("crt_code")
        .and_then(value_as_string)
        .map(|c| c.trim().replace("\r\n", "\n"));
    snapshot.intermediate_cert = data
        .get("ca_code")
        .and_then(value_as_string)
        .map(|c| c.trim().replace("\r\n", "\n"));

    snapshot
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_record_strings_are_parsed() {
        let cname = parse_dns_record(
            "_a1b2c3.example.com. CNAME d4e5.f6a7.sectigo.com.",
        )
        .unwrap();
        assert_eq!(cname.host, "_a1b2c3");
        assert_eq!(cname.record_type, "cname");
        assert_eq!(cname.value, "d4e5.f6a7.sectigo.com.");

        let txt =
            parse_dns_record("_token.example.com   IN   TXT   \"abc-DEF\"").unwrap();
        assert_eq!(txt.host, "_token");
        assert_eq!(txt.record_type, "txt");
        assert_eq!(txt.value, "abc-def");

        assert!(parse_dns_record("no separators here").is_none());
    }

    #[test]
    fn status_mapping_fails_closed() {
        assert_eq!(map_status("new_order"), CertStatus::Processing);
        assert_eq!(map_status("rejected"), CertStatus::Revoked);
        assert_eq!(map_status("active"), CertStatus::Active);
        assert_eq!(map_status("???"), CertStatus::Failed);
    }

    #[test]
    fn snapshot_suppresses_placeholder_contact() {
        let data = serde_json::json!({
            "status": "active",
            "domain": "example.com",
            "admin_firstname": "default",
            "admin_lastname": "default",
            "crt_code": "PEM\r\nDATA",
        });

        let snapshot = parse_snapshot(&data);
        assert!(snapshot.contact.is_none());
        assert_eq!(snapshot.certificate.as_deref(), Some("PEM\nDATA"));
        assert_eq!(snapshot.cert_apply_status, 2);
    }

    #[test]
    fn snapshot_builds_validation_from_approver_method() {
        let data = serde_json::json!({
            "status": "processing",
            "domain": "example.com",
            "dcv_status": 2,
            "approver_method": {
                "dns": { "record": "_h.example.com. CNAME t.sectigo.com." }
            },
            "san": [
                {
                    "san_name": "www.example.com",
                    "validation_method": "http",
                    "validation": { "http": { "filename": "A1.txt", "content": "tok" } },
                    "status": 0
                }
            ],
            "admin_firstname": "Jane",
            "admin_lastname": "Doe",
        });

        let snapshot = parse_snapshot(&data);
        assert_eq!(snapshot.cert_apply_status, 2);
        let validation = snapshot.validation.unwrap();
        assert_eq!(validation.len(), 2);
        assert_eq!(validation[0].method, ValidationMethod::Cname);
        assert!(validation[0].verified);
        assert_eq!(validation[1].method, ValidationMethod::Http);
        assert_eq!(
            validation[1].link.as_deref(),
            Some("http://www.example.com/.well-known/pki-validation/A1.txt")
        );
        assert_eq!(
            snapshot.alternative_names.as_deref(),
            Some("example.com,www.example.com")
        );
        assert!(snapshot.contact.is_some());
    }
}
