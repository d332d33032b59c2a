//! Racent adapter: normalizes the vendor's order model into the canonical
//! snapshot. Racent resells Sectigo-rooted products, so DCV material comes
//! back as CSR-hash records.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

use certpilot_core::{
    generate_unique_value, CertStatus, Dcv, DcvDns, DcvFile, DomainValidation, RacentSettings,
    ValidationMethod,
};
use certpilot_pki::domain::{root_domain, split_domains};

use crate::adapter::VendorAdapter;
use crate::audit::CaLogStore;
use crate::errors::VendorError;
use crate::racent::sdk::RacentSdk;
use crate::types::{
    CertContext, CertSnapshot, ContactInfo, DcvUpdate, IssueOutcome, IssueRequest,
    OrganizationInfo, VendorResponse,
};

const WELL_KNOWN_PATH: &str = "/.well-known/pki-validation/";

pub struct RacentAdapter {
    sdk: RacentSdk,
}

impl RacentAdapter {
    pub fn new(settings: RacentSettings, audit: Arc<dyn CaLogStore>) -> Self {
        Self {
            sdk: RacentSdk::new(settings, audit),
        }
    }

    fn years(period_months: i32) -> i32 {
        (period_months + 11) / 12
    }

    fn issue_params(request: &IssueRequest) -> Value {
        let method = dcv_to_api(request.dcv.method);

        let domain_info: Vec<Value> = split_domains(&request.alternative_names)
            .into_iter()
            .map(|domain| {
                json!({
                    "domainName": domain,
                    "dcvMethod": method,
                    "dcvEmail": if method == "EMAIL" {
                        format!("{}@{}", request.dcv.method, root_domain(&domain))
                    } else {
                        String::new()
                    },
                })
            })
            .collect();

        let mut params = json!({
            "csr": request.csr,
            "uniqueValue": request
                .unique_value
                .clone()
                .unwrap_or_else(generate_unique_value),
            "domainInfo": domain_info,
        });

        if let Some(contact) = &request.contact {
            let mut administrator = json!({
                "firstName": contact.first_name,
                "lastName": contact.last_name,
                "email": contact.email,
                "phone": contact.phone,
                "title": contact.title.clone().unwrap_or_default(),
            });

            if let Some(org) = &request.organization {
                administrator["organization"] = json!(org.name);
                administrator["country"] = json!(org.country);
                administrator["state"] = json!(org.state);
                administrator["city"] = json!(org.city);
                administrator["address"] = json!(org.address);
                administrator["postCode"] = json!(org.postcode);
            }

            params["Administrator"] = administrator.clone();
            if request.organization.is_some() {
                params["tech"] = administrator.clone();
                params["finance"] = administrator;
            }
        }

        if let Some(org) = &request.organization {
            params["organizationInfo"] = organization_to_api(org);
        }

        params["originalfromOthers"] = json!(if request.plus { 1 } else { 0 });

        params
    }

    fn outcome(response: VendorResponse) -> Result<IssueOutcome, VendorError> {
        let api_id = response
            .data
            .get("certId")
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
}

#[async_trait]
impl VendorAdapter for RacentAdapter {
    fn source(&self) -> &'static str {
        "racent"
    }

    async fn new_order(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let params = Self::issue_params(request);
        let response = self
            .sdk
            .place(
                &request.product_api_id,
                Self::years(request.period_months),
                &request.refer_id,
                &params,
            )
            .await?;
        Self::outcome(response)
    }

    async fn renew(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let renew_id = request
            .last_api_id
            .as_deref()
            .ok_or_else(|| VendorError::rejected("missing vendor reference for renewal"))?;
        let params = Self::issue_params(request);
        let response = self
            .sdk
            .renew(
                renew_id,
                Self::years(request.period_months),
                &request.refer_id,
                &params,
            )
            .await?;
        Self::outcome(response)
    }

    async fn reissue(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let cert_id = request
            .last_api_id
            .as_deref()
            .ok_or_else(|| VendorError::rejected("missing vendor reference for reissue"))?;
        let mut params = Self::issue_params(request);
        if let Some(org) = &request.organization {
            params["organizationInfo"] = organization_to_api(org);
        }
        let response = self
            .sdk
            .replace(cert_id, &request.refer_id, &params)
            .await?;
        Self::outcome(response)
    }

    async fn get(&self, api_id: &str) -> Result<CertSnapshot, VendorError> {
        let response = self.sdk.collect(api_id).await?;
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
        self.update_dcv(api_id, method, cert).await.map(|_| ())
    }

    async fn update_dcv(
        &self,
        api_id: &str,
        method: ValidationMethod,
        cert: &CertContext,
    ) -> Result<DcvUpdate, VendorError> {
        let api_method = dcv_to_api(method);
        let domains = split_domains(&cert.alternative_names);
        if domains.is_empty() {
            return Err(VendorError::rejected("no domains on record"));
        }

        let response = if domains.len() > 1 {
            let domain_info: Vec<Value> = domains
                .iter()
                .map(|domain| {
                    json!({
                        "domainName": domain,
                        "dcvMethod": api_method,
                        "dcvEmail": if api_method == "EMAIL" {
                            format!("{}@{}", method, root_domain(domain))
                        } else {
                            String::new()
                        },
                    })
                })
                .collect();

            let response = self
                .sdk
                .batch_update_dcv(api_id, &Value::Array(domain_info))
                .await?;
            if !response.is_success() {
                return Err(rejected(response));
            }
            self.sdk.collect(api_id).await?
        } else {
            let domain = &domains[0];
            let email = if api_method == "EMAIL" {
                format!("{}@{}", method, root_domain(domain))
            } else {
                String::new()
            };
            self.sdk
                .update_dcv(api_id, api_method, domain, &email)
                .await?
        };

        if !response.is_success() {
            return Err(rejected(response));
        }

        // The token material lives either at the top of the payload or one
        // level down, depending on the endpoint.
        let lookup = |key: &str| -> Option<String> {
            response
                .data
                .get(key)
                .or_else(|| response.data.get("data").and_then(|d| d.get(key)))
                .and_then(value_as_string)
        };

        let (record, value) = match method {
            ValidationMethod::Cname => (lookup("DCVdnsHost"), lookup("DCVdnsValue")),
            ValidationMethod::Http | ValidationMethod::Https => {
                (lookup("DCVfileName"), lookup("DCVfileContent"))
            }
            _ => (None, None),
        };

        Ok(DcvUpdate {
            dcv: Some(local_dcv(method, record.as_deref(), value.as_deref())),
            validation: Some(local_validation(
                method,
                record.as_deref(),
                value.as_deref(),
                &cert.alternative_names,
            )),
        })
    }

    async fn remove_unverified_domains(
        &self,
        api_id: &str,
        _cert: &CertContext,
    ) -> Result<(), VendorError> {
        let response = self.sdk.batch_remove_mdc_domain(api_id).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(rejected(response))
        }
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

fn organization_to_api(org: &OrganizationInfo) -> Value {
    json!({
        "organizationName": org.name,
        "registrationNumber": org.registration_number,
        "organizationPhone": org.phone,
        "organizationAddress": org.address,
        "organizationCity": org.city,
        "organizationState": org.state,
        "organizationCountry": org.country,
        "organizationPostCode": org.postcode,
    })
}

fn dcv_to_api(method: ValidationMethod) -> &'static str {
    match method {
        ValidationMethod::Cname => "CNAME_CSR_HASH",
        ValidationMethod::Http => "HTTP_CSR_HASH",
        ValidationMethod::Https => "HTTPS_CSR_HASH",
        ValidationMethod::Txt => "txt",
        ValidationMethod::File => "file",
        _ => "EMAIL",
    }
}

fn dcv_to_standard(api_method: &str) -> Option<ValidationMethod> {
    match api_method {
        "CNAME_CSR_HASH" => Some(ValidationMethod::Cname),
        "HTTP_CSR_HASH" => Some(ValidationMethod::Http),
        "HTTPS_CSR_HASH" => Some(ValidationMethod::Https),
        "EMAIL" => None,
        other => ValidationMethod::from_str(other).ok(),
    }
}

/// The vendor still echoes the pre-rebrand CA domain in token targets.
fn rebrand(value: String) -> String {
    value.replace("comodoca.com", "sectigo.com")
}

fn local_dcv(method: ValidationMethod, record: Option<&str>, value: Option<&str>) -> Dcv {
    let mut dcv = Dcv::bare(method);

    match method {
        ValidationMethod::Cname => {
            if let (Some(host), Some(value)) = (record, value) {
                dcv.dns = Some(DcvDns {
                    host: host.to_string(),
                    record_type: "CNAME".to_string(),
                    value: value.to_string(),
                });
            }
        }
        ValidationMethod::Http | ValidationMethod::Https => {
            if let (Some(name), Some(content)) = (record, value) {
                dcv.file = Some(DcvFile {
                    name: name.to_string(),
                    path: format!("{}{}", WELL_KNOWN_PATH, name),
                    content: content.to_string(),
                });
            }
        }
        _ => {}
    }

    dcv
}

fn local_validation(
    method: ValidationMethod,
    record: Option<&str>,
    value: Option<&str>,
    domains: &str,
) -> Vec<DomainValidation> {
    split_domains(domains)
        .into_iter()
        .map(|domain| {
            let mut validation = DomainValidation::new(domain.clone(), method);
            match method {
                ValidationMethod::Cname => {
                    validation.host = record.map(|r| r.to_string());
                    validation.value = value.map(|v| v.to_string());
                }
                ValidationMethod::Http | ValidationMethod::Https => {
                    if let Some(name) = record {
                        validation.link = Some(format!(
                            "{}://{}{}{}",
                            method, domain, WELL_KNOWN_PATH, name
                        ));
                        validation.name = Some(name.to_string());
                    }
                    validation.content = value.map(|v| v.to_string());
                }
                _ => {
                    validation.email = Some(format!("{}@{}", method, root_domain(&domain)));
                }
            }
            validation
        })
        .collect()
}

fn parse_snapshot(data: &Value) -> CertSnapshot {
    let mut snapshot = CertSnapshot {
        vendor_id: data.get("vendorId").and_then(value_as_string),
        cert_apply_status: process_status(data.pointer("/application/status")),
        domain_verify_status: process_status(data.pointer("/dcv/status")),
        org_verify_status: process_status(data.pointer("/ov/status")),
        status: Some(map_status(
            data.get("status").and_then(value_as_string).as_deref(),
        )),
        ..Default::default()
    };

    if snapshot.cert_apply_status == 2 {
        let dcv_list = data
            .get("dcvList")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut names: Vec<String> = Vec::new();
        let mut validation: Vec<DomainValidation> = Vec::new();

        for item in &dcv_list {
            let domain = item
                .get("domainName")
                .and_then(value_as_string)
                .unwrap_or_default();
            let email = item.get("dcvEmail").and_then(value_as_string);

            let method = match dcv_to_standard(
                item.get("dcvMethod")
                    .and_then(value_as_string)
                    .as_deref()
                    .unwrap_or(""),
            ) {
                Some(method) => method,
                None => email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .and_then(|prefix| ValidationMethod::from_str(prefix).ok())
                    .unwrap_or(ValidationMethod::Admin),
            };

            let mut record = DomainValidation::new(domain.clone(), method);
            match method {
                ValidationMethod::Cname => {
                    record.host = data.get("DCVdnsHost").and_then(value_as_string);
                    record.value = data
                        .get("DCVdnsValue")
                        .and_then(value_as_string)
                        .map(rebrand);
                }
                ValidationMethod::Http | ValidationMethod::Https => {
                    let name = data.get("DCVfileName").and_then(value_as_string);
                    if let Some(name) = &name {
                        record.link =
                            Some(format!("{}://{}{}{}", method, domain, WELL_KNOWN_PATH, name));
                    }
                    record.name = name;
                    record.content = data
                        .get("DCVfileContent")
                        .and_then(value_as_string)
                        .map(rebrand);
                }
                _ => {
                    record.email = email;
                }
            }
            record.verified = item
                .get("is_verify")
                .map(|v| v.as_i64().unwrap_or(0) != 0 || v.as_bool().unwrap_or(false))
                .unwrap_or(false);

            if !names.contains(&domain) {
                names.push(domain);
            }
            validation.push(record);
        }

        if let Some(first) = validation.first() {
            snapshot.common_name = Some(first.domain.clone());
            if !first.verified {
                let mut dcv = Dcv::bare(first.method);
                match first.method {
                    ValidationMethod::Cname => {
                        if let (Some(host), Some(value)) = (&first.host, &first.value) {
                            dcv.dns = Some(DcvDns {
                                host: host.clone(),
                                record_type: "CNAME".to_string(),
                                value: value.clone(),
                            });
                        }
                    }
                    ValidationMethod::Http | ValidationMethod::Https => {
                        if let (Some(name), Some(content)) = (&first.name, &first.content) {
                            dcv.file = Some(DcvFile {
                                name: name.clone(),
                                path: format!("{}{}", WELL_KNOWN_PATH, name),
                                content: content.clone(),
                            });
                        }
                    }
                    _ => {}
                }
                snapshot.dcv = Some(dcv);
            }
        }

        if !names.is_empty() {
            snapshot.alternative_names = Some(names.join(","));
        }
        if !validation.is_empty() {
            snapshot.validation = Some(validation);
        }
    }

    if let Some(admin) = data.pointer("/applyParams/Administrator") {
        let contact = ContactInfo {
            first_name: admin
                .get("firstName")
                .and_then(value_as_string)
                .unwrap_or_default(),
            last_name: admin
                .get("lastName")
                .and_then(value_as_string)
                .unwrap_or_default(),
            title: admin.get("title").and_then(value_as_string),
            email: admin
                .get("email")
                .and_then(value_as_string)
                .unwrap_or_default(),
            phone: admin
                .get("phone")
                .and_then(value_as_string)
                .unwrap_or_default(),
        };
        // Don't echo the sentinel contact the submission path writes when
        // the customer supplied none.
        if !is_placeholder_contact(&contact) && !contact.email.is_empty() {
            snapshot.contact = Some(contact);
        }
    }

    if let Some(org) = data.pointer("/applyParams/organizationInfo") {
        let name = org
            .get("organizationName")
            .and_then(value_as_string)
            .unwrap_or_default();
        if !name.is_empty() {
            snapshot.organization = Some(OrganizationInfo {
                name,
                registration_number: org
                    .get("registrationNumber")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
                phone: org
                    .get("organizationPhone")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
                address: org
                    .get("organizationAddress")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
                city: org
                    .get("organizationCity")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
                state: org
                    .get("organizationState")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
                country: org
                    .get("organizationCountry")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
                postcode: org
                    .get("organizationPostCode")
                    .and_then(value_as_string)
                    .unwrap_or_default(),
            });
        }
    }

    snapshot.csr = data.pointer("/applyParams/csr").and_then(value_as_string);
    snapshot.certificate = data
        .get("certificate")
        .and_then(value_as_string)
        .map(normalize_pem);
    snapshot.intermediate_cert = data
        .get("caCertificate")
        .and_then(value_as_string)
        .map(normalize_pem);

    snapshot
}

fn is_placeholder_contact(contact: &ContactInfo) -> bool {
    contact.first_name == "default" && contact.last_name == "default"
}

fn map_status(status: Option<&str>) -> CertStatus {
    let status = status.unwrap_or("").to_ascii_lowercase();
    let status = match status.as_str() {
        "pending" => "processing",
        "complete" => "active",
        other => other,
    };

    crate::status_from_vendor(status)
}

fn process_status(value: Option<&Value>) -> i32 {
    match value.and_then(|v| v.as_str()).unwrap_or("notdone") {
        "processing" => 1,
        "done" => 2,
        _ => 0,
    }
}

fn normalize_pem(pem: String) -> String {
    pem.trim().replace("\r\n", "\n")
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
    fn unknown_vendor_status_fails_closed() {
        assert_eq!(map_status(Some("weird_state")), CertStatus::Failed);
        assert_eq!(map_status(None), CertStatus::Failed);
        assert_eq!(map_status(Some("pending")), CertStatus::Processing);
        assert_eq!(map_status(Some("complete")), CertStatus::Active);
        assert_eq!(map_status(Some("approving")), CertStatus::Approving);
    }

    #[test]
    fn snapshot_parses_dcv_list() {
        let data = serde_json::json!({
            "vendorId": "V-1",
            "status": "pending",
            "application": { "status": "done" },
            "dcv": { "status": "processing" },
            "ov": { "status": "notdone" },
            "DCVdnsHost": "_abc123",
            "DCVdnsValue": "x.y.comodoca.com",
            "dcvList": [
                {
                    "domainName": "example.com",
                    "dcvMethod": "CNAME_CSR_HASH",
                    "dcvEmail": "",
                    "is_verify": 0
                },
                {
                    "domainName": "www.example.com",
                    "dcvMethod": "EMAIL",
                    "dcvEmail": "admin@example.com",
                    "is_verify": 1
                }
            ]
        });

        let snapshot = parse_snapshot(&data);
        assert_eq!(snapshot.status, Some(CertStatus::Processing));
        assert_eq!(snapshot.cert_apply_status, 2);
        assert_eq!(snapshot.domain_verify_status, 1);
        assert_eq!(
            snapshot.alternative_names.as_deref(),
            Some("example.com,www.example.com")
        );

        let validation = snapshot.validation.unwrap();
        assert_eq!(validation[0].method, ValidationMethod::Cname);
        // Rebranded token target.
        assert_eq!(validation[0].value.as_deref(), Some("x.y.sectigo.com"));
        assert!(!validation[0].verified);
        assert_eq!(validation[1].method, ValidationMethod::Admin);
        assert!(validation[1].verified);

        // The first unverified record seeds the snapshot DCV.
        let dcv = snapshot.dcv.unwrap();
        assert_eq!(dcv.method, ValidationMethod::Cname);
        assert_eq!(dcv.dns.unwrap().host, "_abc123");
    }

    #[test]
    fn placeholder_contact_is_suppressed() {
        let data = serde_json::json!({
            "status": "pending",
            "application": { "status": "notdone" },
            "applyParams": {
                "Administrator": {
                    "firstName": "default",
                    "lastName": "default",
                    "email": "ops@reseller.example"
                }
            }
        });

        let snapshot = parse_snapshot(&data);
        assert!(snapshot.contact.is_none());
    }

    #[test]
    fn years_round_up() {
        assert_eq!(RacentAdapter::years(12), 1);
        assert_eq!(RacentAdapter::years(13), 2);
        assert_eq!(RacentAdapter::years(24), 2);
    }
}
