//! Certum adapter. The refer id doubles as the vendor order id, DCV tokens
//! are vendor-issued codes under the `_certum` label, and revocation goes
//! by certificate serial once an order has issued.

use async_trait::async_trait;
use std::sync::Arc;

use certpilot_core::{
    random_alnum, CertStatus, CertumSettings, Dcv, DcvDns, DcvFile, DomainValidation,
    ValidationMethod,
};
use certpilot_pki::csr::csr_hash_algorithm;
use certpilot_pki::domain::{root_domain, split_domains};

use crate::adapter::VendorAdapter;
use crate::audit::CaLogStore;
use crate::certum::sdk::{CertumReturn, CertumSdk, Order, XmlParam};
use crate::errors::VendorError;
use crate::types::{
    CertContext, CertSnapshot, DcvUpdate, IssueOutcome, IssueRequest, VendorResponse,
};

const VENDOR_SUFFIX: &str = "certum.pl";
const FILE_NAME: &str = "certum.txt";
const WELL_KNOWN_PATH: &str = "/.well-known/pki-validation/certum.txt";

pub struct CertumAdapter {
    sdk: CertumSdk,
}

impl CertumAdapter {
    pub fn new(settings: CertumSettings, audit: Arc<dyn CaLogStore>) -> Self {
        Self {
            sdk: CertumSdk::new(settings, audit),
        }
    }

    fn san_entries(alternative_names: &str) -> XmlParam {
        XmlParam::node(
            "SANEntries",
            split_domains(alternative_names)
                .into_iter()
                .map(|domain| {
                    XmlParam::node("SANEntry", vec![XmlParam::text("DNSName", domain)])
                })
                .collect(),
        )
    }

    fn san_approver(method: ValidationMethod) -> XmlParam {
        XmlParam::node(
            "SANApprover",
            vec![
                XmlParam::text("approverMethod", api_method(method)),
                XmlParam::text(
                    "approverEmailPrefix",
                    if method.is_email() {
                        method.as_str().to_uppercase()
                    } else {
                        String::new()
                    },
                ),
                XmlParam::text("verificationNotificationEnabled", "false"),
            ],
        )
    }

    /// Certificates without the bonus validity are shortened to one year
    /// from today.
    fn shortened_validity() -> String {
        (chrono::Utc::now() + chrono::Duration::days(365))
            .format("%Y-%m-%d")
            .to_string()
    }

    fn order_parameters(request: &IssueRequest) -> Vec<XmlParam> {
        let contact_email = request
            .contact
            .as_ref()
            .map(|c| c.email.clone())
            .filter(|e| !e.is_empty());

        let mut fields = vec![
            XmlParam::text("orderID", request.refer_id.clone()),
            XmlParam::text(
                "customer",
                contact_email
                    .clone()
                    .unwrap_or_else(|| format!("{}@custom.certpilot.com", random_alnum(10))),
            ),
            XmlParam::text("productCode", request.product_api_id.clone()),
            XmlParam::text("CSR", request.csr.clone()),
            XmlParam::text("hashAlgorithm", csr_hash_algorithm(&request.csr)),
            XmlParam::text(
                "email",
                contact_email
                    .clone()
                    .unwrap_or_else(|| "admin@certpilot.com".to_string()),
            ),
            XmlParam::text(
                "revocationContactEmail",
                contact_email.unwrap_or_else(|| "admin@certpilot.com".to_string()),
            ),
        ];

        if !request.plus {
            fields.push(XmlParam::text(
                "shortenedValidityPeriod",
                Self::shortened_validity(),
            ));
        }

        if let Some(org) = &request.organization {
            let contact = request.contact.clone().unwrap_or_default();
            fields.push(XmlParam::text("givenName", contact.first_name.clone()));
            fields.push(XmlParam::text("surname", contact.last_name.clone()));
            fields.push(XmlParam::text("organization", org.name.clone()));
            fields.push(XmlParam::text("locality", org.city.clone()));
            fields.push(XmlParam::text("state", org.state.clone()));
            fields.push(XmlParam::text("country", org.country.clone()));
            fields.push(XmlParam::text("streetAddress", org.address.clone()));
            fields.push(XmlParam::text("postalCode", org.postcode.clone()));
        }

        fields
    }

    fn outcome(
        &self,
        action: &str,
        ret: &CertumReturn,
        method: ValidationMethod,
        domains: &str,
    ) -> Result<IssueOutcome, VendorError> {
        let response = CertumSdk::envelope(action, ret);
        let api_id = ret.order_id.clone().unwrap_or_default();

        if response.is_success() && !api_id.is_empty() {
            let code = ret
                .san_verification
                .as_ref()
                .and_then(|san| san.code.clone())
                .unwrap_or_default();

            return Ok(IssueOutcome {
                api_id,
                cert_apply_status: 2,
                dcv: Some(local_dcv(method, &code)),
                validation: Some(local_validation(method, &code, domains)),
            });
        }

        Err(rejected(response))
    }

    /// Reissued orders stack under the same id; the latest entry is the
    /// authoritative one.
    fn latest_order(ret: &CertumReturn) -> Option<Order> {
        ret.orders.as_ref()?.order.last().cloned()
    }
}

#[async_trait]
impl VendorAdapter for CertumAdapter {
    fn source(&self) -> &'static str {
        "certum"
    }

    async fn new_order(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let mut params = vec![XmlParam::node(
            "orderParameters",
            Self::order_parameters(request),
        )];
        params.push(Self::san_entries(&request.alternative_names));
        params.push(Self::san_approver(request.dcv.method));

        if let Some(org) = &request.organization {
            let contact = request.contact.clone().unwrap_or_default();
            params.push(XmlParam::node(
                "requestorInfo",
                vec![
                    XmlParam::text("email", contact.email.clone()),
                    XmlParam::text("firstName", contact.first_name.clone()),
                    XmlParam::text("lastName", contact.last_name.clone()),
                    XmlParam::text("phone", contact.phone.clone()),
                ],
            ));
            params.push(XmlParam::node(
                "organizationInfo",
                vec![XmlParam::text(
                    "taxIdentificationNumber",
                    org.registration_number.clone(),
                )],
            ));
        }

        let ret = self.sdk.quick_order(params).await?;
        self.outcome(
            "quickOrder",
            &ret,
            request.dcv.method,
            &request.alternative_names,
        )
    }

    async fn renew(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let mut params = vec![
            XmlParam::text(
                "customer",
                format!("{}@custom.certpilot.com", random_alnum(10)),
            ),
            XmlParam::text("productCode", request.product_api_id.clone()),
            XmlParam::text("CSR", request.csr.clone()),
            XmlParam::text("hashAlgorithm", csr_hash_algorithm(&request.csr)),
            XmlParam::text(
                "X509Cert",
                request.last_cert_pem.clone().unwrap_or_default(),
            ),
        ];
        if !request.plus {
            params.push(XmlParam::text(
                "shortenedValidityPeriod",
                Self::shortened_validity(),
            ));
        }
        params.push(Self::san_approver(request.dcv.method));

        let ret = self.sdk.renew_certificate(params).await?;
        self.outcome(
            "renewCertificate",
            &ret,
            request.dcv.method,
            &request.alternative_names,
        )
    }

    async fn reissue(&self, request: &IssueRequest) -> Result<IssueOutcome, VendorError> {
        let params = vec![
            XmlParam::text("CSR", request.csr.clone()),
            XmlParam::text("hashAlgorithm", csr_hash_algorithm(&request.csr)),
            XmlParam::text(
                "X509Cert",
                request.last_cert_pem.clone().unwrap_or_default(),
            ),
            Self::san_entries(&request.alternative_names),
            Self::san_approver(request.dcv.method),
        ];

        let ret = self.sdk.reissue_certificate(params).await?;
        self.outcome(
            "reissueCertificate",
            &ret,
            request.dcv.method,
            &request.alternative_names,
        )
    }

    async fn get(&self, api_id: &str) -> Result<CertSnapshot, VendorError> {
        let ret = self
            .sdk
            .get_order_by_order_id(vec![
                XmlParam::text("orderID", api_id),
                XmlParam::node(
                    "orderOption",
                    vec![
                        XmlParam::text("orderStatus", "true"),
                        XmlParam::text("orderDetails", "true"),
                        XmlParam::text("certificateDetails", "true"),
                    ],
                ),
            ])
            .await?;

        let response = CertumSdk::envelope("getOrderByOrderID", &ret);
        if !response.is_success() {
            return Err(rejected(response));
        }

        let order = Self::latest_order(&ret)
            .ok_or_else(|| VendorError::rejected("certificate information unavailable, try again later"))?;

        let mut status = map_status(
            order
                .order_status
                .as_ref()
                .map(|s| s.order_status.as_str())
                .unwrap_or(""),
        );
        let certificate_status = order
            .certificate_details
            .as_ref()
            .and_then(|d| d.certificate_status.as_deref())
            .unwrap_or("");
        if matches!(certificate_status, "REVOKING" | "REVOKED") {
            status = CertStatus::Revoked;
        }

        let mut snapshot = CertSnapshot {
            status: Some(status),
            vendor_id: order
                .order_status
                .as_ref()
                .and_then(|s| s.order_id.clone()),
            ..Default::default()
        };

        match status {
            CertStatus::Processing => {
                snapshot.cert_apply_status = 2;
                snapshot.domain_verify_status = 1;
                snapshot.org_verify_status = 1;
            }
            CertStatus::Approving | CertStatus::Active => {
                snapshot.cert_apply_status = 2;
                snapshot.domain_verify_status = 2;
                snapshot.org_verify_status = 2;
            }
            _ => {}
        }

        if status == CertStatus::Processing {
            if let Ok(states) = self.sdk.get_san_verification_state(api_id).await {
                if let Some(list) = states.san_verifications {
                    let mut names = Vec::new();
                    let mut validation = Vec::new();
                    for state in list.san_verification {
                        let verified = state
                            .manual_verification
                            .as_ref()
                            .and_then(|m| m.state.as_deref())
                            == Some("VERIFIED");
                        if !names.contains(&state.fqdn) {
                            names.push(state.fqdn.clone());
                        }
                        let mut record =
                            DomainValidation::new(state.fqdn, ValidationMethod::Admin);
                        record.verified = verified;
                        validation.push(record);
                    }
                    if !names.is_empty() {
                        snapshot.alternative_names = Some(names.join(","));
                    }
                    if !validation.is_empty() {
                        snapshot.validation = Some(validation);
                    }
                }
            }
        }

        if status == CertStatus::Active {
            snapshot.certificate = order
                .certificate_details
                .as_ref()
                .and_then(|d| d.x509_cert.clone())
                .map(|cert| format_certificate(&cert));

            if let Ok(bundle) = self.sdk.get_certificate(api_id).await {
                if let Some(ca) = bundle.ca_bundle {
                    let chain: Vec<String> = ca
                        .x509_cert
                        .iter()
                        .map(|cert| format_certificate(cert))
                        .collect();
                    if !chain.is_empty() {
                        snapshot.intermediate_cert = Some(chain.join("\n"));
                    }
                }
            }
        }

        Ok(snapshot)
    }

    async fn cancel(&self, api_id: &str, cert: &CertContext) -> Result<(), VendorError> {
        // An issued certificate must be revoked by serial; an order that
        // never issued is cancelled by id.
        let ret = match cert.serial_number.as_deref().filter(|s| !s.is_empty()) {
            Some(serial) => self.sdk.revoke_certificate(serial).await?,
            None => self.sdk.cancel_order(api_id).await?,
        };

        let action = if cert.serial_number.is_some() {
            "revokeCertificate"
        } else {
            "cancelOrder"
        };
        let response = CertumSdk::envelope(action, &ret);
        if response.is_success() {
            return Ok(());
        }

        // The cancel may have raced issuance: check the live state and
        // revoke by the serial the vendor now reports.
        let state = self
            .sdk
            .get_order_by_order_id(vec![
                XmlParam::text("orderID", api_id),
                XmlParam::node(
                    "orderOption",
                    vec![XmlParam::text("orderStatus", "true")],
                ),
            ])
            .await?;

        if CertumSdk::envelope("getOrderByOrderID", &state).is_success() {
            if let Some(order) = Self::latest_order(&state) {
                let order_status = order
                    .order_status
                    .as_ref()
                    .map(|s| s.order_status.as_str())
                    .unwrap_or("");
                if map_status(order_status) == CertStatus::Active {
                    let serial = order
                        .order_status
                        .as_ref()
                        .and_then(|s| s.serial_number.clone())
                        .unwrap_or_default();
                    let ret = self.sdk.revoke_certificate(&serial).await?;
                    let response = CertumSdk::envelope("revokeCertificate", &ret);
                    if response.is_success() {
                        return Ok(());
                    }
                    return Err(rejected(response));
                }
            }
        }

        Err(rejected(response))
    }

    async fn revalidate(&self, _api_id: &str, cert: &CertContext) -> Result<(), VendorError> {
        let dcv = cert
            .dcv
            .as_ref()
            .ok_or_else(|| VendorError::rejected("no validation method on record"))?;

        let code = match dcv.method {
            ValidationMethod::Txt => dcv
                .dns
                .as_ref()
                .map(|dns| dns.value.clone())
                .unwrap_or_default(),
            ValidationMethod::Cname => dcv
                .dns
                .as_ref()
                .map(|dns| dns.value.replace(&format!(".{}", VENDOR_SUFFIX), ""))
                .unwrap_or_default(),
            ValidationMethod::File => dcv
                .file
                .as_ref()
                .map(|file| file.content.replace(&format!("-{}", VENDOR_SUFFIX), ""))
                .unwrap_or_default(),
            _ => {
                return Err(VendorError::rejected(
                    "validation method cannot be re-verified automatically",
                ))
            }
        };

        let ret = self.sdk.perform_san_verification(&code).await?;
        let response = CertumSdk::envelope("performSanVerification", &ret);
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
        let ret = self
            .sdk
            .add_san_verification(vec![
                XmlParam::text("orderID", api_id),
                Self::san_approver(method),
            ])
            .await?;

        let response = CertumSdk::envelope("addSanVerification", &ret);
        if !response.is_success() {
            return Err(rejected(response));
        }

        let code = ret
            .san_verification
            .as_ref()
            .and_then(|san| san.code.clone())
            .unwrap_or_default();

        Ok(DcvUpdate {
            dcv: Some(local_dcv(method, &code)),
            validation: Some(local_validation(method, &code, &cert.alternative_names)),
        })
    }
}

/// The vendor returns certificates either as full PEM or as bare base64.
fn format_certificate(cert: &str) -> String {
    let cert = cert.trim().replace("\r\n", "\n");
    if cert.contains("BEGIN CERTIFICATE") {
        return cert;
    }

    let body: String = cert.chars().filter(|c| !c.is_whitespace()).collect();
    let wrapped = body
        .as_bytes()
        .chunks(64)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
        wrapped
    )
}

fn rejected(response: VendorResponse) -> VendorError {
    VendorError::Rejected {
        message: response
            .msg
            .unwrap_or_else(|| "CA call failed".to_string()),
        errors: response.errors,
    }
}

fn api_method(method: ValidationMethod) -> String {
    if method.is_email() {
        "EMAIL".to_string()
    } else {
        method.as_str().to_uppercase()
    }
}

fn map_status(status: &str) -> CertStatus {
    let status = status.to_ascii_lowercase();
    let status = match status.as_str() {
        "awaiting" | "verification" => "processing",
        "accepted" => "approving",
        "enrolled" => "active",
        "rejected" => "cancelled",
        other => other,
    };

    crate::status_from_vendor(status)
}

/// Vendor-issued verification code rendered into the instruction set.
fn local_dcv(method: ValidationMethod, code: &str) -> Dcv {
    let mut dcv = Dcv::bare(method);
    if code.is_empty() {
        return dcv;
    }

    match method {
        ValidationMethod::Txt => {
            dcv.dns = Some(DcvDns {
                host: "_certum".to_string(),
                record_type: "TXT".to_string(),
                value: code.to_string(),
            });
        }
        ValidationMethod::Cname => {
            dcv.dns = Some(DcvDns {
                host: "_certum".to_string(),
                record_type: "CNAME".to_string(),
                value: format!("{}.{}", code, VENDOR_SUFFIX),
            });
        }
        ValidationMethod::File => {
            dcv.file = Some(DcvFile {
                name: FILE_NAME.to_string(),
                path: WELL_KNOWN_PATH.to_string(),
                content: format!("{}-{}", code, VENDOR_SUFFIX),
            });
        }
        _ => {}
    }

    dcv
}

fn local_validation(method: ValidationMethod, code: &str, domains: &str) -> Vec<DomainValidation> {
    split_domains(domains)
        .into_iter()
        .map(|domain| {
            let mut record = DomainValidation::new(domain.clone(), method);
            match method {
                ValidationMethod::Txt => {
                    record.host = Some("_certum".to_string());
                    record.value = Some(code.to_string());
                }
                ValidationMethod::Cname => {
                    record.host = Some("_certum".to_string());
                    record.value = Some(format!("{}.{}", code, VENDOR_SUFFIX));
                }
                ValidationMethod::File => {
                    record.link = Some(format!("//{}{}", domain, WELL_KNOWN_PATH));
                    record.name = Some(FILE_NAME.to_string());
                    record.content = Some(format!("{}-{}", code, VENDOR_SUFFIX));
                }
                _ => {
                    record.email = Some(format!("{}@{}", method, root_domain(&domain)));
                }
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_maps() {
        assert_eq!(map_status("AWAITING"), CertStatus::Processing);
        assert_eq!(map_status("VERIFICATION"), CertStatus::Processing);
        assert_eq!(map_status("ACCEPTED"), CertStatus::Approving);
        assert_eq!(map_status("ENROLLED"), CertStatus::Active);
        assert_eq!(map_status("REJECTED"), CertStatus::Cancelled);
        assert_eq!(map_status("SOMETHING_NEW"), CertStatus::Failed);
    }

    #[test]
    fn dcv_code_rendering() {
        let cname = local_dcv(ValidationMethod::Cname, "tok123");
        assert_eq!(cname.dns.as_ref().unwrap().host, "_certum");
        assert_eq!(cname.dns.as_ref().unwrap().value, "tok123.certum.pl");

        let txt = local_dcv(ValidationMethod::Txt, "tok123");
        assert_eq!(txt.dns.as_ref().unwrap().value, "tok123");

        let file = local_dcv(ValidationMethod::File, "tok123");
        let file = file.file.unwrap();
        assert_eq!(file.name, "certum.txt");
        assert_eq!(file.content, "tok123-certum.pl");

        // No code, nothing derived.
        assert_eq!(
            local_dcv(ValidationMethod::Cname, ""),
            Dcv::bare(ValidationMethod::Cname)
        );
    }

    #[test]
    fn validation_covers_every_domain() {
        let records =
            local_validation(ValidationMethod::Admin, "x", "example.com,www.example.com");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].email.as_deref(), Some("admin@example.com"));
        assert_eq!(records[1].email.as_deref(), Some("admin@example.com"));
    }
}
