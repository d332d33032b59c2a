//! Cross-field business validation. Produces a structured multi-field
//! report; a non-empty report aborts the whole action before any vendor
//! call is made.

use serde::Serialize;
use std::collections::BTreeMap;

use certpilot_core::{CertKind, ValidationMethod};
use certpilot_entities::products;
use certpilot_pki::domain::{
    add_gift_domains, domain_type, remove_gift_domains, san_counts, split_domains, DomainType,
};

use crate::models::SubmissionParams;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub basic: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub organization: Vec<String>,
    #[serde(skip_serializing_if = "DomainReport::is_empty")]
    pub domains: DomainReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_method: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub encryption: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainReport {
    #[serde(skip_serializing_if = "CountReport::is_empty")]
    pub count: CountReport,
    /// Per-domain errors keyed by position in the submitted list.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub items: BTreeMap<usize, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CountReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.basic.is_empty()
            && self.contact.is_empty()
            && self.organization.is_empty()
            && self.domains.is_empty()
            && self.period.is_none()
            && self.validation_method.is_none()
            && self.encryption.is_empty()
    }
}

impl DomainReport {
    pub fn is_empty(&self) -> bool {
        self.count.is_empty() && self.items.is_empty() && self.repeat.is_none()
    }
}

impl CountReport {
    pub fn is_empty(&self) -> bool {
        self.standard.is_none() && self.wildcard.is_none() && self.total.is_none()
    }
}

/// Decode a JSON array column into strings.
fn json_strings(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn product_periods(product: &products::Model) -> Vec<i32> {
    json_strings(&product.periods)
        .iter()
        .filter_map(|p| p.parse().ok())
        .collect()
}

/// Run every applicable check against one submission.
pub fn validate(params: &SubmissionParams, product: &products::Model) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_basic(params, &mut report);
    validate_contact(params, &mut report);
    validate_organization(params, &mut report);
    report.domains = validate_domains(&params.domains, product, params.validation_method);
    report.period = validate_period(params.period, product);
    report.validation_method = validate_method(params.validation_method, product);
    validate_encryption(params, product, &mut report);

    report
}

fn validate_basic(params: &SubmissionParams, report: &mut ValidationReport) {
    if let Some(refer_id) = &params.refer_id {
        if refer_id.len() != 32 || !refer_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            report
                .basic
                .push("refer id must be 32 alphanumeric characters".to_string());
        }
    }

    if let Some(unique_value) = &params.unique_value {
        if unique_value.len() < 16
            || unique_value.len() > 24
            || !unique_value.chars().all(|c| c.is_ascii_alphanumeric())
        {
            report
                .basic
                .push("unique value must be 16-24 alphanumeric characters".to_string());
        }
    }

    if matches!(params.action, CertKind::Renew | CertKind::Reissue) && params.order_id.is_none() {
        report.basic.push("order id is required".to_string());
    }
}

fn validate_contact(params: &SubmissionParams, report: &mut ValidationReport) {
    let Some(contact) = &params.contact else {
        return;
    };

    if contact.first_name.is_empty() || contact.first_name.len() > 16 {
        report
            .contact
            .push("first name must be 1-16 characters".to_string());
    }
    if contact.last_name.is_empty() || contact.last_name.len() > 40 {
        report
            .contact
            .push("last name must be 1-40 characters".to_string());
    }
    if contact.email.len() < 6 || contact.email.len() > 64 || !contact.email.contains('@') {
        report.contact.push("email address is invalid".to_string());
    }
    let phone_digits = contact.phone.chars().filter(|c| c.is_ascii_digit()).count();
    if phone_digits < 5 || phone_digits > 15 || phone_digits != contact.phone.len() {
        report
            .contact
            .push("phone must be 5-15 digits".to_string());
    }
}

fn validate_organization(params: &SubmissionParams, report: &mut ValidationReport) {
    let Some(org) = &params.organization else {
        return;
    };

    if org.name.len() < 2 || org.name.len() > 64 {
        report
            .organization
            .push("organization name must be 2-64 characters".to_string());
    }
    if org.registration_number.len() < 6 || org.registration_number.len() > 32 {
        report
            .organization
            .push("registration number must be 6-32 characters".to_string());
    }
    if org.country.len() != 2 {
        report
            .organization
            .push("country must be a 2-letter code".to_string());
    }
    if org.address.len() < 2 || org.city.len() < 2 || org.state.len() < 2 {
        report
            .organization
            .push("address, city and state are required".to_string());
    }
    if org.postcode.len() < 4 || org.postcode.len() > 16 {
        report
            .organization
            .push("postcode must be 4-16 characters".to_string());
    }
}

/// Domain list checks: type allowed per position, SAN caps, method
/// compatibility, duplicates.
pub fn validate_domains(
    domains: &str,
    product: &products::Model,
    method: ValidationMethod,
) -> DomainReport {
    let mut report = DomainReport::default();

    // Single-domain gift products validate against the wildcard alone.
    let effective = if product.gift_root_domain && product.total_max == 1 {
        remove_gift_domains(domains)
    } else {
        domains.to_string()
    };

    report.count = validate_san_counts(product, &effective);

    let common_name_types = json_strings(&product.common_name_types);
    let alternative_name_types = json_strings(&product.alternative_name_types);

    let list = split_domains(&effective);
    for (index, domain) in list.iter().enumerate() {
        let domain = domain.to_lowercase();
        let kind = domain_type(&domain);

        let allowed = if index == 0 {
            &common_name_types
        } else {
            &alternative_name_types
        };
        if !allowed.iter().any(|t| t == kind.as_str()) {
            report
                .items
                .entry(index)
                .or_default()
                .push(format!("{} type {} is not allowed", domain, kind.as_str()));
        }

        if kind == DomainType::Wildcard && method.is_file() {
            report.items.entry(index).or_default().push(format!(
                "wildcard domain {} cannot use the {} method",
                domain, method
            ));
        }

        if kind.is_ip() && !method.is_file() {
            report.items.entry(index).or_default().push(format!(
                "IP address {} can only use file validation methods",
                domain
            ));
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut repeated = Vec::new();
    for domain in &list {
        if !seen.insert(domain.to_lowercase()) {
            repeated.push(domain.clone());
        }
    }
    if !repeated.is_empty() {
        report.repeat = Some(format!("duplicate domains: {}", repeated.join(",")));
    }

    report
}

/// SAN caps, counting the gifted root when the product grants one.
pub fn validate_san_counts(product: &products::Model, domains: &str) -> CountReport {
    let mut report = CountReport::default();

    let effective = if product.gift_root_domain && product.total_max > 1 {
        add_gift_domains(domains)
    } else if product.gift_root_domain && product.total_max == 1 {
        remove_gift_domains(domains)
    } else {
        domains.to_string()
    };

    let counts = san_counts(&effective, false);

    if counts.standard_count > product.standard_max {
        report.standard = Some(format!(
            "standard domain count cannot exceed {}",
            product.standard_max
        ));
    }
    if counts.wildcard_count > product.wildcard_max {
        report.wildcard = Some(format!(
            "wildcard domain count cannot exceed {}",
            product.wildcard_max
        ));
    }
    if counts.standard_count + counts.wildcard_count > product.total_max {
        report.total = Some(format!(
            "total domain count cannot exceed {}",
            product.total_max
        ));
    }

    report
}

fn validate_period(period: i32, product: &products::Model) -> Option<String> {
    let periods = product_periods(product);
    if period != 0 && !periods.contains(&period) {
        return Some(format!(
            "period must be one of {}",
            periods
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ));
    }
    None
}

fn validate_method(method: ValidationMethod, product: &products::Model) -> Option<String> {
    let methods = json_strings(&product.validation_methods);
    if !methods.iter().any(|m| m == method.as_str()) {
        return Some(format!(
            "validation method must be one of {}",
            methods.join(",")
        ));
    }
    None
}

fn validate_encryption(
    params: &SubmissionParams,
    product: &products::Model,
    report: &mut ValidationReport,
) {
    let Some(encryption) = &params.encryption else {
        return;
    };

    if let Some(alg) = &encryption.alg {
        let allowed = json_strings(&product.encryption_alg);
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(alg)) {
            report.encryption.push(format!(
                "encryption algorithm must be one of {}",
                allowed.join(",").to_uppercase()
            ));
        }
    }

    if let Some(digest) = &encryption.digest_alg {
        let allowed = json_strings(&product.signature_digest_alg);
        if !allowed.iter().any(|d| d.eq_ignore_ascii_case(digest)) {
            report.encryption.push(format!(
                "digest algorithm must be one of {}",
                allowed.join(",").to_uppercase()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_core::{CertKind, Channel};
    use serde_json::json;

    fn product() -> products::Model {
        products::Model {
            id: 1,
            code: "dv-multi".to_string(),
            name: "DV Multi".to_string(),
            api_id: "100".to_string(),
            source: "racent".to_string(),
            brand: "sectigo".to_string(),
            ca: "sectigo".to_string(),
            validation_type: "dv".to_string(),
            common_name_types: json!(["standard", "wildcard"]),
            alternative_name_types: json!(["standard", "wildcard", "ipv4"]),
            validation_methods: json!(["cname", "txt", "http", "https", "file", "admin"]),
            periods: json!([12, 24]),
            encryption_alg: json!(["rsa", "ecdsa"]),
            signature_digest_alg: json!(["sha256"]),
            standard_min: 1,
            standard_max: 2,
            wildcard_min: 0,
            wildcard_max: 1,
            total_min: 1,
            total_max: 3,
            add_san: true,
            replace_san: true,
            reissue: true,
            renew: true,
            reuse_csr: false,
            gift_root_domain: false,
            refund_period: 30,
            cost: json!({"price": {"12": "100.00"}}),
            weight: 0,
            status: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn submission(domains: &str, method: ValidationMethod) -> SubmissionParams {
        SubmissionParams {
            action: CertKind::New,
            channel: Channel::Api,
            plus: true,
            refer_id: None,
            unique_value: None,
            order_id: None,
            user_id: Some(1),
            product_id: Some(1),
            period: 12,
            csr: None,
            csr_generate: true,
            encryption: None,
            private_key: None,
            validation_method: method,
            domains: domains.to_string(),
            contact: None,
            organization: None,
            issue_verify: false,
        }
    }

    #[test]
    fn accepts_a_clean_submission() {
        let report = validate(
            &submission("example.com,www.example.com", ValidationMethod::Cname),
            &product(),
        );
        assert!(report.is_empty(), "{:?}", report);
    }

    #[test]
    fn standard_count_over_max_names_the_limit() {
        let report = validate(
            &submission("a.com,b.com,c.com", ValidationMethod::Cname),
            &product(),
        );
        assert_eq!(
            report.domains.count.standard.as_deref(),
            Some("standard domain count cannot exceed 2")
        );
    }

    #[test]
    fn wildcard_rejects_file_methods() {
        let report = validate(
            &submission("*.example.com", ValidationMethod::Http),
            &product(),
        );
        let errors = report.domains.items.get(&0).unwrap();
        assert!(errors[0].contains("cannot use the http method"));
    }

    #[test]
    fn ip_requires_file_methods() {
        let report = validate(
            &submission("example.com,192.168.1.10", ValidationMethod::Cname),
            &product(),
        );
        let errors = report.domains.items.get(&1).unwrap();
        assert!(errors[0].contains("only use file validation"));

        let report = validate(
            &submission("example.com,192.168.1.10", ValidationMethod::Https),
            &product(),
        );
        assert!(report.domains.items.get(&1).is_none());
    }

    #[test]
    fn duplicate_domains_are_reported() {
        let report = validate(
            &submission("example.com,example.com", ValidationMethod::Cname),
            &product(),
        );
        assert!(report.domains.repeat.unwrap().contains("example.com"));
    }

    #[test]
    fn period_and_method_membership() {
        let mut params = submission("example.com", ValidationMethod::Cname);
        params.period = 36;
        let report = validate(&params, &product());
        assert!(report.period.unwrap().contains("12,24"));

        let mut params = submission("example.com", ValidationMethod::Postmaster);
        params.period = 12;
        let report = validate(&params, &product());
        assert!(report.validation_method.is_some());
    }

    #[test]
    fn gift_products_validate_with_root_added() {
        let mut product = product();
        product.gift_root_domain = true;

        // The gifted root rides along and stays inside the caps.
        let report = validate_san_counts(&product, "*.example.com,example.com");
        assert!(report.is_empty(), "{:?}", report);

        // The cap check sees the gifted root even when it is implicit.
        product.total_max = 1;
        product.wildcard_max = 1;
        let report = validate_san_counts(&product, "*.example.com,example.com");
        assert!(report.is_empty(), "{:?}", report);
    }

    #[test]
    fn ipv6_literals_classify_for_type_check() {
        let report = validate(
            &submission("example.com,2001:db8::1", ValidationMethod::Https),
            &product(),
        );
        // ipv6 is not in alternative_name_types for this product.
        assert!(report.domains.items.get(&1).unwrap()[0].contains("not allowed"));
    }
}
