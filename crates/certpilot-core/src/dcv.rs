//! Typed value objects for DCV instructions and per-domain validation
//! records. These are persisted as JSON columns but only cross the
//! store/load boundary through these structs, never as raw maps.

use serde::{Deserialize, Serialize};

use crate::status::ValidationMethod;

/// DNS record the domain owner must publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcvDns {
    pub host: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
}

/// File the domain owner must serve under the well-known path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcvFile {
    pub name: String,
    pub path: String,
    pub content: String,
}

/// The single DCV instruction set attached to a cert. Which of the
/// optional parts is populated depends on the method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dcv {
    pub method: ValidationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DcvDns>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<DcvFile>,
}

impl Dcv {
    /// An instruction set with no vendor-specific material yet.
    pub fn bare(method: ValidationMethod) -> Self {
        Dcv {
            method,
            dns: None,
            file: None,
        }
    }
}

/// One domain's validation state, produced by fanning the DCV instruction
/// out over the alternative-names list and merged with vendor-reported
/// records during sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainValidation {
    pub domain: String,
    pub method: ValidationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

impl DomainValidation {
    pub fn new(domain: impl Into<String>, method: ValidationMethod) -> Self {
        DomainValidation {
            domain: domain.into(),
            method,
            host: None,
            value: None,
            name: None,
            content: None,
            link: None,
            email: None,
            verified: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcv_json_shape() {
        let dcv = Dcv {
            method: ValidationMethod::Cname,
            dns: Some(DcvDns {
                host: "_abc".into(),
                record_type: "CNAME".into(),
                value: "x.y.sectigo.com".into(),
            }),
            file: None,
        };
        let json = serde_json::to_value(&dcv).unwrap();
        assert_eq!(json["method"], "cname");
        assert_eq!(json["dns"]["type"], "CNAME");
        assert!(json.get("file").is_none());

        let back: Dcv = serde_json::from_value(json).unwrap();
        assert_eq!(back, dcv);
    }

    #[test]
    fn validation_defaults_unverified() {
        let v: DomainValidation = serde_json::from_value(serde_json::json!({
            "domain": "example.com",
            "method": "txt"
        }))
        .unwrap();
        assert!(!v.verified);
    }
}
