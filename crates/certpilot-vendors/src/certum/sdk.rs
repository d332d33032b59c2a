//! Certum transport: an envelope-based RPC session over HTTP POST. The
//! account credentials ride inside every call envelope (`requestHeader/
//! authToken`); they are injected here and never appear in the audit log.
//!
//! Requests are built as a small parameter tree rendered to XML; responses
//! are the `<return>` document deserialized through quick-xml.

use quick_xml::escape::escape;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use certpilot_core::CertumSettings;

use crate::audit::{CaLogEntry, CaLogStore};
use crate::errors::VendorError;
use crate::types::VendorResponse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One node of an RPC parameter document.
#[derive(Debug, Clone)]
pub enum XmlParam {
    Text(&'static str, String),
    Node(&'static str, Vec<XmlParam>),
}

impl XmlParam {
    pub fn text(name: &'static str, value: impl Into<String>) -> Self {
        XmlParam::Text(name, value.into())
    }

    pub fn node(name: &'static str, children: Vec<XmlParam>) -> Self {
        XmlParam::Node(name, children)
    }

    fn render(&self, out: &mut String) {
        match self {
            XmlParam::Text(name, value) => {
                out.push('<');
                out.push_str(name);
                out.push('>');
                out.push_str(&escape(value.as_str()));
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            XmlParam::Node(name, children) => {
                out.push('<');
                out.push_str(name);
                out.push('>');
                for child in children {
                    child.render(out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
    }

    /// JSON shadow of the parameter tree for the audit trail.
    fn to_json(&self) -> (String, serde_json::Value) {
        match self {
            XmlParam::Text(name, value) => {
                (name.to_string(), serde_json::Value::String(value.clone()))
            }
            XmlParam::Node(name, children) => {
                let mut map = serde_json::Map::new();
                for child in children {
                    let (key, value) = child.to_json();
                    map.insert(key, value);
                }
                (name.to_string(), serde_json::Value::Object(map))
            }
        }
    }
}

/// The `<return>` document, reduced to the fields the adapter consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CertumReturn {
    #[serde(rename = "responseHeader")]
    pub response_header: ResponseHeader,
    #[serde(rename = "orderID", skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(rename = "SANVerification", skip_serializing_if = "Option::is_none")]
    pub san_verification: Option<SanVerification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<OrderList>,
    #[serde(rename = "sanVerifications", skip_serializing_if = "Option::is_none")]
    pub san_verifications: Option<SanVerificationList>,
    #[serde(rename = "caBundle", skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<CaBundle>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseHeader {
    #[serde(rename = "successCode")]
    pub success_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorList {
    #[serde(rename = "Error")]
    pub error: Vec<ErrorItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorItem {
    #[serde(rename = "errorCode")]
    pub error_code: i32,
    #[serde(rename = "errorText")]
    pub error_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SanVerification {
    pub code: Option<String>,
    #[serde(rename = "approverMethod")]
    pub approver_method: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderList {
    #[serde(rename = "Order")]
    pub order: Vec<Order>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(rename = "orderStatus", skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
    #[serde(rename = "certificateDetails", skip_serializing_if = "Option::is_none")]
    pub certificate_details: Option<CertificateDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderStatus {
    #[serde(rename = "orderStatus")]
    pub order_status: String,
    #[serde(rename = "orderID")]
    pub order_id: Option<String>,
    #[serde(rename = "serialNumber")]
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateDetails {
    #[serde(rename = "certificateStatus")]
    pub certificate_status: Option<String>,
    #[serde(rename = "X509Cert")]
    pub x509_cert: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SanVerificationList {
    #[serde(rename = "sanVerification")]
    pub san_verification: Vec<SanVerificationState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SanVerificationState {
    #[serde(rename = "FQDN")]
    pub fqdn: String,
    #[serde(rename = "manualVerification", skip_serializing_if = "Option::is_none")]
    pub manual_verification: Option<ManualVerification>,
    #[serde(rename = "systemVerification", skip_serializing_if = "Option::is_none")]
    pub system_verification: Option<SystemVerification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualVerification {
    pub state: Option<String>,
    #[serde(rename = "expireDate")]
    pub expire_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemVerification {
    pub method: Option<String>,
    pub info: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaBundle {
    #[serde(rename = "X509Cert")]
    pub x509_cert: Vec<String>,
}

pub struct CertumSdk {
    client: Client,
    settings: CertumSettings,
    audit: Arc<dyn CaLogStore>,
}

impl CertumSdk {
    pub fn new(settings: CertumSettings, audit: Arc<dyn CaLogStore>) -> Self {
        Self {
            client: Client::builder()
                .timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            settings,
            audit,
        }
    }

    pub async fn quick_order(&self, params: Vec<XmlParam>) -> Result<CertumReturn, VendorError> {
        self.call("quickOrder", params).await
    }

    pub async fn renew_certificate(
        &self,
        params: Vec<XmlParam>,
    ) -> Result<CertumReturn, VendorError> {
        self.call("renewCertificate", params).await
    }

    pub async fn reissue_certificate(
        &self,
        params: Vec<XmlParam>,
    ) -> Result<CertumReturn, VendorError> {
        self.call("reissueCertificate", params).await
    }

    pub async fn get_order_by_order_id(
        &self,
        params: Vec<XmlParam>,
    ) -> Result<CertumReturn, VendorError> {
        self.call("getOrderByOrderID", params).await
    }

    pub async fn get_san_verification_state(
        &self,
        order_id: &str,
    ) -> Result<CertumReturn, VendorError> {
        self.call(
            "getSanVerificationState",
            vec![XmlParam::text("orderID", order_id)],
        )
        .await
    }

    pub async fn get_certificate(&self, order_id: &str) -> Result<CertumReturn, VendorError> {
        self.call("getCertificate", vec![XmlParam::text("orderID", order_id)])
            .await
    }

    pub async fn add_san_verification(
        &self,
        params: Vec<XmlParam>,
    ) -> Result<CertumReturn, VendorError> {
        self.call("addSanVerification", params).await
    }

    pub async fn perform_san_verification(
        &self,
        code: &str,
    ) -> Result<CertumReturn, VendorError> {
        self.call("performSanVerification", vec![XmlParam::text("code", code)])
            .await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<CertumReturn, VendorError> {
        self.call(
            "cancelOrder",
            vec![XmlParam::node(
                "cancelParameters",
                vec![XmlParam::text("orderID", order_id)],
            )],
        )
        .await
    }

    pub async fn revoke_certificate(
        &self,
        serial_number: &str,
    ) -> Result<CertumReturn, VendorError> {
        self.call(
            "revokeCertificate",
            vec![XmlParam::node(
                "revokeCertificateParameters",
                vec![XmlParam::text("serialNumber", serial_number)],
            )],
        )
        .await
    }

    /// Interpret a `<return>` document as the shared response envelope,
    /// applying the idempotent-cancel rule for `action`.
    pub fn envelope(action: &str, ret: &CertumReturn) -> VendorResponse {
        if ret.response_header.success_code == 0 {
            return VendorResponse::ok(serde_json::to_value(ret).unwrap_or_default());
        }

        let texts: Vec<String> = ret
            .response_header
            .errors
            .as_ref()
            .map(|errors| errors.error.iter().map(|e| e.error_text.clone()).collect())
            .unwrap_or_default();
        let joined = texts.join("; ").to_lowercase();

        // Cancelling what is already cancelled, or revoking what is
        // already revoked, counts as success.
        if action == "cancelOrder" && joined.contains("already") && joined.contains("cancel") {
            return VendorResponse::ok(serde_json::Value::Null);
        }
        if action == "revokeCertificate" && joined.contains("already") && joined.contains("revok")
        {
            return VendorResponse::ok(serde_json::Value::Null);
        }

        VendorResponse {
            code: 0,
            data: serde_json::Value::Null,
            msg: Some(if texts.is_empty() {
                "CA call failed".to_string()
            } else {
                texts.join("; ")
            }),
            errors: serde_json::to_value(&ret.response_header.errors).ok(),
        }
    }

    async fn call(
        &self,
        action: &str,
        params: Vec<XmlParam>,
    ) -> Result<CertumReturn, VendorError> {
        if !self.settings.is_configured() {
            return Err(VendorError::Configuration(
                "certum endpoint is not configured".to_string(),
            ));
        }

        let mut body = String::new();
        for param in &params {
            param.render(&mut body);
        }

        let envelope = format!(
            concat!(
                "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
                "xmlns:ws=\"http://wsdl.gs.net/\">",
                "<soapenv:Body><ws:{action}><request>",
                "<requestHeader><authToken>",
                "<userName>{username}</userName><password>{password}</password>",
                "</authToken></requestHeader>",
                "{body}",
                "</request></ws:{action}></soapenv:Body></soapenv:Envelope>"
            ),
            action = action,
            username = escape(self.settings.username.as_str()),
            password = escape(self.settings.password.as_str()),
            body = body,
        );

        let response = self
            .client
            .post(&self.settings.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope)
            .send()
            .await?;

        let status_code = response.status().as_u16() as i32;
        let text = response.text().await?;

        let ret = extract_return(&text)
            .ok_or_else(|| VendorError::Parse("missing return document".to_string()))
            .and_then(|slice| {
                quick_xml::de::from_str::<CertumReturn>(slice)
                    .map_err(|e| VendorError::Parse(e.to_string()))
            })?;

        // Credentials were injected above and are absent from `params`.
        let mut audit_params = serde_json::Map::new();
        for param in &params {
            let (key, value) = param.to_json();
            audit_params.insert(key, value);
        }
        self.audit
            .append(CaLogEntry {
                url: self.settings.url.clone(),
                api: action.to_string(),
                params: serde_json::Value::Object(audit_params),
                response: serde_json::to_value(&ret).unwrap_or_default(),
                status_code,
                success: ret.response_header.success_code == 0,
            })
            .await;

        Ok(ret)
    }
}

/// Slice the `<return>` element out of a response envelope, tolerating a
/// namespace prefix on the tag.
fn extract_return(xml: &str) -> Option<&str> {
    if let Some(start) = xml.find("<return>") {
        let inner_start = start;
        let end = xml[inner_start..].find("</return>")? + inner_start + "</return>".len();
        return Some(&xml[inner_start..end]);
    }

    let marker = xml.find(":return>")?;
    let open = xml[..marker].rfind('<')?;
    let prefix = &xml[open + 1..marker];
    let close_tag = format!("</{}:return>", prefix);
    let end = xml.find(&close_tag)? + close_tag.len();
    // Strip the prefix so the deserializer sees a plain element.
    let _ = prefix;
    Some(&xml[open..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_escaped_param_tree() {
        let params = XmlParam::node(
            "orderParameters",
            vec![
                XmlParam::text("productCode", "DV01"),
                XmlParam::text("CSR", "-----BEGIN<&>"),
            ],
        );
        let mut out = String::new();
        params.render(&mut out);
        assert_eq!(
            out,
            "<orderParameters><productCode>DV01</productCode><CSR>-----BEGIN&lt;&amp;&gt;</CSR></orderParameters>"
        );
    }

    #[test]
    fn parses_return_document() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body><ns2:quickOrderResponse xmlns:ns2="http://wsdl.gs.net/">
            <return>
              <responseHeader><successCode>0</successCode></responseHeader>
              <orderID>ref123</orderID>
              <SANVerification><code>abc-token</code><approverMethod>cname</approverMethod></SANVerification>
            </return>
            </ns2:quickOrderResponse></soap:Body></soap:Envelope>"#;

        let slice = extract_return(xml).unwrap();
        let ret: CertumReturn = quick_xml::de::from_str(slice).unwrap();
        assert_eq!(ret.response_header.success_code, 0);
        assert_eq!(ret.order_id.as_deref(), Some("ref123"));
        assert_eq!(
            ret.san_verification.unwrap().code.as_deref(),
            Some("abc-token")
        );
    }

    #[test]
    fn parses_order_list_and_errors() {
        let xml = r#"<return>
            <responseHeader>
              <successCode>-1</successCode>
              <errors><Error><errorCode>7</errorCode><errorText>Order already cancelled</errorText></Error></errors>
            </responseHeader>
            <orders>
              <Order><orderStatus><orderStatus>ENROLLED</orderStatus><orderID>X1</orderID></orderStatus></Order>
              <Order><orderStatus><orderStatus>AWAITING</orderStatus><orderID>X2</orderID></orderStatus></Order>
            </orders>
        </return>"#;

        let ret: CertumReturn = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(ret.orders.as_ref().unwrap().order.len(), 2);

        let response = CertumSdk::envelope("cancelOrder", &ret);
        assert!(response.is_success());

        let response = CertumSdk::envelope("quickOrder", &ret);
        assert_eq!(response.code, 0);
        assert!(response.msg.unwrap().contains("already cancelled"));
    }
}
