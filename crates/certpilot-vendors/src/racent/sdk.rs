//! Racent transport: form-encoded REST with a static `api_token` plus a
//! nested JSON-encoded `params` blob. The token is appended at send time
//! and never reaches the audit log.

use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use certpilot_core::RacentSettings;

use crate::audit::{CaLogEntry, CaLogStore};
use crate::errors::VendorError;
use crate::types::VendorResponse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints where vendor code -6 actually means "verification already in
/// progress", not a cancellation failure.
const DCV_ENDPOINTS: &[&str] = &[
    "updateDCV",
    "batchUpdateDCV",
    "removeMdcDomain",
    "batchRemoveMdcDomain",
];

pub struct RacentSdk {
    client: Client,
    settings: RacentSettings,
    audit: Arc<dyn CaLogStore>,
}

impl RacentSdk {
    pub fn new(settings: RacentSettings, audit: Arc<dyn CaLogStore>) -> Self {
        Self {
            client: Client::builder()
                .timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            settings,
            audit,
        }
    }

    pub async fn place(
        &self,
        product_code: &str,
        years: i32,
        ref_id: &str,
        params: &Value,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            "place",
            vec![
                ("productCode", product_code.to_string()),
                ("years", years.to_string()),
                ("refId", ref_id.to_string()),
                ("params", params.to_string()),
            ],
        )
        .await
    }

    pub async fn renew(
        &self,
        renew_id: &str,
        years: i32,
        ref_id: &str,
        params: &Value,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            "renew",
            vec![
                ("renewId", renew_id.to_string()),
                ("years", years.to_string()),
                ("refId", ref_id.to_string()),
                ("params", params.to_string()),
            ],
        )
        .await
    }

    pub async fn replace(
        &self,
        cert_id: &str,
        ref_id: &str,
        params: &Value,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            "replace",
            vec![
                ("certId", cert_id.to_string()),
                ("refId", ref_id.to_string()),
                ("params", params.to_string()),
            ],
        )
        .await
    }

    pub async fn update_dcv(
        &self,
        cert_id: &str,
        dcv_method: &str,
        domain_name: &str,
        dcv_email: &str,
    ) -> Result<VendorResponse, VendorError> {
        let mut form = vec![
            ("certId", cert_id.to_string()),
            ("dcvMethod", dcv_method.to_string()),
            ("domainName", domain_name.to_string()),
        ];
        if dcv_method == "EMAIL" {
            form.push(("dcvEmail", dcv_email.to_string()));
        }
        self.call("updateDCV", form).await
    }

    pub async fn batch_update_dcv(
        &self,
        cert_id: &str,
        domain_info: &Value,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            "batchUpdateDCV",
            vec![
                ("certId", cert_id.to_string()),
                ("domainInfo", domain_info.to_string()),
            ],
        )
        .await
    }

    pub async fn batch_remove_mdc_domain(
        &self,
        cert_id: &str,
    ) -> Result<VendorResponse, VendorError> {
        // The endpoint requires a domainName; '*' targets every
        // unverified domain.
        self.call(
            "batchRemoveMdcDomain",
            vec![
                ("certId", cert_id.to_string()),
                ("domainName", "*".to_string()),
            ],
        )
        .await
    }

    pub async fn cert_id_by_refer_id(&self, ref_id: &str) -> Result<VendorResponse, VendorError> {
        self.call("certIdByrefId", vec![("refId", ref_id.to_string())])
            .await
    }

    /// Full order/cert state.
    pub async fn collect(&self, cert_id: &str) -> Result<VendorResponse, VendorError> {
        self.call("collect", vec![("certId", cert_id.to_string())])
            .await
    }

    pub async fn cancel(&self, cert_id: &str) -> Result<VendorResponse, VendorError> {
        self.call(
            "cancel",
            vec![
                ("certId", cert_id.to_string()),
                ("reason", "Other".to_string()),
            ],
        )
        .await
    }

    async fn call(
        &self,
        endpoint: &str,
        form: Vec<(&str, String)>,
    ) -> Result<VendorResponse, VendorError> {
        if !self.settings.is_configured() {
            return Err(VendorError::Configuration(
                "racent endpoint is not configured".to_string(),
            ));
        }

        // Audit copy before the token is attached; the nested params blob
        // is decoded for readability.
        let mut audit_params = serde_json::Map::new();
        for (key, value) in &form {
            let logged = if *key == "params" || *key == "domainInfo" {
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()))
            } else {
                Value::String(value.clone())
            };
            audit_params.insert((*key).to_string(), logged);
        }

        let url = format!("{}{}", self.settings.url, endpoint);
        let mut send_form: Vec<(&str, String)> = form;
        send_form.push(("api_token", self.settings.token.clone()));

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .form(&send_form)
            .send()
            .await?;

        let status_code = response.status().as_u16() as i32;
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| VendorError::Parse(e.to_string()))?;

        // Top-level `status` is the certificate status; fold it into data.
        if body.is_object() {
            if let Some(status) = body.get("status").cloned() {
                if body.get("data").map(Value::is_object).unwrap_or(false) {
                    body["data"]["status"] = status;
                } else if body.get("data").map(Value::is_null).unwrap_or(true) {
                    body["data"] = json!({ "status": status });
                }
            }
        }

        let mut code = body.get("code").and_then(code_as_i64);

        // The DCV endpoints misreport "already verifying" as a cancel
        // failure; rewrite it.
        if DCV_ENDPOINTS.contains(&endpoint) && code == Some(-6) {
            code = Some(2);
        }

        self.audit
            .append(CaLogEntry {
                url: self.settings.url.clone(),
                api: endpoint.to_string(),
                params: Value::Object(audit_params),
                response: body.clone(),
                status_code,
                success: code == Some(1),
            })
            .await;

        if status_code != 200 {
            return Ok(VendorResponse::err(format!(
                "Http status code {}",
                status_code
            )));
        }

        let Some(code) = code else {
            return Ok(VendorResponse::err("No return code"));
        };

        if code != 1 {
            // Cancelling an already-cancelled order counts as success.
            if code == -8 && endpoint == "cancel" {
                return Ok(VendorResponse::ok(Value::Null));
            }

            let msg = match code {
                -1 => "Parameter validation failed, please contact the administrator.",
                -2 => "Unexpected error, please contact the administrator.",
                -5 => "Order status error, please contact the administrator.",
                -6 => "Order cancellation failed, please contact the administrator.",
                -7 => "Certificate status error, please contact the administrator.",
                -8 => "The order has already been cancelled.",
                2 => "The certificate is being issued, please try again later.",
                _ => "Unknown error. Please contact the administrator.",
            };

            return Ok(VendorResponse {
                code: 0,
                data: Value::Null,
                msg: Some(msg.to_string()),
                errors: body.get("errors").cloned(),
            });
        }

        Ok(VendorResponse::ok(
            body.get("data").cloned().unwrap_or(Value::Null),
        ))
    }
}

/// Racent returns codes both as numbers and as strings.
fn code_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
