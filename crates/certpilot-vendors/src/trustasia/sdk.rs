//! TrustAsia transport: JSON REST with key-id + auth-key headers on every
//! call. Vendor errors arrive as symbolic codes with non-200 statuses; the
//! raw code is preserved alongside the translated message so callers can
//! branch on specific conditions (duplicate alternative order id).

use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use certpilot_core::TrustasiaSettings;

use crate::audit::{CaLogEntry, CaLogStore};
use crate::errors::VendorError;
use crate::types::VendorResponse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TrustasiaSdk {
    client: Client,
    settings: TrustasiaSettings,
    audit: Arc<dyn CaLogStore>,
}

impl TrustasiaSdk {
    pub fn new(settings: TrustasiaSettings, audit: Arc<dyn CaLogStore>) -> Self {
        Self {
            client: Client::builder()
                .timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            settings,
            audit,
        }
    }

    pub async fn new_order(
        &self,
        product_id: &str,
        params: &Value,
    ) -> Result<VendorResponse, VendorError> {
        self.call(Method::POST, &format!("/orders/{}", product_id), Some(params))
            .await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<VendorResponse, VendorError> {
        self.call(Method::GET, &format!("/orders/{}", order_id), None)
            .await
    }

    pub async fn get_cert(&self, cert_id: &str) -> Result<VendorResponse, VendorError> {
        self.call(Method::GET, &format!("/certs/{}", cert_id), None)
            .await
    }

    pub async fn order_id_by_alternative_id(
        &self,
        alternative_order_id: &str,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            Method::GET,
            &format!("/orders/alternate/{}", alternative_order_id),
            None,
        )
        .await
    }

    pub async fn update_dcv(
        &self,
        order_id: &str,
        params: &Value,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            Method::PUT,
            &format!("/orders/{}/dcv-method", order_id),
            Some(params),
        )
        .await
    }

    pub async fn revalidate(&self, order_id: &str) -> Result<VendorResponse, VendorError> {
        self.call(
            Method::PUT,
            &format!("/orders/{}/dcv-completed", order_id),
            None,
        )
        .await
    }

    pub async fn cancel(&self, order_id: &str) -> Result<VendorResponse, VendorError> {
        self.call(Method::PUT, &format!("/orders/{}/cancel", order_id), None)
            .await
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        params: Option<&Value>,
    ) -> Result<VendorResponse, VendorError> {
        if !self.settings.is_configured() {
            return Err(VendorError::Configuration(
                "trustasia endpoint is not configured".to_string(),
            ));
        }

        let url = format!("{}{}", self.settings.url, uri);
        let mut request = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-CC-Key-ID", &self.settings.key_id)
            .header("X-CC-Auth-Key", &self.settings.auth_key);

        if let Some(params) = params {
            request = request.json(params);
        }

        let response = request.send().await?;
        let status_code = response.status().as_u16() as i32;
        let body: Value = response
            .json()
            .await
            .map_err(|e| VendorError::Parse(e.to_string()))?;

        let vendor_code = body
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        self.audit
            .append(CaLogEntry {
                url: self.settings.url.clone(),
                api: uri.to_string(),
                params: params.cloned().unwrap_or(Value::Null),
                response: body.clone(),
                status_code,
                success: vendor_code.eq_ignore_ascii_case("success"),
            })
            .await;

        if status_code != 200 {
            return Ok(VendorResponse {
                code: 0,
                data: Value::Null,
                msg: Some(translate_code(&vendor_code).to_string()),
                errors: Some(Value::String(vendor_code)),
            });
        }

        Ok(VendorResponse::ok(
            body.get("data").cloned().unwrap_or(Value::Null),
        ))
    }
}

fn translate_code(code: &str) -> &'static str {
    match code {
        "success" => "Request succeeded",
        "invalid_parameters" => "Invalid parameters",
        "request_too_fast" => "Too many requests, please try again later",
        "service_internal_error" => "Vendor internal error",
        "service_busy" => "Vendor busy, please try again later",
        "order_not_found" => "Order not found",
        "product_not_found" => "Product not found",
        "invalid_domain" => "Invalid domain",
        "invalid_sans" => "Invalid alternative names",
        "invalid_csr" => "Invalid CSR",
        "invalid_dcv_method" => "Invalid DCV information",
        "invalid_organization_info" => "Invalid organization information",
        "invalid_user_info" => "Invalid user information",
        "invalid_cert_format" => "Invalid certificate format",
        "invalid_cert" => "Invalid certificate",
        "private_key_cert_not_match" => "Public and private key do not match",
        "dcv_not_completed" => "Domain validation has not completed",
        "duplicate_alternative_order_id" => "Duplicate alternative order id",
        "order_need_revoke" => "The order must be revoked first",
        "cancel_not_allowed" => "The order cannot be cancelled",
        // Auth, whitelist and balance conditions stay internal.
        _ => "Internal error, please contact the administrator",
    }
}
