//! GoGetSSL transport: form-encoded REST authenticated by an `auth_key`
//! obtained from a login endpoint and cached for roughly a year.

use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use certpilot_core::{mask_sensitive, GogetsslSettings};
use certpilot_kv::CounterStore;

use crate::audit::{CaLogEntry, CaLogStore};
use crate::errors::VendorError;
use crate::types::VendorResponse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_KEY_CACHE_KEY: &str = "gogetssl_key";
const AUTH_KEY_TTL_SECONDS: i64 = 3600 * 24 * 365;

pub struct GogetsslSdk {
    client: Client,
    settings: GogetsslSettings,
    audit: Arc<dyn CaLogStore>,
    kv: Arc<dyn CounterStore>,
}

impl GogetsslSdk {
    pub fn new(
        settings: GogetsslSettings,
        audit: Arc<dyn CaLogStore>,
        kv: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            settings,
            audit,
            kv,
        }
    }

    pub async fn new_order(&self, form: Vec<(String, String)>) -> Result<VendorResponse, VendorError> {
        self.call("post", "/orders/add_ssl_order", form).await
    }

    pub async fn renew_order(
        &self,
        form: Vec<(String, String)>,
    ) -> Result<VendorResponse, VendorError> {
        self.call("post", "/orders/add_ssl_renew_order", form).await
    }

    pub async fn reissue(
        &self,
        order_id: &str,
        form: Vec<(String, String)>,
    ) -> Result<VendorResponse, VendorError> {
        self.call("post", &format!("/orders/ssl/reissue/{}", order_id), form)
            .await
    }

    pub async fn get_status(&self, order_id: &str) -> Result<VendorResponse, VendorError> {
        self.call("get", &format!("/orders/status/{}", order_id), Vec::new())
            .await
    }

    pub async fn batch_update_dcv(
        &self,
        order_id: &str,
        domains: &str,
        new_methods: &str,
    ) -> Result<VendorResponse, VendorError> {
        self.call(
            "post",
            &format!("/orders/ssl/change_domains_validation_method/{}", order_id),
            vec![
                ("domains".to_string(), domains.to_string()),
                ("new_methods".to_string(), new_methods.to_string()),
            ],
        )
        .await
    }

    pub async fn cancel(&self, order_id: &str) -> Result<VendorResponse, VendorError> {
        self.call(
            "post",
            "/orders/cancel_ssl_order",
            vec![
                ("order_id".to_string(), order_id.to_string()),
                ("reason".to_string(), "Other".to_string()),
            ],
        )
        .await
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        form: Vec<(String, String)>,
    ) -> Result<VendorResponse, VendorError> {
        if !self.settings.is_configured() {
            return Err(VendorError::Configuration(
                "gogetssl endpoint is not configured".to_string(),
            ));
        }

        let key = self.auth_key().await?;
        let url = format!("{}{}", self.settings.url, uri);

        let request = match method {
            "get" => self.client.get(&url),
            _ => self
                .client
                .post(&url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .form(&form),
        };

        let response = request.query(&[("auth_key", key)]).send().await?;
        let status_code = response.status().as_u16() as i32;
        let body: Value = response
            .json()
            .await
            .map_err(|e| VendorError::Parse(e.to_string()))?;

        let success = body
            .get("success")
            .map(|v| v.as_bool().unwrap_or(false) || v.as_i64().unwrap_or(0) == 1)
            .unwrap_or(false);

        let audit_params: Value = Value::Object(
            form.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        );
        self.audit
            .append(CaLogEntry {
                url: self.settings.url.clone(),
                api: uri.to_string(),
                params: audit_params,
                response: body.clone(),
                status_code,
                success,
            })
            .await;

        if status_code != 200 {
            return Ok(VendorResponse::err(format!(
                "Http status code {}",
                status_code
            )));
        }

        if success {
            return Ok(VendorResponse::ok(body));
        }

        let mut msg = "Unknown error. Please contact the administrator.".to_string();
        if body.get("error").map(is_truthy).unwrap_or(false) {
            let message = body
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            // Cancelling an order the vendor already cancelled is a
            // success.
            if uri == "/orders/cancel_ssl_order" && message.contains("already") {
                return Ok(VendorResponse::ok(Value::Null));
            }

            // Credential and reseller-balance details stay internal.
            if !message.contains("auth_key") && !message.contains("balance") {
                msg = message.to_string();
            }
        }

        Ok(VendorResponse::err(msg))
    }

    /// Login key, cached for a year; a miss performs the auth call.
    async fn auth_key(&self) -> Result<String, VendorError> {
        if let Ok(Some(key)) = self.kv.get(AUTH_KEY_CACHE_KEY).await {
            return Ok(key);
        }

        let url = format!("{}/auth", self.settings.url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&[
                ("user", self.settings.username.as_str()),
                ("pass", self.settings.password.as_str()),
            ])
            .send()
            .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| VendorError::Parse(e.to_string()))?;

        let key = body
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if key.is_empty() {
            return Err(VendorError::Connection(
                "gogetssl auth returned no key".to_string(),
            ));
        }

        if let Err(e) = self.kv.put(AUTH_KEY_CACHE_KEY, &key, AUTH_KEY_TTL_SECONDS).await {
            warn!("failed to cache gogetssl auth key: {}", e);
        }

        tracing::debug!("obtained gogetssl auth key {}", mask_sensitive(&key));
        Ok(key)
    }
}

fn is_truthy(value: &Value) -> bool {
    value.as_bool().unwrap_or(false) || value.as_i64().unwrap_or(0) != 0
}
