//! Application settings injected into services at construction time.
//!
//! The settings rows live in the `settings` table (group/key/value); the
//! embedding application loads them into these structs once at startup.
//! Business logic never reads configuration through a global.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppSettings {
    pub site: SiteSettings,
    pub mail: MailSettings,
    pub ca: CaSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    pub name: String,
    pub url: String,
    /// Operator address for task-failure escalation mails.
    pub admin_email: Option<String>,
    /// Prioritized list of DNS-tools helper endpoints.
    pub dns_tools: Vec<String>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            name: "Certpilot".to_string(),
            url: "/".to_string(),
            admin_email: None,
            dns_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub sender_mail: String,
    pub sender_name: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            sender_mail: "noreply@localhost".to_string(),
            sender_name: "Certpilot".to_string(),
        }
    }
}

/// Credentials for every CA vendor endpoint, one block per adapter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CaSettings {
    pub certum: CertumSettings,
    pub gogetssl: GogetsslSettings,
    pub racent: RacentSettings,
    pub trustasia: TrustasiaSettings,
}

/// Envelope-RPC vendor: credentials ride in every call envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CertumSettings {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// REST vendor with a login-issued auth key cached for ~1 year.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GogetsslSettings {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// REST vendor with a static API token.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RacentSettings {
    pub url: String,
    pub token: String,
}

/// REST vendor with key-id + signing key headers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrustasiaSettings {
    pub url: String,
    pub key_id: String,
    pub auth_key: String,
}

impl CertumSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

impl GogetsslSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

impl RacentSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.token.is_empty()
    }
}

impl TrustasiaSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.key_id.is_empty() && !self.auth_key.is_empty()
    }
}
