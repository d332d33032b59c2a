//! Lifecycle vocabularies shared by the orchestrator, the vendor adapters
//! and the task queue. Every enum round-trips through its lowercase string
//! form, which is also the persisted representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Certificate lifecycle status.
///
/// Forward movement only: `unpaid → pending → processing → approving →
/// active`; `processing|approving → cancelling → cancelled`;
/// `active → revoked`. The remaining variants are terminal side-exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Unpaid,
    Pending,
    Processing,
    Approving,
    Active,
    Cancelling,
    Cancelled,
    Revoked,
    Expired,
    Failed,
    Renewed,
    Reissued,
    Replaced,
}

impl CertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertStatus::Unpaid => "unpaid",
            CertStatus::Pending => "pending",
            CertStatus::Processing => "processing",
            CertStatus::Approving => "approving",
            CertStatus::Active => "active",
            CertStatus::Cancelling => "cancelling",
            CertStatus::Cancelled => "cancelled",
            CertStatus::Revoked => "revoked",
            CertStatus::Expired => "expired",
            CertStatus::Failed => "failed",
            CertStatus::Renewed => "renewed",
            CertStatus::Reissued => "reissued",
            CertStatus::Replaced => "replaced",
        }
    }

    /// Statuses that never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CertStatus::Cancelled
                | CertStatus::Revoked
                | CertStatus::Expired
                | CertStatus::Failed
                | CertStatus::Renewed
                | CertStatus::Reissued
                | CertStatus::Replaced
        )
    }
}

impl FromStr for CertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(CertStatus::Unpaid),
            "pending" => Ok(CertStatus::Pending),
            "processing" => Ok(CertStatus::Processing),
            "approving" => Ok(CertStatus::Approving),
            "active" => Ok(CertStatus::Active),
            "cancelling" => Ok(CertStatus::Cancelling),
            "cancelled" => Ok(CertStatus::Cancelled),
            "revoked" => Ok(CertStatus::Revoked),
            "expired" => Ok(CertStatus::Expired),
            "failed" => Ok(CertStatus::Failed),
            "renewed" => Ok(CertStatus::Renewed),
            "reissued" => Ok(CertStatus::Reissued),
            "replaced" => Ok(CertStatus::Replaced),
            other => Err(format!("unknown cert status: {}", other)),
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a cert row represents: a fresh purchase, a renewal or a reissue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertKind {
    New,
    Renew,
    Reissue,
}

impl CertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertKind::New => "new",
            CertKind::Renew => "renew",
            CertKind::Reissue => "reissue",
        }
    }
}

impl FromStr for CertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(CertKind::New),
            "renew" => Ok(CertKind::Renew),
            "reissue" => Ok(CertKind::Reissue),
            other => Err(format!("unknown cert action: {}", other)),
        }
    }
}

impl fmt::Display for CertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission channel a request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Web,
    Admin,
    Api,
    Acme,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Admin => "admin",
            Channel::Api => "api",
            Channel::Acme => "acme",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Channel::Web),
            "admin" => Ok(Channel::Admin),
            "api" => Ok(Channel::Api),
            "acme" => Ok(Channel::Acme),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Queue task status. At most one `Executing` row may exist per
/// (subject, action) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Executing,
    Successful,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Executing => "executing",
            TaskStatus::Successful => "successful",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executing" => Ok(TaskStatus::Executing),
            "successful" => Ok(TaskStatus::Successful),
            "failed" => Ok(TaskStatus::Failed),
            "stopped" => Ok(TaskStatus::Stopped),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Orchestrator operations the queue can dispatch asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Commit,
    Sync,
    Revalidate,
    Cancel,
    CommitCancel,
    RevokeCancel,
    SendActive,
    SendExpire,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Commit => "commit",
            TaskAction::Sync => "sync",
            TaskAction::Revalidate => "revalidate",
            TaskAction::Cancel => "cancel",
            TaskAction::CommitCancel => "commit_cancel",
            TaskAction::RevokeCancel => "revoke_cancel",
            TaskAction::SendActive => "send_active",
            TaskAction::SendExpire => "send_expire",
        }
    }
}

impl FromStr for TaskAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(TaskAction::Commit),
            "sync" => Ok(TaskAction::Sync),
            "revalidate" => Ok(TaskAction::Revalidate),
            "cancel" => Ok(TaskAction::Cancel),
            "commit_cancel" => Ok(TaskAction::CommitCancel),
            "revoke_cancel" => Ok(TaskAction::RevokeCancel),
            "send_active" => Ok(TaskAction::SendActive),
            "send_expire" => Ok(TaskAction::SendExpire),
            other => Err(format!("unknown task action: {}", other)),
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain control validation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    Cname,
    Txt,
    File,
    Http,
    Https,
    Admin,
    Administrator,
    Webmaster,
    Hostmaster,
    Postmaster,
}

impl ValidationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMethod::Cname => "cname",
            ValidationMethod::Txt => "txt",
            ValidationMethod::File => "file",
            ValidationMethod::Http => "http",
            ValidationMethod::Https => "https",
            ValidationMethod::Admin => "admin",
            ValidationMethod::Administrator => "administrator",
            ValidationMethod::Webmaster => "webmaster",
            ValidationMethod::Hostmaster => "hostmaster",
            ValidationMethod::Postmaster => "postmaster",
        }
    }

    /// DNS record based methods.
    pub fn is_dns(&self) -> bool {
        matches!(self, ValidationMethod::Cname | ValidationMethod::Txt)
    }

    /// File/URL based methods. Wildcard domains may not use these; IP
    /// literals may use nothing else.
    pub fn is_file(&self) -> bool {
        matches!(
            self,
            ValidationMethod::File | ValidationMethod::Http | ValidationMethod::Https
        )
    }

    /// Administrative email alias methods.
    pub fn is_email(&self) -> bool {
        !self.is_dns() && !self.is_file()
    }
}

impl FromStr for ValidationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cname" => Ok(ValidationMethod::Cname),
            "txt" => Ok(ValidationMethod::Txt),
            "file" => Ok(ValidationMethod::File),
            "http" => Ok(ValidationMethod::Http),
            "https" => Ok(ValidationMethod::Https),
            "admin" => Ok(ValidationMethod::Admin),
            "administrator" => Ok(ValidationMethod::Administrator),
            "webmaster" => Ok(ValidationMethod::Webmaster),
            "hostmaster" => Ok(ValidationMethod::Hostmaster),
            "postmaster" => Ok(ValidationMethod::Postmaster),
            other => Err(format!("unknown validation method: {}", other)),
        }
    }
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_status_roundtrip() {
        for s in [
            "unpaid",
            "pending",
            "processing",
            "approving",
            "active",
            "cancelling",
            "cancelled",
            "revoked",
            "expired",
            "failed",
            "renewed",
            "reissued",
            "replaced",
        ] {
            assert_eq!(CertStatus::from_str(s).unwrap().as_str(), s);
        }
        assert!(CertStatus::from_str("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(CertStatus::Revoked.is_terminal());
        assert!(CertStatus::Renewed.is_terminal());
        assert!(!CertStatus::Processing.is_terminal());
        assert!(!CertStatus::Active.is_terminal());
    }

    #[test]
    fn method_classification() {
        assert!(ValidationMethod::Cname.is_dns());
        assert!(ValidationMethod::Https.is_file());
        assert!(ValidationMethod::Postmaster.is_email());
        assert!(!ValidationMethod::File.is_email());
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!(
            ValidationMethod::from_str("CNAME").unwrap(),
            ValidationMethod::Cname
        );
    }
}
