//! Message builders for the three notice types: operator task-failure
//! escalation, issued-certificate delivery and the 30-day expiry reminder.

use chrono::Utc;
use serde_json::Value;

use certpilot_core::{SiteSettings, UtcDateTime};

use crate::providers::EmailMessage;

const TABLE_STYLE: &str = "border: 1px solid #ccc; word-break: break-all; padding: 10px";

/// Diagnostic context shipped to the operator when a task exhausts its
/// retries.
#[derive(Debug, Clone)]
pub struct TaskFailureContext {
    pub task_row_id: i64,
    pub subject_id: i64,
    pub action: String,
    pub status: String,
    pub attempts: i32,
    pub error: String,
    pub result: Option<Value>,
    pub created_at: UtcDateTime,
    pub executed_at: Option<UtcDateTime>,
}

pub fn task_failure_notice(
    site: &SiteSettings,
    admin_email: &str,
    context: &TaskFailureContext,
) -> EmailMessage {
    let mut rows = String::new();
    let mut push_row = |label: &str, value: String| {
        rows.push_str(&format!(
            "<tr><td style=\"{}\">{}</td><td style=\"{}\">{}</td></tr>",
            TABLE_STYLE, label, TABLE_STYLE, value
        ));
    };

    push_row("Error", context.error.clone());
    push_row("Task ID", context.task_row_id.to_string());
    push_row("Subject ID", context.subject_id.to_string());
    push_row("Action", context.action.clone());
    push_row("Attempts", context.attempts.to_string());
    push_row(
        "Result",
        context
            .result
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    push_row(
        "Created",
        context.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    push_row(
        "Executed",
        context
            .executed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    push_row("Status", context.status.clone());

    EmailMessage {
        to: admin_email.to_string(),
        to_name: None,
        subject: format!("[{}] task queue failure", site.name),
        body_html: wrap_table(&rows),
    }
}

/// Context for the issued-certificate delivery mail.
#[derive(Debug, Clone)]
pub struct IssuedNoticeContext {
    pub to: String,
    pub to_name: String,
    pub product_name: String,
    pub common_name: String,
    pub certificate: String,
    pub intermediate: Option<String>,
    pub private_key: Option<String>,
}

pub fn certificate_issued_notice(
    site: &SiteSettings,
    context: &IssuedNoticeContext,
) -> EmailMessage {
    let pem = match &context.intermediate {
        Some(chain) => format!("{}\n{}", context.certificate, chain),
        None => context.certificate.clone(),
    };

    let body_html = format!(
        "<p>The SSL certificate for <b>{}</b> ({}) has been issued.</p>\
         <p>Certificate (with chain):</p><pre>{}</pre>{}\
         <p><a href=\"{}\">{}</a></p>",
        context.common_name,
        context.product_name,
        pem,
        context
            .private_key
            .as_ref()
            .map(|key| format!("<p>Private key:</p><pre>{}</pre>", key))
            .unwrap_or_default(),
        site.url,
        site.name,
    );

    EmailMessage {
        to: context.to.clone(),
        to_name: Some(context.to_name.clone()),
        subject: format!("{} SSL certificate issued [{}]", context.common_name, site.name),
        body_html,
    }
}

/// One row of the expiry reminder list.
#[derive(Debug, Clone)]
pub struct ExpiringCertEntry {
    pub common_name: String,
    pub expires_at: UtcDateTime,
}

pub fn expiry_reminder_notice(
    site: &SiteSettings,
    to: &str,
    username: &str,
    entries: &[ExpiringCertEntry],
) -> EmailMessage {
    let now = Utc::now();
    let mut rows = String::new();
    for (index, entry) in entries.iter().enumerate() {
        let days_left = (entry.expires_at - now).num_days().max(0);
        rows.push_str(&format!(
            "<tr style=\"text-align: center\">\
             <td style=\"{style}; width: 60px\">{}</td>\
             <td style=\"{style}\">{}</td>\
             <td style=\"{style}; width: 200px\">{}</td>\
             <td style=\"{style}; width: 80px\">{}</td></tr>",
            index + 1,
            entry.common_name,
            entry.expires_at.format("%Y-%m-%d %H:%M:%S"),
            days_left,
            style = TABLE_STYLE,
        ));
    }

    let body_html = format!(
        "<p>Hello {},</p>\
         <p>The following certificates expire within 30 days:</p>\
         {}\
         <p><a href=\"{}\">{}</a></p>",
        username,
        wrap_table(&rows),
        site.url,
        site.name,
    );

    EmailMessage {
        to: to.to_string(),
        to_name: Some(username.to_string()),
        subject: format!("SSL certificate expiry reminder [{}]", site.name),
        body_html,
    }
}

fn wrap_table(rows: &str) -> String {
    format!(
        "<div style=\"width: 800px; margin: 20px auto\">\
         <table style=\"border-collapse: collapse; width: 100%\">{}</table></div>",
        rows
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteSettings {
        SiteSettings {
            name: "Certpilot".to_string(),
            url: "https://certs.example".to_string(),
            admin_email: Some("ops@example.com".to_string()),
            dns_tools: vec![],
        }
    }

    #[test]
    fn failure_notice_carries_diagnostics() {
        let context = TaskFailureContext {
            task_row_id: 42,
            subject_id: 7,
            action: "commit".to_string(),
            status: "failed".to_string(),
            attempts: 3,
            error: "vendor timeout".to_string(),
            result: Some(serde_json::json!({"code": 0, "msg": "timeout"})),
            created_at: Utc::now(),
            executed_at: Some(Utc::now()),
        };

        let message = task_failure_notice(&site(), "ops@example.com", &context);
        assert_eq!(message.to, "ops@example.com");
        assert!(message.body_html.contains("vendor timeout"));
        assert!(message.body_html.contains("42"));
        assert!(message.body_html.contains("commit"));
        assert!(message.subject.contains("Certpilot"));
    }

    #[test]
    fn expiry_reminder_lists_each_cert() {
        let entries = vec![
            ExpiringCertEntry {
                common_name: "a.example.com".to_string(),
                expires_at: Utc::now() + chrono::Duration::days(10),
            },
            ExpiringCertEntry {
                common_name: "b.example.com".to_string(),
                expires_at: Utc::now() + chrono::Duration::days(20),
            },
        ];

        let message = expiry_reminder_notice(&site(), "user@example.com", "alice", &entries);
        assert!(message.body_html.contains("a.example.com"));
        assert!(message.body_html.contains("b.example.com"));
    }

    #[test]
    fn issued_notice_includes_chain() {
        let context = IssuedNoticeContext {
            to: "user@example.com".to_string(),
            to_name: "alice".to_string(),
            product_name: "Basic DV".to_string(),
            common_name: "example.com".to_string(),
            certificate: "-----BEGIN CERTIFICATE-----\nleaf".to_string(),
            intermediate: Some("-----BEGIN CERTIFICATE-----\nchain".to_string()),
            private_key: None,
        };

        let message = certificate_issued_notice(&site(), &context);
        assert!(message.body_html.contains("leaf"));
        assert!(message.body_html.contains("chain"));
        assert!(!message.body_html.contains("Private key"));
    }
}
