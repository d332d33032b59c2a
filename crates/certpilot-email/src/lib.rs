//! Outbound mail: operator task-failure escalations, issued-certificate
//! delivery and expiry reminders.

pub mod errors;
pub mod notices;
pub mod providers;

pub use errors::EmailError;
pub use notices::{
    certificate_issued_notice, expiry_reminder_notice, task_failure_notice, ExpiringCertEntry,
    IssuedNoticeContext, TaskFailureContext,
};
pub use providers::{EmailMessage, EmailProvider, MockEmailProvider, SmtpProvider};
