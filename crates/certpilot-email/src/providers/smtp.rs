//! SMTP delivery through lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use certpilot_core::MailSettings;

use crate::errors::EmailError;
use crate::providers::{EmailMessage, EmailProvider};

pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpProvider {
    pub fn new(settings: &MailSettings) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
            .map_err(|e| EmailError::Configuration(e.to_string()))?
            .port(settings.smtp_port);

        if let (Some(username), Some(password)) =
            (&settings.smtp_username, &settings.smtp_password)
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let sender = format!("{} <{}>", settings.sender_name, settings.sender_mail)
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                EmailError::Configuration(e.to_string())
            })?;

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let to: Mailbox = match &message.to_name {
            Some(name) => format!("{} <{}>", name, message.to),
            None => message.to.clone(),
        }
        .parse()
        .map_err(|e: lettre::address::AddressError| EmailError::MessageBuild(e.to_string()))?;

        let email = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body_html.clone())
            .map_err(|e| EmailError::MessageBuild(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| EmailError::Send(e.to_string()))?;

        info!("sent mail '{}' to {}", message.subject, message.to);
        Ok(())
    }
}
