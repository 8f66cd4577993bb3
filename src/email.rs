//! Outbound email used to deliver password reset links.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::{EmailConfig, EmailTransportConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()>;
}

pub fn password_reset_email(to_email: &str, to_name: &str, reset_url: &str) -> OutgoingEmail {
    let first_name = to_name.split_whitespace().next().unwrap_or(to_name);
    OutgoingEmail {
        to_email: to_email.to_string(),
        to_name: to_name.to_string(),
        subject: "Your password reset token (valid for 10 min)".to_string(),
        body: format!(
            "Hi {first_name},\n\n\
             Forgot your password? Submit a PATCH request with your new password and \
             passwordConfirm to: {reset_url}\n\n\
             If you didn't forget your password, please ignore this email!\n"
        ),
    }
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct LettreMailer {
    transport: Transport,
    from: Mailbox,
}

impl LettreMailer {
    pub fn new(cfg: &EmailConfig) -> anyhow::Result<Self> {
        let transport = match &cfg.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
            } => {
                let smtp = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .context("create SMTP transport")?
                    .port(*port)
                    .credentials(Credentials::new(username.clone(), password.clone()))
                    .build();
                Transport::Smtp(smtp)
            }
            EmailTransportConfig::File { path } => {
                let dir = Path::new(path);
                if !dir.exists() {
                    std::fs::create_dir_all(dir).context("create emails directory")?;
                }
                tracing::warn!(path = %path, "email file transport in use; messages are not delivered");
                Transport::File(AsyncFileTransport::<Tokio1Executor>::new(dir))
            }
        };

        let from = format!("{} <{}>", cfg.from_name, cfg.from_email)
            .parse::<Mailbox>()
            .context("parse from address")?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailSender for LettreMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        let to = format!("{} <{}>", email.to_name, email.to_email)
            .parse::<Mailbox>()
            .or_else(|_| email.to_email.parse::<Mailbox>())
            .context("parse recipient address")?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .context("build email message")?;

        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message).await.context("send SMTP email")?;
            }
            Transport::File(file) => {
                file.send(message).await.context("write email file")?;
            }
        }
        Ok(())
    }
}
