use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::{config, interfaces};

pub const SMTP_TIMEOUT: Duration = Duration::from_secs(20);
const RECEIVER_NAME: &str = "管理员";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("cannot build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// What gets reported after a confirmed reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectDetails {
    pub ip: String,
    pub disconnected_at: chrono::DateTime<chrono::Local>,
    pub reconnected_at: chrono::DateTime<chrono::Local>,
}

pub struct Mailer {
    config: config::Email,
}

impl Mailer {
    pub fn from_config(config: &config::Email) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Sends a notification email.
    ///
    /// With `details` the body gets a short reconnection summary, otherwise
    /// the full interface diagnostics are appended. Returns whether the
    /// message was accepted by the SMTP server.
    pub async fn notify(&self, subject: &str, body: &str, details: Option<&ReconnectDetails>) -> bool {
        tracing::info!("Preparing email: {}", subject);

        let body = match details {
            Some(details) => with_reconnect_details(body, details),
            None => {
                tracing::info!("Attaching interface diagnostics to the email");
                with_diagnostics(body, &interfaces::diagnostics().await)
            }
        };

        match self.send(subject, body).await {
            Ok(()) => {
                tracing::info!("Email sent to {}", self.config.receiver_email);
                true
            }
            Err(why) => {
                self.report(&why);
                false
            }
        }
    }

    async fn send(&self, subject: &str, body: String) -> Result<(), MailError> {
        let message = build_message(&self.config, subject, body)?;

        tracing::info!(
            "Connecting to SMTP server {}:{}",
            self.config.smtp_server,
            self.config.smtp_port
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.sender_email.clone(),
                self.config.sender_password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        // The transport closes the session itself after sending; a failed
        // QUIT does not surface here.
        let response = transport.send(message).await?;
        tracing::debug!("SMTP server answered {:?}", response.code());
        Ok(())
    }

    fn report(&self, why: &MailError) {
        let MailError::Smtp(smtp) = why else {
            tracing::error!("Cannot send email: {}", why);
            return;
        };

        let code = smtp.status().map(|code| code.to_string());
        if matches!(code.as_deref(), Some("530" | "534" | "535")) {
            tracing::error!(
                "SMTP authentication failed, check the authorization code for {}: {}",
                self.config.sender_email,
                smtp
            );
        } else if smtp.is_timeout() {
            tracing::error!(
                "SMTP session with {}:{} timed out: {}",
                self.config.smtp_server,
                self.config.smtp_port,
                smtp
            );
        } else if smtp.is_tls() {
            tracing::error!("STARTTLS negotiation failed: {}", smtp);
        } else if smtp.is_permanent() || smtp.is_transient() {
            tracing::error!("SMTP server rejected the message: {}", smtp);
        } else {
            tracing::error!(
                "Cannot talk to SMTP server {}:{}: {:?}",
                self.config.smtp_server,
                self.config.smtp_port,
                smtp
            );
        }
    }
}

pub fn build_message(config: &config::Email, subject: &str, body: String) -> Result<Message, MailError> {
    let message = Message::builder()
        .from(config.sender_email.parse::<Mailbox>()?)
        .to(Mailbox::new(
            Some(RECEIVER_NAME.to_string()),
            config.receiver_email.parse()?,
        ))
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)?;
    Ok(message)
}

pub fn with_reconnect_details(body: &str, details: &ReconnectDetails) -> String {
    format!(
        "{body}\n\n详细信息:\n - 检测到断开时间: {}\n - 自动重连时间: {}\n - 当前获取IP地址: {}\n",
        details.disconnected_at.format(TIME_FORMAT),
        details.reconnected_at.format(TIME_FORMAT),
        details.ip,
    )
}

pub fn with_diagnostics(body: &str, diagnostics: &str) -> String {
    format!("{body}\n\n--- 网络诊断信息 ---\n{diagnostics}")
}
