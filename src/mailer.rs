use std::sync::Arc;

use axum::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::warn;

use crate::config::MailConfig;

/// Best-effort email side-channel. Failures never fail the operation that
/// triggered the send; callers go through [`send_in_background`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        // 465 is implicit TLS, anything else is STARTTLS
        let mut builder = if cfg.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)?
        };
        builder = builder.port(cfg.smtp_port);
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }
        let from: Mailbox = format!("Global Finance Academy <{}>", cfg.from_address)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid from address: {e}"))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid recipient {to}: {e}"))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Fire-and-forget send; runs after the triggering transaction committed.
/// Errors are logged and swallowed.
pub fn send_in_background(mailer: Arc<dyn Mailer>, to: String, subject: String, html: String) {
    tokio::spawn(async move {
        if let Err(err) = mailer.send(&to, &subject, &html).await {
            warn!(error = %err, to = %to, subject = %subject, "email send failed");
        }
    });
}

pub fn welcome_email(name: &str) -> (String, String) {
    let subject = "Welcome to Global Finance Academy".to_string();
    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
         <h2>Welcome to Global Finance Academy!</h2>\
         <p>Dear {name},</p>\
         <p>Thank you for registering with Global Finance Academy. We're excited to have you \
         join our community!</p>\
         <p>Best regards,<br>The GFA Team</p>\
         </div>"
    );
    (subject, html)
}

pub fn password_reset_email(reset_link: &str) -> (String, String) {
    let subject = "Password Reset Request".to_string();
    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
         <h2>Password Reset Request</h2>\
         <p>You requested a password reset for your Global Finance Academy account.</p>\
         <p>Click the link below to reset your password. This link expires in 15 minutes.</p>\
         <p><a href=\"{reset_link}\">Reset Password</a></p>\
         <p>If you didn't request this, please ignore this email.</p>\
         <p>Best regards,<br>The GFA Team</p>\
         </div>"
    );
    (subject, html)
}

pub fn event_confirmation_email(title: &str, date: &str, location: &str) -> (String, String) {
    let subject = format!("Registration Confirmed: {title}");
    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
         <h2>You're registered!</h2>\
         <p>Your seat for <strong>{title}</strong> on {date} in {location} is confirmed.</p>\
         <p>Best regards,<br>The GFA Team</p>\
         </div>"
    );
    (subject, html)
}
