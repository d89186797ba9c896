//! SMTP notifier — STARTTLS relay with credentials (async lettre).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};

use subtrack_core::config::MailerConfig;
use subtrack_core::error::{Result, TrackerError};
use subtrack_core::traits::Notifier;
use subtrack_core::types::Message;

use crate::render::render;

/// Sends rendered messages through an SMTP relay.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the transport once; connections are opened per send.
    pub fn new(config: &MailerConfig) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", config.display_name, config.from)
            .parse()
            .map_err(|e| TrackerError::Config(format!("Invalid mailer.from: {e}")))?;

        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| TrackerError::Config(format!("SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        tracing::info!("📮 SMTP mailer ready ({}:{})", config.host, config.port);
        Ok(Self { from, transport })
    }

    fn build(&self, message: &Message) -> Result<LettreMessage> {
        let email = render(message);
        let mut builder = LettreMessage::builder()
            .from(self.from.clone())
            .subject(email.subject)
            .header(ContentType::TEXT_HTML);

        for to in message.recipients() {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| TrackerError::Template(format!("Invalid recipient {to:?}: {e}")))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(email.html)
            .map_err(|e| TrackerError::Template(format!("Build email: {e}")))
    }
}

#[async_trait]
impl Notifier for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let email = self.build(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| TrackerError::SendFailed {
                attempts: 1,
                reason: format!("SMTP send: {e}"),
            })?;

        tracing::info!("📤 Email sent to: {}", message.recipients().join(","));
        Ok(())
    }
}
