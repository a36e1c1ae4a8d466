use crate::{
    config::{RelayConfig, SmtpSecurity},
    message::OutboundMessage,
    secrets::{SecretError, SecretRepository},
};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use tracing::{info, warn};

/// Hands a composed message over for delivery.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailSendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MailSendError {
    #[error("Invalid {field} address {address:?}: {source}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        #[source]
        source: AddressError,
    },
    #[error("Error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Unable to obtain SMTP credentials: {0}")]
    Credentials(#[from] SecretError),
    #[error("Unable to set up SMTP transport: {0}")]
    Initialise(#[source] lettre::transport::smtp::Error),
    #[error("Error sending message: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Delivers messages through an SMTP relay.
///
/// The transport is created on the first send and reused afterwards. If creating it fails, the
/// next send tries again.
pub struct SmtpMailSender<SecretRepositoryT: SecretRepository> {
    config: RelayConfig,
    secrets_repository: SecretRepositoryT,
    transport: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl<SecretRepositoryT: SecretRepository> SmtpMailSender<SecretRepositoryT> {
    pub fn new(config: RelayConfig, secrets_repository: SecretRepositoryT) -> Self {
        Self {
            config,
            secrets_repository,
            transport: Default::default(),
        }
    }

    async fn transport(&self) -> Result<&AsyncSmtpTransport<Tokio1Executor>, MailSendError> {
        self.transport
            .get_or_try_init(self.initialise_transport())
            .await
    }

    async fn initialise_transport(
        &self,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailSendError> {
        let RelayConfig {
            smtp_host,
            smtp_port,
            smtp_security,
            ..
        } = &self.config;
        info!("Connecting to SMTP relay {smtp_host}:{smtp_port} ({smtp_security:?})");
        let mut builder = match smtp_security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .map_err(MailSendError::Initialise)?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                    .map_err(MailSendError::Initialise)?
            }
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
            }
        }
        .port(*smtp_port);

        // Credentials only ever travel over an encrypted connection. A relay which insists on
        // authentication rejects the unauthenticated plaintext session instead.
        if *smtp_security != SmtpSecurity::None {
            if let Some(credentials) = self.credentials().await? {
                builder = builder
                    .authentication(vec![Mechanism::Plain, Mechanism::Login])
                    .credentials(Credentials::new(credentials.username, credentials.password));
            }
        }

        Ok(builder.build())
    }

    async fn credentials(&self) -> Result<Option<SmtpCredentials>, MailSendError> {
        if let Some(password) = &self.config.smtp_password {
            return Ok(Some(SmtpCredentials {
                username: self.config.smtp_username.clone().unwrap_or_default(),
                password: password.clone(),
            }));
        }
        let Some(secret_name) = &self.config.smtp_credentials_secret else {
            return Ok(None);
        };
        let credentials = self.secrets_repository.get_secret(secret_name).await?;
        Ok(Some(credentials))
    }
}

#[async_trait]
impl<SecretRepositoryT: SecretRepository> MailSender for SmtpMailSender<SecretRepositoryT> {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailSendError> {
        let email = build_email(message)?;
        self.transport().await?.send(email).await?;
        info!("Relayed contact form message to {}", message.to);
        Ok(())
    }
}

fn build_email(message: &OutboundMessage) -> Result<Message, MailSendError> {
    let mut builder = Message::builder()
        .from(parse_mailbox("from", &message.from)?)
        .to(parse_mailbox("to", &message.to)?)
        .subject(message.subject.clone());
    // The visitor's address is only checked for presence. One that is not a mailbox still
    // appears in the message body, so the message goes out without a Reply-To.
    match parse_mailbox("reply-to", &message.reply_to) {
        Ok(reply_to) => builder = builder.reply_to(reply_to),
        Err(error) => warn!("Sending without Reply-To: {error}"),
    }
    Ok(builder.multipart(MultiPart::alternative_plain_html(
        message.body_text.clone(),
        message.body_html.clone(),
    ))?)
}

fn parse_mailbox(field: &'static str, address: &str) -> Result<Mailbox, MailSendError> {
    address
        .parse()
        .map_err(|source| MailSendError::InvalidAddress {
            field,
            address: address.into(),
            source,
        })
}

#[derive(Deserialize, Debug, PartialEq, Eq)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}
