use crate::submission::BodyParsingStrategy;
use std::fmt::Debug;
use tracing::warn;

pub const RELAY_PROFILE: &str = "RELAY_PROFILE";
pub const SMTP_HOST: &str = "SMTP_HOST";
pub const SMTP_PORT: &str = "SMTP_PORT";
pub const SMTP_USER: &str = "SMTP_USER";
pub const SMTP_PASS: &str = "SMTP_PASS";
pub const SMTP_CREDENTIALS_SECRET: &str = "SMTP_CREDENTIALS_SECRET";
pub const SMTP_SECURITY: &str = "SMTP_SECURITY";
pub const FROM_EMAIL: &str = "FROM_EMAIL";
pub const TO_EMAIL: &str = "TO_EMAIL";
pub const BODY_PARSING: &str = "BODY_PARSING";

/// Port on which SMTP relays expect TLS from the first byte.
pub const SECURE_SMTP_PORT: u16 = 465;

const DEFAULT_FROM: &str = "Sociabl Website <no-reply@sociablpty.com>";
const DEFAULT_TO: &str = "admin@sociablpty.com";
const DEFAULT_SUBJECT: &str = "[Sociabl] New contact form submission";

/// Per-provider defaults a deployment starts from. Operator settings override each of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentProfile {
    pub default_host: &'static str,
    pub default_port: u16,
    pub default_user: Option<&'static str>,
    pub default_from: &'static str,
    pub default_to: &'static str,
    pub subject: &'static str,
    pub body_parsing: BodyParsingStrategy,
}

impl DeploymentProfile {
    /// SendGrid authenticates with the literal user name `apikey` and the API key as password.
    pub const SENDGRID: Self = Self {
        default_host: "smtp.sendgrid.net",
        default_port: 587,
        default_user: Some("apikey"),
        default_from: DEFAULT_FROM,
        default_to: DEFAULT_TO,
        subject: DEFAULT_SUBJECT,
        body_parsing: BodyParsingStrategy::Negotiate,
    };

    /// Brevo authenticates with the account login, so there is no default user.
    pub const BREVO: Self = Self {
        default_host: "smtp-relay.brevo.com",
        default_port: 587,
        default_user: None,
        default_from: DEFAULT_FROM,
        default_to: DEFAULT_TO,
        subject: DEFAULT_SUBJECT,
        body_parsing: BodyParsingStrategy::Negotiate,
    };

    pub fn named(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sendgrid" => Ok(Self::SENDGRID),
            "brevo" => Ok(Self::BREVO),
            _ => Err(ConfigError::UnknownProfile(name.into())),
        }
    }
}

impl Default for DeploymentProfile {
    fn default() -> Self {
        Self::SENDGRID
    }
}

/// How the connection to the relay is secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS from the first byte.
    Tls,
    /// Plaintext connection upgraded with STARTTLS.
    StartTls,
    /// Plaintext throughout. Only meant for local relays; credentials are never sent.
    None,
}

impl SmtpSecurity {
    pub fn for_port(port: u16) -> Self {
        if port == SECURE_SMTP_PORT {
            Self::Tls
        } else {
            Self::StartTls
        }
    }

    fn named(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "tls" | "smtps" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::UnknownSecurity(name.into())),
        }
    }
}

/// Everything the relay needs to know about its deployment, resolved once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_security: SmtpSecurity,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Name of the secret holding the SMTP credentials, consulted when no password is set.
    pub smtp_credentials_secret: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_parsing: BodyParsingStrategy,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Selects the profile named by [`RELAY_PROFILE`] (SendGrid if unset) and applies the
    /// overrides found through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let profile = match non_empty(&lookup, RELAY_PROFILE) {
            Some(name) => DeploymentProfile::named(&name)?,
            None => DeploymentProfile::default(),
        };
        Self::resolve(&profile, lookup)
    }

    pub fn resolve(
        profile: &DeploymentProfile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let smtp_port = match non_empty(&lookup, SMTP_PORT) {
            Some(port) => match port.trim().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    warn!(
                        "Ignoring invalid {SMTP_PORT} {port:?}, using {}",
                        profile.default_port
                    );
                    profile.default_port
                }
            },
            None => profile.default_port,
        };
        let smtp_security = match non_empty(&lookup, SMTP_SECURITY) {
            Some(name) => SmtpSecurity::named(&name)?,
            None => SmtpSecurity::for_port(smtp_port),
        };
        let body_parsing = match non_empty(&lookup, BODY_PARSING) {
            Some(name) => BodyParsingStrategy::named(&name)
                .ok_or_else(|| ConfigError::UnknownBodyParsing(name))?,
            None => profile.body_parsing,
        };
        Ok(Self {
            smtp_host: non_empty(&lookup, SMTP_HOST).unwrap_or_else(|| profile.default_host.into()),
            smtp_port,
            smtp_security,
            smtp_username: non_empty(&lookup, SMTP_USER)
                .or_else(|| profile.default_user.map(String::from)),
            smtp_password: non_empty(&lookup, SMTP_PASS),
            smtp_credentials_secret: non_empty(&lookup, SMTP_CREDENTIALS_SECRET),
            from: non_empty(&lookup, FROM_EMAIL).unwrap_or_else(|| profile.default_from.into()),
            to: non_empty(&lookup, TO_EMAIL).unwrap_or_else(|| profile.default_to.into()),
            subject: profile.subject.into(),
            body_parsing,
        })
    }
}

impl Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_security", &self.smtp_security)
            .field("smtp_username", &self.smtp_username)
            .field(
                "smtp_password",
                &self.smtp_password.as_ref().map(|_| "[redacted]"),
            )
            .field("smtp_credentials_secret", &self.smtp_credentials_secret)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("body_parsing", &self.body_parsing)
            .finish()
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown relay profile {0:?}, expected sendgrid or brevo")]
    UnknownProfile(String),
    #[error("Unknown SMTP security mode {0:?}, expected tls, starttls or none")]
    UnknownSecurity(String),
    #[error("Unknown body parsing strategy {0:?}, expected negotiate or json")]
    UnknownBodyParsing(String),
}
