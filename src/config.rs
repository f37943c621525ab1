//! Job configuration, built from environment variables.

use lettre::message::Mailbox;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Summary job configuration.
///
/// The same server host is used for the mailbox (POP3 over TLS) and for
/// outbound SMTP, matching the single `mail_server` the job has always
/// been deployed against. Ports can be overridden individually.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mail server host, shared by mailbox and SMTP.
    pub mail_server: String,
    /// Mailbox (POP3S) port.
    pub mailbox_port: u16,
    /// Outbound SMTP port.
    pub smtp_port: u16,
    /// Mailbox login user, also used for SMTP authentication.
    pub mailbox_user: String,
    /// Mailbox password. Never logged.
    pub mailbox_password: SecretString,
    /// Sender address for the summary email.
    pub from_email: Mailbox,
    /// Recipient address for the summary email.
    pub to_email: Mailbox,
}

impl Config {
    /// Build config from environment variables.
    ///
    /// Missing or malformed required values are a fatal startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (injectable for tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mail_server = required(&lookup, "BACKSUM_MAIL_SERVER")?;
        let mailbox_user = required(&lookup, "BACKSUM_MAILBOX_USER")?;
        let mailbox_password = SecretString::from(required(&lookup, "BACKSUM_MAILBOX_PASSWORD")?);
        let from_email = address(&lookup, "BACKSUM_FROM_EMAIL")?;
        let to_email = address(&lookup, "BACKSUM_TO_EMAIL")?;
        let mailbox_port = port(&lookup, "BACKSUM_MAILBOX_PORT", 995)?;
        let smtp_port = port(&lookup, "BACKSUM_SMTP_PORT", 465)?;

        Ok(Self {
            mail_server,
            mailbox_port,
            smtp_port,
            mailbox_user,
            mailbox_password,
            from_email,
            to_email,
        })
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<String, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn address(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Mailbox, ConfigError> {
    required(lookup, key)?
        .parse()
        .map_err(|e: lettre::address::AddressError| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn port(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u16,
) -> Result<u16, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("not a valid port number: {value}"),
        }),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
