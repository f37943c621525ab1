//! Error types for backsum.

/// Top-level error type for a summary run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors. Fatal before any mailbox interaction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox session errors. Not retried within a run; a dropped session
/// abandons any staged deletes on the server side.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid mailbox server name {host}: {reason}")]
    ServerName { host: String, reason: String },

    #[error("Mailbox authentication failed for {user}: {response}")]
    Auth { user: String, response: String },

    #[error("Unexpected mailbox response to {command}: {response}")]
    Protocol { command: String, response: String },

    #[error("Mailbox connection closed unexpectedly")]
    Disconnected,
}

/// A single failed outbound delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Could not build outgoing message: {0}")]
    Message(String),
}

/// Raised after the retry policy is exhausted; carries the last
/// underlying transport error.
#[derive(Debug, thiserror::Error)]
#[error("Delivery failed after {attempts} attempts: {source}")]
pub struct DeliveryError {
    pub attempts: u32,
    #[source]
    pub source: TransportError,
}

/// Result type alias for the summary job.
pub type Result<T> = std::result::Result<T, Error>;
