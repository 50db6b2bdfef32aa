//! Error types for the incident bot.

/// Top-level error type. Per-conversation failures never reach it; the
/// desk logs them and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Cannot prepare directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to fetch file {file_ref} on channel {name}: {reason}")]
    FetchFailed {
        name: String,
        file_ref: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Channel health check failed: {name}: {reason}")]
    HealthCheckFailed { name: String, reason: String },
}

/// Attachment store errors.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("Attachment fetch failed: {0}")]
    Fetch(#[from] ChannelError),

    #[error("Failed to write attachment {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Mail delivery errors. Every failing step of the SMTP session maps here.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid {field} address {address}: {reason}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP relay error: {0}")]
    Relay(String),

    #[error("SMTP send failed: {0}")]
    Send(String),

    #[error("SMTP task aborted: {0}")]
    Aborted(String),
}

/// Incident session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Field {field} is already set")]
    AlreadySet { field: &'static str },

    #[error("Field {field} must be set before {next}")]
    OutOfOrder {
        field: &'static str,
        next: &'static str,
    },

    #[error("Incident is incomplete: {field} missing")]
    Incomplete { field: &'static str },

    #[error("Cannot move conversation from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
