use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ImapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Dial timeout: neither TLS nor STARTTLS reached {0} in time")]
    DialTimeout(String),

    /// Server rejected or failed a command (NO/BAD and friends). The
    /// message carries the server's response text.
    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Missing data: {0}")]
    MissingData(String),
}

impl From<async_imap::error::Error> for ImapError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Io(e) => ImapError::Connection(e.to_string()),
            other => ImapError::Operation(other.to_string()),
        }
    }
}

impl From<async_native_tls::Error> for ImapError {
    fn from(err: async_native_tls::Error) -> Self {
        ImapError::Tls(err.to_string())
    }
}

impl From<std::io::Error> for ImapError {
    fn from(err: std::io::Error) -> Self {
        ImapError::Connection(err.to_string())
    }
}
