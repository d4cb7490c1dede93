//! Error types for the mail services.
//!
//! Every failure surfaced by the crate is a [`MailError`] carrying a
//! [`MailErrorKind`], which drives retryability and severity decisions in the
//! sender, the receiver and the folder monitor.

use std::fmt;
use thiserror::Error;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Mail error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailErrorKind {
    // Connection errors
    /// Connection could not be established.
    Connection,
    /// Connect, read or write timed out.
    Timeout,
    /// An established session was lost.
    Disconnected,
    /// TLS setup or handshake failed.
    Tls,

    // Authentication errors
    /// The server rejected the credentials.
    Authentication,

    // Message errors
    /// An email address is malformed.
    InvalidAddress,
    /// The message is incomplete or cannot be composed.
    InvalidMessage,
    /// An attachment could not be read or encoded.
    Attachment,
    /// A received message could not be parsed.
    Parse,

    // Server responses
    /// Transient rejection (4xx); may succeed later.
    TransientRejection,
    /// Permanent rejection (5xx).
    PermanentRejection,
    /// Unexpected protocol response.
    Protocol,
    /// The requested mail folder does not exist.
    FolderNotFound,

    // Local errors
    /// Configuration is invalid.
    Configuration,
    /// Local file system error.
    Io,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

impl MailErrorKind {
    /// Returns true if this error kind is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MailErrorKind::Connection
                | MailErrorKind::Timeout
                | MailErrorKind::Disconnected
                | MailErrorKind::TransientRejection
        )
    }

    /// Returns the severity level of this error kind.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MailErrorKind::Authentication
            | MailErrorKind::Tls
            | MailErrorKind::Configuration => ErrorSeverity::Critical,

            MailErrorKind::Connection
            | MailErrorKind::Timeout
            | MailErrorKind::Disconnected
            | MailErrorKind::TransientRejection => ErrorSeverity::Warning,

            MailErrorKind::InvalidAddress
            | MailErrorKind::InvalidMessage
            | MailErrorKind::Attachment
            | MailErrorKind::Parse
            | MailErrorKind::PermanentRejection
            | MailErrorKind::Protocol
            | MailErrorKind::FolderNotFound
            | MailErrorKind::Io
            | MailErrorKind::Unknown => ErrorSeverity::Error,
        }
    }
}

impl fmt::Display for MailErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailErrorKind::Connection => write!(f, "Connection failed"),
            MailErrorKind::Timeout => write!(f, "Timed out"),
            MailErrorKind::Disconnected => write!(f, "Disconnected"),
            MailErrorKind::Tls => write!(f, "TLS error"),
            MailErrorKind::Authentication => write!(f, "Authentication failed"),
            MailErrorKind::InvalidAddress => write!(f, "Invalid address"),
            MailErrorKind::InvalidMessage => write!(f, "Invalid message"),
            MailErrorKind::Attachment => write!(f, "Attachment error"),
            MailErrorKind::Parse => write!(f, "Parse error"),
            MailErrorKind::TransientRejection => write!(f, "Transient rejection"),
            MailErrorKind::PermanentRejection => write!(f, "Permanent rejection"),
            MailErrorKind::Protocol => write!(f, "Protocol error"),
            MailErrorKind::FolderNotFound => write!(f, "Folder not found"),
            MailErrorKind::Configuration => write!(f, "Invalid configuration"),
            MailErrorKind::Io => write!(f, "I/O error"),
            MailErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Warning - temporary issue, may recover.
    Warning,
    /// Error - operation failed.
    Error,
    /// Critical - requires immediate attention.
    Critical,
}

/// Mail error with detailed information.
#[derive(Error, Debug)]
pub struct MailError {
    kind: MailErrorKind,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MailError {
    /// Creates a new mail error.
    pub fn new(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> MailErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Configuration, message)
    }

    /// Creates an invalid address error.
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::InvalidAddress, message)
    }

    /// Creates an invalid message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::InvalidMessage, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Connection, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Timeout, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Tls, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Authentication, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Protocol, message)
    }

    /// Creates a disconnected error.
    pub fn disconnected() -> Self {
        Self::new(MailErrorKind::Disconnected, "No active mail session")
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<std::io::Error> for MailError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match error.kind() {
            ErrorKind::TimedOut => MailErrorKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable => MailErrorKind::Connection,
            ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => MailErrorKind::Disconnected,
            _ => MailErrorKind::Io,
        };
        Self::new(kind, error.to_string()).with_cause(error)
    }
}

impl From<tokio::time::error::Elapsed> for MailError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timed out").with_cause(error)
    }
}

impl From<serde_json::Error> for MailError {
    fn from(error: serde_json::Error) -> Self {
        Self::configuration(format!("Invalid settings: {}", error)).with_cause(error)
    }
}

impl From<lettre::address::AddressError> for MailError {
    fn from(error: lettre::address::AddressError) -> Self {
        Self::invalid_address(error.to_string()).with_cause(error)
    }
}

impl From<lettre::error::Error> for MailError {
    fn from(error: lettre::error::Error) -> Self {
        Self::invalid_message(error.to_string()).with_cause(error)
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        let kind = if error.is_timeout() {
            MailErrorKind::Timeout
        } else if error.is_transient() {
            MailErrorKind::TransientRejection
        } else if error.is_permanent() {
            MailErrorKind::PermanentRejection
        } else if error.is_client() {
            MailErrorKind::InvalidMessage
        } else {
            MailErrorKind::Connection
        };
        Self::new(kind, error.to_string()).with_cause(error)
    }
}

impl From<lettre::transport::stub::Error> for MailError {
    fn from(error: lettre::transport::stub::Error) -> Self {
        Self::new(MailErrorKind::PermanentRejection, error.to_string()).with_cause(error)
    }
}

impl From<async_imap::error::Error> for MailError {
    fn from(error: async_imap::error::Error) -> Self {
        use async_imap::error::Error;
        let kind = match &error {
            Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => MailErrorKind::Timeout,
            Error::Io(_) => MailErrorKind::Connection,
            Error::ConnectionLost => MailErrorKind::Disconnected,
            Error::No(_) | Error::Bad(_) => MailErrorKind::Protocol,
            Error::Parse(_) => MailErrorKind::Parse,
            _ => MailErrorKind::Unknown,
        };
        Self::new(kind, error.to_string()).with_cause(error)
    }
}

impl From<mailparse::MailParseError> for MailError {
    fn from(error: mailparse::MailParseError) -> Self {
        Self::new(MailErrorKind::Parse, error.to_string()).with_cause(error)
    }
}
