//! # Mail Integration Library
//!
//! Fluent mail sending, reading and folder monitoring on top of lettre,
//! async-imap and mailparse:
//! - Chained email writers with sticky address validation
//! - SMTP sending through any lettre transport, with metrics and a protocol log
//! - IMAP reading, flagging, moving and deleting through a cached session
//! - IMAP IDLE folder monitoring with reconnect backoff
//! - Appsettings-style configuration and a small composition root
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_mail::{EmailSenderOptions, EmailWriter, SmtpSender};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = EmailSenderOptions::builder()
//!         .smtp_host("smtp.example.com")
//!         .smtp_port(587)
//!         .credential("user@example.com", "password")
//!         .build()?;
//!
//!     let sender = Arc::new(SmtpSender::from_options(&options)?);
//!
//!     let result = EmailWriter::new()
//!         .from("sender@example.com")
//!         .to("recipient@example.com")
//!         .subject("Hello from Rust!")
//!         .body_text("This is a test email.")
//!         .with_sender(sender)
//!         .send()
//!         .await?;
//!     println!("Message sent with ID: {}", result.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// MIME conversion
pub mod mime;

// Resilience
pub mod resilience;

// Observability
pub mod observability;

// Sending
pub mod sender;
pub mod writer;

// Receiving
pub mod monitor;
pub mod receiver;

// Composition root
pub mod services;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{
    Credential, EmailOptions, EmailReceiverOptions, EmailReceiverOptionsBuilder, EmailSenderOptions,
    EmailSenderOptionsBuilder, FolderMonitorOptions, MailSettings, PoolConfig, RetryConfig, SummaryItems, TlsMode,
};
pub use errors::{ErrorSeverity, MailError, MailErrorKind, MailResult};
pub use monitor::{MailFolderMonitor, ShutdownHandle};
pub use observability::{MailMetrics, MetricsSnapshot, ProtocolLogger};
pub use receiver::{ImapClientConnector, ImapConnector, ImapReceiver, ImapSession, MailReader};
pub use resilience::RetryExecutor;
pub use sender::{EmailSender, GenericEmailSender, SmtpSender};
pub use services::{MailServices, MailServicesBuilder};
pub use types::{Attachment, Email, EmailContact, MessageSummary, SendResult};
pub use writer::{EmailWriter, MimeMessageWriter, SendableEmailWriter};
