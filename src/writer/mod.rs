//! Fluent email writers.
//!
//! ```no_run
//! # async fn demo(sender: std::sync::Arc<dyn integrations_mail::EmailSender>) -> integrations_mail::MailResult<()> {
//! use integrations_mail::EmailWriter;
//!
//! let sent = EmailWriter::new()
//!     .from("Reports <reports@example.com>")
//!     .to("alice@example.com; bob@example.com")
//!     .subject("Weekly report")
//!     .body_text("See attachment.")
//!     .attach_file("report.pdf")
//!     .with_sender(sender)
//!     .try_send()
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! Address parse failures do not break the chain; they are kept and reported
//! by `build()`, `send()` or `try_send()`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::EmailOptions;
use crate::errors::{MailError, MailResult};
use crate::sender::EmailSender;
use crate::types::{Attachment, Email, EmailContact, SendResult};

mod message;

pub use message::MimeMessageWriter;

/// Writer that can send what it builds.
pub type SendableEmailWriter = EmailWriter<Arc<dyn EmailSender>>;

/// Builder for [`Email`] values.
///
/// `S` is the attached sender; plain writers use `()`.
#[derive(Clone)]
pub struct EmailWriter<S = ()> {
    email: Email,
    subject_prefix: Option<String>,
    errors: Vec<String>,
    sender: S,
}

impl EmailWriter<()> {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            email: Email::default(),
            subject_prefix: None,
            errors: Vec::new(),
            sender: (),
        }
    }

    /// Starts from an existing email.
    pub fn from_email(email: Email) -> Self {
        Self {
            email,
            ..Self::new()
        }
    }
}

impl Default for EmailWriter<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for EmailWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailWriter")
            .field("email", &self.email)
            .field("subject_prefix", &self.subject_prefix)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl<S> EmailWriter<S> {
    /// Attaches a sender, turning this into a [`SendableEmailWriter`].
    pub fn with_sender(self, sender: Arc<dyn EmailSender>) -> SendableEmailWriter {
        EmailWriter {
            email: self.email,
            subject_prefix: self.subject_prefix,
            errors: self.errors,
            sender,
        }
    }

    /// Pre-fills the envelope from mailbox defaults.
    ///
    /// The default sender only applies when none is set. Default recipients
    /// are appended.
    pub fn with_defaults(mut self, defaults: &EmailOptions) -> Self {
        if self.email.from.is_none() {
            if let Some(from) = &defaults.from {
                self = self.from(from);
            }
        }
        if let Some(to) = &defaults.to {
            self = self.to(to);
        }
        if let Some(cc) = &defaults.cc {
            self = self.cc(cc);
        }
        if let Some(bcc) = &defaults.bcc {
            self = self.bcc(bcc);
        }
        if let Some(reply_to) = &defaults.reply_to {
            self = self.reply_to(reply_to);
        }
        if let Some(prefix) = &defaults.subject_prefix {
            self.subject_prefix = Some(prefix.clone());
        }
        self
    }

    /// Sets the sender.
    pub fn from(mut self, address: impl AsRef<str>) -> Self {
        match EmailContact::parse(address.as_ref()) {
            Ok(contact) => self.email.from = Some(contact),
            Err(e) => self.errors.push(format!("from: {}", e.message())),
        }
        self
    }

    /// Sets the sender from a contact.
    pub fn from_contact(mut self, contact: EmailContact) -> Self {
        self.email.from = Some(contact);
        self
    }

    /// Adds primary recipients (`;` or `,` separated).
    pub fn to(mut self, addresses: impl AsRef<str>) -> Self {
        if let Some(list) = self.parse_list("to", addresses.as_ref()) {
            self.email.to.extend(list);
        }
        self
    }

    /// Adds a primary recipient contact.
    pub fn to_contact(mut self, contact: EmailContact) -> Self {
        self.email.to.push(contact);
        self
    }

    /// Adds CC recipients.
    pub fn cc(mut self, addresses: impl AsRef<str>) -> Self {
        if let Some(list) = self.parse_list("cc", addresses.as_ref()) {
            self.email.cc.extend(list);
        }
        self
    }

    /// Adds BCC recipients.
    pub fn bcc(mut self, addresses: impl AsRef<str>) -> Self {
        if let Some(list) = self.parse_list("bcc", addresses.as_ref()) {
            self.email.bcc.extend(list);
        }
        self
    }

    /// Adds reply-to addresses.
    pub fn reply_to(mut self, addresses: impl AsRef<str>) -> Self {
        if let Some(list) = self.parse_list("reply-to", addresses.as_ref()) {
            self.email.reply_to.extend(list);
        }
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.email.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    pub fn body_text(mut self, text: impl Into<String>) -> Self {
        self.email.body_text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    pub fn body_html(mut self, html: impl Into<String>) -> Self {
        self.email.body_html = Some(html.into());
        self
    }

    /// Adds an attachment.
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.email.attachments.push(attachment);
        self
    }

    /// Attaches a file, read when the email is sent.
    pub fn attach_file(self, path: impl Into<PathBuf>) -> Self {
        self.attach(Attachment::from_path(path))
    }

    /// Attaches several files.
    pub fn attach_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self = self.attach_file(path);
        }
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.email.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the Message-ID.
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.email.message_id = Some(id.into());
        self
    }

    /// Sets the In-Reply-To header.
    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.email.in_reply_to = Some(id.into());
        self
    }

    /// Adds a References entry.
    pub fn reference(mut self, id: impl Into<String>) -> Self {
        self.email.references.push(id.into());
        self
    }

    /// Sets the Date header.
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.email.date = Some(date);
        self
    }

    /// Returns the email as composed so far.
    pub fn email(&self) -> &Email {
        &self.email
    }

    /// Returns an independent copy, for reusing a writer as a template.
    pub fn copy(&self) -> Self
    where
        S: Clone,
    {
        self.clone()
    }

    /// Builds and validates the email.
    pub fn build(&self) -> MailResult<Email> {
        if !self.errors.is_empty() {
            return Err(MailError::invalid_address(self.errors.join("; ")));
        }

        let mut email = self.email.clone();
        if let Some(prefix) = &self.subject_prefix {
            if !email.subject.starts_with(prefix.as_str()) {
                email.subject = format!("{}{}", prefix, email.subject);
            }
        }
        email.validate()?;
        Ok(email)
    }

    fn parse_list(&mut self, field: &str, addresses: &str) -> Option<Vec<EmailContact>> {
        match EmailContact::parse_list(addresses) {
            Ok(list) => Some(list),
            Err(e) => {
                self.errors.push(format!("{}: {}", field, e.message()));
                None
            }
        }
    }
}

impl SendableEmailWriter {
    /// Builds and sends the email.
    pub async fn send(&self) -> MailResult<SendResult> {
        let email = self.build()?;
        self.sender.send(&email).await
    }

    /// Builds and sends the email, logging failures instead of returning them.
    pub async fn try_send(&self) -> bool {
        match self.build() {
            Ok(email) => self.sender.try_send(&email).await,
            Err(e) => {
                tracing::warn!(error = %e, subject = %self.email.subject, "Email not sent");
                false
            }
        }
    }

    /// Returns the attached sender.
    pub fn sender(&self) -> &Arc<dyn EmailSender> {
        &self.sender
    }
}
