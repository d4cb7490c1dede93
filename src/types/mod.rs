//! Core types for the mail services.
//!
//! This module provides:
//! - Contact types with validation and list parsing
//! - The [`Email`] DTO exchanged with writers, senders and receivers
//! - Attachment handling (in-memory or file-backed)
//! - Summary and send result types

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailErrorKind, MailResult};

/// Maximum length of an address (RFC 5321).
const MAX_ADDRESS_LEN: usize = 254;

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailContact {
    /// Display name (e.g., "Jane Doe").
    #[serde(default)]
    pub name: Option<String>,
    /// Email address (e.g., "jane@example.com").
    pub address: String,
}

impl EmailContact {
    /// Creates a contact from a bare address.
    pub fn new(address: impl Into<String>) -> MailResult<Self> {
        let address = address.into();
        Self::validate_address(&address)?;
        Ok(Self { name: None, address })
    }

    /// Creates a contact with a display name.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> MailResult<Self> {
        let address = address.into();
        Self::validate_address(&address)?;
        let name = name.into();
        Ok(Self {
            name: if name.is_empty() { None } else { Some(name) },
            address,
        })
    }

    /// Parses `"Name <a@b>"`, `"<a@b>"` or `"a@b"`.
    pub fn parse(s: &str) -> MailResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.rfind('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"').trim();
                let address = s[start + 1..end].trim();
                return Self::with_name(name, address);
            }
        }

        Self::new(s)
    }

    /// Parses a `;` or `,` separated list of contacts.
    ///
    /// Separators inside quotes or angle brackets do not split. Empty entries
    /// are skipped.
    pub fn parse_list(s: &str) -> MailResult<Vec<Self>> {
        split_address_list(s)
            .into_iter()
            .map(|entry| Self::parse(&entry))
            .collect()
    }

    /// Checks an address: one `@`, non-empty local part and domain, no
    /// whitespace or control characters.
    pub fn validate_address(address: &str) -> MailResult<()> {
        if address.is_empty() {
            return Err(MailError::invalid_address("Email address cannot be empty"));
        }

        if address.len() > MAX_ADDRESS_LEN {
            return Err(MailError::invalid_address(format!(
                "Email address too long (max {} characters)",
                MAX_ADDRESS_LEN
            )));
        }

        if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(MailError::invalid_address(format!(
                "Email address '{}' contains whitespace or control characters",
                address.escape_debug()
            )));
        }

        let Some((local, domain)) = address.rsplit_once('@') else {
            return Err(MailError::invalid_address(format!(
                "Email address '{}' must contain @",
                address
            )));
        };

        if local.is_empty() || domain.is_empty() || local.contains('@') {
            return Err(MailError::invalid_address(format!(
                "Email address '{}' is malformed",
                address
            )));
        }

        Ok(())
    }

    /// Returns the address part only.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the domain part of the address.
    pub fn domain(&self) -> &str {
        self.address.rsplit_once('@').map(|(_, d)| d).unwrap_or_default()
    }

    /// Case-insensitive address comparison.
    pub fn same_address(&self, other: &EmailContact) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }

    /// Converts into a lettre mailbox.
    pub fn to_mailbox(&self) -> MailResult<lettre::message::Mailbox> {
        let address: lettre::Address = self.address.parse()?;
        Ok(lettre::message::Mailbox::new(self.name.clone(), address))
    }
}

impl fmt::Display for EmailContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "\"{}\" <{}>", name.replace('"', "'"), self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

impl std::str::FromStr for EmailContact {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for EmailContact {
    type Error = MailError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailContact {
    type Error = MailError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<lettre::message::Mailbox> for EmailContact {
    fn from(mailbox: lettre::message::Mailbox) -> Self {
        Self {
            name: mailbox.name,
            address: mailbox.email.to_string(),
        }
    }
}

fn split_address_list(s: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in s.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ';' | ',' if !in_quotes && !in_angle => {
                if !current.trim().is_empty() {
                    entries.push(current.trim().to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if !current.trim().is_empty() {
        entries.push(current.trim().to_string());
    }
    entries
}

/// Content disposition for attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentDisposition {
    /// Regular attachment.
    #[default]
    Attachment,
    /// Inline content, referenced from HTML by content ID.
    Inline,
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentDisposition::Attachment => write!(f, "attachment"),
            ContentDisposition::Inline => write!(f, "inline"),
        }
    }
}

/// Where attachment content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentSource {
    /// Content held in memory.
    Bytes(Vec<u8>),
    /// File read when the message is composed.
    File(PathBuf),
}

/// File attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    /// Filename shown to the recipient.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Content disposition.
    #[serde(default)]
    pub disposition: ContentDisposition,
    /// Content ID for inline parts (`cid:` reference without the prefix).
    #[serde(default)]
    pub content_id: Option<String>,
    /// Content.
    pub source: AttachmentSource,
}

impl Attachment {
    /// Creates an in-memory attachment.
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            disposition: ContentDisposition::Attachment,
            content_id: None,
            source: AttachmentSource::Bytes(data),
        }
    }

    /// Creates an in-memory attachment with the content type guessed from the filename.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = guess_content_type(&filename);
        Self::new(filename, content_type, data)
    }

    /// Creates a file-backed attachment. The file is read at send time.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Self {
            content_type: guess_content_type(&filename),
            filename,
            disposition: ContentDisposition::Attachment,
            content_id: None,
            source: AttachmentSource::File(path),
        }
    }

    /// Marks the attachment inline with the given content ID.
    pub fn inline(mut self, content_id: impl Into<String>) -> Self {
        self.disposition = ContentDisposition::Inline;
        self.content_id = Some(content_id.into());
        self
    }

    /// Returns the CID reference for use in HTML (e.g., "cid:logo").
    pub fn cid_reference(&self) -> Option<String> {
        self.content_id.as_ref().map(|id| format!("cid:{}", id))
    }

    /// Returns true for inline parts.
    pub fn is_inline(&self) -> bool {
        self.disposition == ContentDisposition::Inline
    }

    /// Loads the attachment content.
    pub async fn load(&self) -> MailResult<Vec<u8>> {
        match &self.source {
            AttachmentSource::Bytes(data) => Ok(data.clone()),
            AttachmentSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
                MailError::new(
                    MailErrorKind::Attachment,
                    format!("Cannot read attachment {}: {}", path.display(), e),
                )
                .with_cause(e)
            }),
        }
    }
}

fn guess_content_type(filename: impl AsRef<Path>) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .to_string()
}

/// Complete email message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Email {
    /// Sender.
    #[serde(default)]
    pub from: Option<EmailContact>,
    /// Primary recipients.
    #[serde(default)]
    pub to: Vec<EmailContact>,
    /// CC recipients.
    #[serde(default)]
    pub cc: Vec<EmailContact>,
    /// BCC recipients.
    #[serde(default)]
    pub bcc: Vec<EmailContact>,
    /// Reply-to addresses.
    #[serde(default)]
    pub reply_to: Vec<EmailContact>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Plain text body.
    #[serde(default)]
    pub body_text: Option<String>,
    /// HTML body.
    #[serde(default)]
    pub body_html: Option<String>,
    /// Attachments, including inline parts.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Message-ID, generated when sending if unset.
    #[serde(default)]
    pub message_id: Option<String>,
    /// In-Reply-To header.
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// References header.
    #[serde(default)]
    pub references: Vec<String>,
    /// Date header.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Additional headers, in insertion order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl Email {
    /// Creates an empty email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recipients (to + cc + bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &EmailContact> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Returns the count of all recipients.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Returns true if the email has any attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Returns true if the email has both text and HTML parts.
    pub fn is_multipart_alternative(&self) -> bool {
        self.body_text.is_some() && self.body_html.is_some()
    }

    /// Returns the value of an extra header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Checks that the email can be sent.
    ///
    /// A sender and at least one recipient are required, every address must
    /// be well formed, and the sender may not also be a primary recipient.
    pub fn validate(&self) -> MailResult<()> {
        let from = self
            .from
            .as_ref()
            .ok_or_else(|| MailError::invalid_message("From address is required"))?;
        EmailContact::validate_address(&from.address)?;

        if self.recipient_count() == 0 {
            return Err(MailError::invalid_message("At least one recipient is required"));
        }

        for contact in self.all_recipients().chain(self.reply_to.iter()) {
            EmailContact::validate_address(&contact.address)?;
        }

        if self.to.iter().any(|to| to.same_address(from)) {
            return Err(MailError::invalid_address(format!(
                "Sender {} cannot also be a recipient",
                from.address
            )));
        }

        for attachment in &self.attachments {
            if attachment.filename.trim().is_empty() {
                return Err(MailError::new(
                    MailErrorKind::Attachment,
                    "Attachment filename cannot be empty",
                ));
            }
        }

        Ok(())
    }
}

/// Summary of a message in a mail folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageSummary {
    /// Folder-unique identifier.
    pub uid: u32,
    /// Folder the message was read from.
    pub folder: String,
    /// IMAP flags (e.g. `\Seen`).
    pub flags: Vec<String>,
    /// RFC 822 size in bytes.
    pub size: Option<u32>,
    /// Server arrival time.
    pub internal_date: Option<DateTime<Utc>>,
    /// Message-ID header.
    pub message_id: Option<String>,
    /// Subject header.
    pub subject: Option<String>,
    /// From header.
    pub from: Vec<EmailContact>,
    /// To header.
    pub to: Vec<EmailContact>,
    /// Cc header.
    pub cc: Vec<EmailContact>,
    /// Date header.
    pub date: Option<DateTime<Utc>>,
    /// The full message, when it was fetched.
    pub email: Option<Email>,
}

impl MessageSummary {
    /// Returns true if the message has the given flag.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    /// Returns true if the message has been read.
    pub fn is_seen(&self) -> bool {
        self.has_flag("\\Seen")
    }
}

/// Result of sending a single email.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    /// Message-ID of the sent message.
    pub message_id: String,
    /// Number of envelope recipients handed to the server.
    pub accepted: usize,
    /// Transport response.
    pub response: String,
    /// Send duration.
    pub duration: Duration,
}
