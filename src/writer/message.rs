//! Writer producing lettre messages, with reply and forward support.

use std::path::PathBuf;

use lettre::Message;

use super::EmailWriter;
use crate::errors::MailResult;
use crate::mime;
use crate::types::{Attachment, Email, EmailContact};

/// Quoted content appended to replies and forwards.
#[derive(Debug, Clone)]
struct Quote {
    text: String,
    html: Option<String>,
}

/// Builds [`lettre::Message`] values.
///
/// Envelope and body methods mirror [`EmailWriter`]. [`reply`](Self::reply)
/// and [`forward`](Self::forward) pre-fill a writer from a received email.
#[derive(Debug, Clone, Default)]
pub struct MimeMessageWriter {
    writer: EmailWriter,
    quote: Option<Quote>,
    reply_all: bool,
}

impl MimeMessageWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing email writer.
    pub fn from_writer(writer: EmailWriter) -> Self {
        Self {
            writer,
            ..Self::default()
        }
    }

    /// Starts a reply to `original`.
    ///
    /// The reply goes to the original Reply-To (or From). With `reply_all`
    /// the original To and Cc recipients are copied; the replying sender is
    /// removed from them when the message is built.
    pub fn reply(original: &Email, reply_all: bool) -> Self {
        let mut email = Email {
            subject: prefixed_subject("Re: ", &original.subject),
            ..Default::default()
        };

        email.to = if original.reply_to.is_empty() {
            original.from.iter().cloned().collect()
        } else {
            original.reply_to.clone()
        };

        if reply_all {
            for contact in original.to.iter().chain(original.cc.iter()) {
                if !email.to.iter().any(|c| c.same_address(contact)) && !email.cc.iter().any(|c| c.same_address(contact)) {
                    email.cc.push(contact.clone());
                }
            }
        }

        if let Some(id) = &original.message_id {
            email.in_reply_to = Some(id.clone());
            email.references = original.references.clone();
            email.references.push(id.clone());
        }

        Self {
            writer: EmailWriter::from_email(email),
            quote: Some(reply_quote(original)),
            reply_all,
        }
    }

    /// Starts a forward of `original`, carrying over its attachments.
    pub fn forward(original: &Email) -> Self {
        let email = Email {
            subject: prefixed_subject("Fwd: ", &original.subject),
            attachments: original.attachments.clone(),
            references: original.message_id.iter().cloned().collect(),
            ..Default::default()
        };

        Self {
            writer: EmailWriter::from_email(email),
            quote: Some(forward_quote(original)),
            reply_all: false,
        }
    }

    /// Sets the sender.
    pub fn from(mut self, address: impl AsRef<str>) -> Self {
        self.writer = self.writer.from(address);
        self
    }

    /// Adds primary recipients.
    pub fn to(mut self, addresses: impl AsRef<str>) -> Self {
        self.writer = self.writer.to(addresses);
        self
    }

    /// Adds CC recipients.
    pub fn cc(mut self, addresses: impl AsRef<str>) -> Self {
        self.writer = self.writer.cc(addresses);
        self
    }

    /// Adds BCC recipients.
    pub fn bcc(mut self, addresses: impl AsRef<str>) -> Self {
        self.writer = self.writer.bcc(addresses);
        self
    }

    /// Adds reply-to addresses.
    pub fn reply_to(mut self, addresses: impl AsRef<str>) -> Self {
        self.writer = self.writer.reply_to(addresses);
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.writer = self.writer.subject(subject);
        self
    }

    /// Sets the plain text body. For replies and forwards the quote follows it.
    pub fn body_text(mut self, text: impl Into<String>) -> Self {
        self.writer = self.writer.body_text(text);
        self
    }

    /// Sets the HTML body.
    pub fn body_html(mut self, html: impl Into<String>) -> Self {
        self.writer = self.writer.body_html(html);
        self
    }

    /// Adds an attachment.
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.writer = self.writer.attach(attachment);
        self
    }

    /// Attaches a file.
    pub fn attach_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.writer = self.writer.attach_file(path);
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.writer = self.writer.header(name, value);
        self
    }

    /// Builds the email with quoting applied, without composing MIME.
    pub fn build_email(&self) -> MailResult<Email> {
        let mut writer = self.writer.clone();
        if self.reply_all {
            writer = drop_sender_from_recipients(writer);
        }

        let mut email = writer.build()?;
        if let Some(quote) = &self.quote {
            let text = email.body_text.take().unwrap_or_default();
            email.body_text = Some(if text.is_empty() {
                quote.text.clone()
            } else {
                format!("{}\n\n{}", text, quote.text)
            });

            if let Some(quoted_html) = &quote.html {
                let html = email
                    .body_html
                    .take()
                    .unwrap_or_else(|| text_to_html(&text));
                email.body_html = Some(format!("{}{}", html, quoted_html));
            }
        }
        Ok(email)
    }

    /// Builds the MIME message.
    pub async fn build(&self) -> MailResult<Message> {
        let email = self.build_email()?;
        mime::to_message(&email).await
    }
}

fn drop_sender_from_recipients(writer: EmailWriter) -> EmailWriter {
    let mut email = writer.email().clone();
    let Some(from) = email.from.clone() else {
        return writer;
    };
    email.to.retain(|c| !c.same_address(&from));
    email.cc.retain(|c| !c.same_address(&from));
    if email.to.is_empty() {
        if let Some(first) = email.cc.first().cloned() {
            email.cc.remove(0);
            email.to.push(first);
        }
    }

    let mut rebuilt = EmailWriter::from_email(email);
    rebuilt.subject_prefix = writer.subject_prefix;
    rebuilt.errors = writer.errors;
    rebuilt
}

fn prefixed_subject(prefix: &str, subject: &str) -> String {
    let marker = prefix.trim_end().to_ascii_lowercase();
    if subject.to_ascii_lowercase().starts_with(&marker) {
        subject.to_string()
    } else {
        format!("{}{}", prefix, subject)
    }
}

fn sender_label(original: &Email) -> String {
    original
        .from
        .as_ref()
        .map(EmailContact::to_string)
        .unwrap_or_else(|| "unknown sender".to_string())
}

fn join_contacts(contacts: &[EmailContact]) -> String {
    contacts.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

fn reply_quote(original: &Email) -> Quote {
    let header = match original.date {
        Some(date) => format!("On {}, {} wrote:", date.format("%a, %d %b %Y %H:%M"), sender_label(original)),
        None => format!("{} wrote:", sender_label(original)),
    };

    let mut text = header.clone();
    for line in original.body_text.as_deref().unwrap_or_default().lines() {
        text.push_str("\n> ");
        text.push_str(line);
    }

    let html = original.body_html.as_ref().map(|html| {
        format!(
            "<div>{}</div><blockquote style=\"margin:0 0 0 .8ex;border-left:1px solid #ccc;padding-left:1ex\">{}</blockquote>",
            escape_html(&header),
            html
        )
    });

    Quote { text, html }
}

fn forward_quote(original: &Email) -> Quote {
    let mut header = String::from("---------- Forwarded message ----------");
    header.push_str(&format!("\nFrom: {}", sender_label(original)));
    if let Some(date) = original.date {
        header.push_str(&format!("\nDate: {}", date.to_rfc2822()));
    }
    header.push_str(&format!("\nSubject: {}", original.subject));
    if !original.to.is_empty() {
        header.push_str(&format!("\nTo: {}", join_contacts(&original.to)));
    }
    if !original.cc.is_empty() {
        header.push_str(&format!("\nCc: {}", join_contacts(&original.cc)));
    }

    let text = format!("{}\n\n{}", header, original.body_text.as_deref().unwrap_or_default());
    let html = original
        .body_html
        .as_ref()
        .map(|html| format!("<div>{}</div><br>{}", text_to_html(&header), html));

    Quote { text, html }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn text_to_html(text: &str) -> String {
    escape_html(text).replace('\n', "<br>\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> Email {
        Email {
            from: Some(EmailContact::parse("Alice <alice@example.com>").unwrap()),
            to: vec![
                EmailContact::parse("me@example.com").unwrap(),
                EmailContact::parse("bob@example.com").unwrap(),
            ],
            cc: vec![EmailContact::parse("carol@example.com").unwrap()],
            subject: "Plans".to_string(),
            body_text: Some("Lunch?\nNoon works.".to_string()),
            message_id: Some("m2@example.com".to_string()),
            references: vec!["m1@example.com".to_string()],
            attachments: vec![Attachment::from_bytes("menu.pdf", vec![1, 2])],
            ..Default::default()
        }
    }

    #[test]
    fn test_reply() {
        let email = MimeMessageWriter::reply(&original(), false)
            .from("me@example.com")
            .body_text("Sure.")
            .build_email()
            .unwrap();

        assert_eq!(email.subject, "Re: Plans");
        assert_eq!(email.to.len(), 1);
        assert_eq!(email.to[0].address, "alice@example.com");
        assert!(email.cc.is_empty());
        assert_eq!(email.in_reply_to.as_deref(), Some("m2@example.com"));
        assert_eq!(email.references, vec!["m1@example.com", "m2@example.com"]);
        assert!(email.attachments.is_empty());

        let body = email.body_text.unwrap();
        assert!(body.starts_with("Sure.\n\n"));
        assert!(body.contains("> Lunch?\n> Noon works."));
    }

    #[test]
    fn test_reply_all_excludes_self() {
        let email = MimeMessageWriter::reply(&original(), true)
            .from("me@example.com")
            .build_email()
            .unwrap();

        let cc: Vec<&str> = email.cc.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(cc, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(email.to[0].address, "alice@example.com");
    }

    #[test]
    fn test_reply_prefers_reply_to_and_keeps_prefix() {
        let mut original = original();
        original.subject = "RE: Plans".to_string();
        original.reply_to = vec![EmailContact::parse("list@example.com").unwrap()];

        let email = MimeMessageWriter::reply(&original, false)
            .from("me@example.com")
            .build_email()
            .unwrap();
        assert_eq!(email.subject, "RE: Plans");
        assert_eq!(email.to[0].address, "list@example.com");
    }

    #[test]
    fn test_forward() {
        let email = MimeMessageWriter::forward(&original())
            .from("me@example.com")
            .to("dave@example.com")
            .body_text("FYI")
            .build_email()
            .unwrap();

        assert_eq!(email.subject, "Fwd: Plans");
        assert_eq!(email.attachments.len(), 1);
        assert!(email.in_reply_to.is_none());
        let body = email.body_text.unwrap();
        assert!(body.contains("---------- Forwarded message ----------"));
        assert!(body.contains("From: \"Alice\" <alice@example.com>"));
        assert!(body.ends_with("Lunch?\nNoon works."));
    }

    #[test]
    fn test_html_quote() {
        let mut original = original();
        original.body_html = Some("<p>Lunch?</p>".to_string());

        let email = MimeMessageWriter::reply(&original, false)
            .from("me@example.com")
            .body_text("Sure & see you")
            .build_email()
            .unwrap();
        let html = email.body_html.unwrap();
        assert!(html.starts_with("Sure &amp; see you"));
        assert!(html.contains("<blockquote"));
        assert!(html.contains("<p>Lunch?</p>"));
    }

    #[tokio::test]
    async fn test_build_message() {
        let message = MimeMessageWriter::new()
            .from("me@example.com")
            .to("you@example.com")
            .subject("Hi")
            .body_html("<b>Hi</b>")
            .header("X-Mailer", "integrations-mail")
            .build()
            .await
            .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("X-Mailer: integrations-mail"));
    }
}
