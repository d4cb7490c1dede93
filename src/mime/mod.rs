//! Conversion between [`Email`] and MIME messages.
//!
//! Outgoing mail is composed with lettre's message builder:
//! - text only becomes `text/plain`, HTML only becomes `text/html`
//! - text and HTML together become `multipart/alternative`
//! - inline parts wrap the body in `multipart/related`
//! - attachments wrap everything in `multipart/mixed`
//!
//! Incoming mail is parsed with `mailparse`.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment as AttachmentPart, MultiPart, MultiPartBuilder, SinglePart};
use lettre::Message;
use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail};
use uuid::Uuid;

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::types::{Attachment, ContentDisposition, Email, EmailContact, MessageSummary};

/// Generates a Message-ID (without angle brackets) for the given sender domain.
pub fn generate_message_id(domain: &str) -> String {
    let domain = if domain.is_empty() { "localhost" } else { domain };
    format!("{}@{}", Uuid::new_v4().simple(), domain)
}

/// Builds a lettre message from an email.
///
/// The email is validated first. File-backed attachments are read here.
pub async fn to_message(email: &Email) -> MailResult<Message> {
    email.validate()?;
    let from = email
        .from
        .as_ref()
        .ok_or_else(|| MailError::invalid_message("From address is required"))?;

    let message_id = email
        .message_id
        .clone()
        .unwrap_or_else(|| generate_message_id(from.domain()));

    let mut builder = Message::builder()
        .from(from.to_mailbox()?)
        .subject(email.subject.clone())
        .message_id(Some(angle(&message_id)));

    for contact in &email.to {
        builder = builder.to(contact.to_mailbox()?);
    }
    for contact in &email.cc {
        builder = builder.cc(contact.to_mailbox()?);
    }
    for contact in &email.bcc {
        builder = builder.bcc(contact.to_mailbox()?);
    }
    for contact in &email.reply_to {
        builder = builder.reply_to(contact.to_mailbox()?);
    }

    if let Some(in_reply_to) = &email.in_reply_to {
        builder = builder.in_reply_to(angle(in_reply_to));
    }
    if !email.references.is_empty() {
        let references: Vec<String> = email.references.iter().map(|r| angle(r)).collect();
        builder = builder.references(references.join(" "));
    }

    builder = match email.date {
        Some(date) => builder.date(SystemTime::from(date)),
        None => builder.date_now(),
    };

    for (name, value) in &email.headers {
        let name = HeaderName::new_from_ascii(name.clone()).map_err(|e| {
            MailError::invalid_message(format!("Invalid header name '{}': {}", name, e))
        })?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let message = match compose_body(email).await? {
        Body::Single(part) => builder.singlepart(part)?,
        Body::Multi(part) => builder.multipart(part)?,
    };

    tracing::trace!(
        message_id = %message_id,
        recipients = email.recipient_count(),
        attachments = email.attachments.len(),
        "Composed MIME message"
    );

    Ok(message)
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

async fn compose_body(email: &Email) -> MailResult<Body> {
    let mut body = match (&email.body_text, &email.body_html) {
        (Some(text), Some(html)) => Body::Multi(MultiPart::alternative_plain_html(text.clone(), html.clone())),
        (None, Some(html)) => Body::Single(SinglePart::html(html.clone())),
        (Some(text), None) => Body::Single(SinglePart::plain(text.clone())),
        (None, None) => Body::Single(SinglePart::plain(String::new())),
    };

    let (inline, regular): (Vec<&Attachment>, Vec<&Attachment>) =
        email.attachments.iter().partition(|a| a.is_inline());

    if !inline.is_empty() {
        let mut related = push_body(MultiPart::related(), body);
        for attachment in inline {
            related = related.singlepart(attachment_part(attachment).await?);
        }
        body = Body::Multi(related);
    }

    if !regular.is_empty() {
        let mut mixed = push_body(MultiPart::mixed(), body);
        for attachment in regular {
            mixed = mixed.singlepart(attachment_part(attachment).await?);
        }
        body = Body::Multi(mixed);
    }

    Ok(body)
}

fn push_body(container: MultiPartBuilder, body: Body) -> MultiPart {
    match body {
        Body::Single(part) => container.singlepart(part),
        Body::Multi(part) => container.multipart(part),
    }
}

async fn attachment_part(attachment: &Attachment) -> MailResult<SinglePart> {
    let data = attachment.load().await?;
    let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
        MailError::new(
            MailErrorKind::Attachment,
            format!("Invalid content type '{}' for {}: {}", attachment.content_type, attachment.filename, e),
        )
    })?;

    let part = match (&attachment.disposition, &attachment.content_id) {
        (ContentDisposition::Inline, Some(content_id)) => AttachmentPart::new_inline(content_id.clone()),
        _ => AttachmentPart::new(attachment.filename.clone()),
    };
    Ok(part.body(data, content_type))
}

fn angle(id: &str) -> String {
    format!("<{}>", strip_angle(id))
}

/// Removes surrounding angle brackets from a message identifier.
pub fn strip_angle(id: &str) -> &str {
    id.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Parses a raw RFC 5322 message into an [`Email`].
///
/// The first `text/plain` and `text/html` leaves become the bodies. Parts with
/// an attachment disposition, a filename or a non-text type become attachments.
pub fn parse_email(raw: &[u8]) -> MailResult<Email> {
    let parsed = mailparse::parse_mail(raw)?;
    let headers = &parsed.headers;

    let mut email = Email {
        from: contacts(headers, "From").into_iter().next(),
        to: contacts(headers, "To"),
        cc: contacts(headers, "Cc"),
        bcc: contacts(headers, "Bcc"),
        reply_to: contacts(headers, "Reply-To"),
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        message_id: headers.get_first_value("Message-ID").map(|v| strip_angle(&v).to_string()),
        in_reply_to: headers.get_first_value("In-Reply-To").map(|v| strip_angle(&v).to_string()),
        references: headers
            .get_first_value("References")
            .map(|v| split_references(&v))
            .unwrap_or_default(),
        date: header_date(headers),
        ..Default::default()
    };

    collect_parts(&parsed, &mut email)?;
    Ok(email)
}

/// Builds a summary from the header block of a message.
pub fn summary_from_headers(uid: u32, folder: &str, raw_headers: &[u8]) -> MailResult<MessageSummary> {
    let (headers, _) = mailparse::parse_headers(raw_headers)?;
    let headers = headers.as_slice();

    Ok(MessageSummary {
        uid,
        folder: folder.to_string(),
        message_id: headers.get_first_value("Message-ID").map(|v| strip_angle(&v).to_string()),
        subject: headers.get_first_value("Subject"),
        from: contacts(headers, "From"),
        to: contacts(headers, "To"),
        cc: contacts(headers, "Cc"),
        date: header_date(headers),
        ..Default::default()
    })
}

fn collect_parts(part: &ParsedMail<'_>, email: &mut Email) -> MailResult<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, email)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();
    let content_id = part
        .headers
        .get_first_value("Content-ID")
        .map(|v| strip_angle(&v).to_string());

    let is_attachment = disposition.disposition == DispositionType::Attachment
        || filename.is_some()
        || !mimetype.starts_with("text/");

    if !is_attachment {
        match mimetype.as_str() {
            "text/plain" if email.body_text.is_none() => email.body_text = Some(part.get_body()?),
            "text/html" if email.body_html.is_none() => email.body_html = Some(part.get_body()?),
            _ => {}
        }
        return Ok(());
    }

    let filename = filename.unwrap_or_else(|| format!("part{}", email.attachments.len() + 1));
    let mut attachment = Attachment::new(filename, mimetype, part.get_body_raw()?);
    if disposition.disposition == DispositionType::Inline {
        if let Some(content_id) = content_id {
            attachment = attachment.inline(content_id);
        }
    }
    email.attachments.push(attachment);
    Ok(())
}

fn contacts(headers: &[MailHeader<'_>], name: &str) -> Vec<EmailContact> {
    let Some(header) = headers.get_first_header(name) else {
        return Vec::new();
    };
    let Ok(list) = mailparse::addrparse_header(header) else {
        tracing::debug!(header = name, "Unparseable address header");
        return Vec::new();
    };

    let mut contacts = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(single) => contacts.push(EmailContact {
                name: single.display_name.clone(),
                address: single.addr.clone(),
            }),
            MailAddr::Group(group) => contacts.extend(group.addrs.iter().map(|single| EmailContact {
                name: single.display_name.clone(),
                address: single.addr.clone(),
            })),
        }
    }
    contacts
}

fn header_date(headers: &[MailHeader<'_>]) -> Option<DateTime<Utc>> {
    let value = headers.get_first_value("Date")?;
    let timestamp = mailparse::dateparse(&value).ok()?;
    DateTime::<Utc>::from_timestamp(timestamp, 0)
}

fn split_references(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|id| strip_angle(id).to_string())
        .filter(|id| !id.is_empty())
        .collect()
}
