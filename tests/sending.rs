//! End-to-end sending through lettre's stub transport.

use std::sync::Arc;

use integrations_mail::mime::parse_email;
use integrations_mail::{Attachment, EmailSender, EmailWriter, GenericEmailSender, MailErrorKind, MimeMessageWriter};
use lettre::transport::stub::AsyncStubTransport;

#[tokio::test]
async fn writer_sends_multipart_message() {
    let transport = AsyncStubTransport::new_ok();
    let sender = Arc::new(GenericEmailSender::new(transport.clone()));

    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.csv");
    std::fs::write(&report, "region,total\nnorth,12\n").unwrap();

    let result = EmailWriter::new()
        .from("Reports <reports@example.com>")
        .to("alice@example.com, bob@example.com")
        .cc("carol@example.com")
        .subject("Weekly report")
        .body_text("Numbers attached.")
        .body_html("<p>Numbers attached.</p>")
        .attach_file(&report)
        .attach(Attachment::from_bytes("logo.png", vec![0x89, 0x50, 0x4e, 0x47]).inline("logo"))
        .with_sender(sender.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(result.accepted, 3);
    assert_eq!(sender.metrics().snapshot().emails_sent, 1);

    let messages = transport.messages().await;
    assert_eq!(messages.len(), 1);
    let (envelope, raw) = &messages[0];
    assert_eq!(envelope.to().len(), 3);

    let parsed = parse_email(raw.as_bytes()).unwrap();
    assert_eq!(parsed.subject, "Weekly report");
    assert_eq!(parsed.message_id.as_deref(), Some(result.message_id.as_str()));
    assert!(parsed.body_text.unwrap().contains("Numbers attached."));
    assert!(parsed.body_html.unwrap().contains("<p>"));

    assert_eq!(parsed.attachments.len(), 2);
    assert!(parsed.attachments.iter().any(|a| a.filename == "report.csv" && !a.is_inline()));
    let logo = parsed.attachments.iter().find(|a| a.is_inline()).unwrap();
    assert_eq!(logo.content_id.as_deref(), Some("logo"));
    assert_eq!(logo.content_type, "image/png");
}

#[tokio::test]
async fn missing_attachment_fails_without_sending() {
    let transport = AsyncStubTransport::new_ok();
    let sender = Arc::new(GenericEmailSender::new(transport.clone()));

    let writer = EmailWriter::new()
        .from("sender@example.com")
        .to("recipient@example.com")
        .subject("Missing file")
        .attach_file("/definitely/not/here.pdf")
        .with_sender(sender);

    let err = writer.send().await.unwrap_err();
    assert_eq!(err.kind(), MailErrorKind::Attachment);
    assert!(!writer.try_send().await);
    assert!(transport.messages().await.is_empty());
}

#[tokio::test]
async fn reply_all_threads_and_quotes() {
    let original = EmailWriter::new()
        .from("alice@example.com")
        .to("me@example.com; bob@example.com")
        .subject("Lunch?")
        .body_text("Noon at the usual place?")
        .message_id("lunch-1@example.com")
        .build()
        .unwrap();

    let transport = AsyncStubTransport::new_ok();
    let sender = GenericEmailSender::new(transport.clone());

    let message = MimeMessageWriter::reply(&original, true)
        .from("me@example.com")
        .body_text("Works for me.")
        .build()
        .await
        .unwrap();
    sender.send_message(message).await.unwrap();

    let (envelope, raw) = &transport.messages().await[0];
    let reply = parse_email(raw.as_bytes()).unwrap();

    assert_eq!(reply.subject, "Re: Lunch?");
    assert_eq!(reply.in_reply_to.as_deref(), Some("lunch-1@example.com"));
    assert_eq!(reply.references, vec!["lunch-1@example.com".to_string()]);
    assert!(reply.body_text.unwrap().contains("> Noon at the usual place?"));

    let recipients: Vec<String> = envelope.to().iter().map(|a| a.to_string()).collect();
    assert!(recipients.contains(&"alice@example.com".to_string()));
    assert!(recipients.contains(&"bob@example.com".to_string()));
    assert!(!recipients.contains(&"me@example.com".to_string()));
}
