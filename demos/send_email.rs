//! Console Sender Example
//!
//! Sends one email using the `EmailSender` and `Mailbox` sections of
//! `demos/appsettings.json`:
//!
//! ```text
//! EmailSender__SmtpCredential__Password=... \
//!     cargo run --example send_email -- someone@example.com "Hello" report.pdf
//! ```

use integrations_mail::{MailResult, MailServices, MailSettings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> MailResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let to = args.next().unwrap_or_else(|| "someone@example.com".to_string());
    let subject = args.next().unwrap_or_else(|| "Hello from Rust".to_string());
    let attachments: Vec<String> = args.collect();

    let settings = MailSettings::from_file_with_env("demos/appsettings.json")?;
    let services = MailServices::from_settings(settings)?;

    let sender = services.email_sender()?;
    if !sender.test_connection().await? {
        eprintln!("SMTP server is not reachable");
        return Ok(());
    }

    let sent = services
        .write_email()?
        .to(&to)
        .subject(subject)
        .body_text("Sent by the send_email demo.")
        .body_html("<p>Sent by the <b>send_email</b> demo.</p>")
        .attach_files(attachments)
        .try_send()
        .await;

    if sent {
        println!("Email sent to {}", to);
    } else {
        println!("Email could not be sent; see the log above");
    }

    let stats = services.metrics().snapshot();
    println!("sent={} failed={}", stats.emails_sent, stats.emails_failed);
    Ok(())
}
