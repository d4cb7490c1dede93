//! Console Reader Example
//!
//! Lists folders and prints the most recent unread messages of the configured
//! folder.
//!
//! ```text
//! EmailReceiver__ImapCredential__Password=... cargo run --example read_inbox -- 10
//! ```

use integrations_mail::{MailResult, MailServices, MailSettings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> MailResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let count: usize = std::env::args()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(10);

    let settings = MailSettings::from_file_with_env("demos/appsettings.json")?;
    let services = MailServices::from_settings(settings)?;
    let receiver = services.email_receiver()?;

    println!("Folders:");
    for name in receiver.get_folder_names().await? {
        println!("  {}", name);
    }

    let summaries = receiver.read_mail().unread_only().get_message_summaries().await?;
    let skip = summaries.len().saturating_sub(count);
    println!("\n{} unread in {}:", summaries.len(), receiver.default_folder());
    for summary in summaries.iter().skip(skip) {
        let from = summary
            .from
            .first()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "(unknown)".to_string());
        println!(
            "  [{}] {} - {}",
            summary.uid,
            from,
            summary.subject.as_deref().unwrap_or("(no subject)")
        );
    }

    if let Some(emails) = receiver.read_mail().unread_only().skip(skip).try_get_emails().await {
        if let Some(email) = emails.last() {
            println!("\nLatest unread body:\n{}", email.body_text.as_deref().unwrap_or(""));
        }
    }

    receiver.disconnect().await
}
