//! Worker Service Example
//!
//! Monitors the configured folder with IMAP IDLE and prints arrivals and
//! departures until Ctrl-C.
//!
//! ```text
//! EmailReceiver__ImapCredential__Password=... cargo run --example monitor_inbox
//! ```

use integrations_mail::{MailResult, MailServices, MailSettings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> MailResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = MailSettings::from_file_with_env("demos/appsettings.json")?;
    let services = MailServices::from_settings(settings)?;

    let monitor = services
        .folder_monitor()?
        .on_message_arrival(|summary| {
            let from = summary.from.first().map(|c| c.to_string()).unwrap_or_default();
            println!(
                "+ [{}] {} - {}",
                summary.uid,
                from,
                summary.subject.as_deref().unwrap_or("(no subject)")
            );
        })
        .on_message_departure(|uid| println!("- [{}] left the folder", uid));

    let handle = monitor.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping monitor");
            handle.shutdown();
        }
    });

    println!("Monitoring {} (Ctrl-C to stop)", monitor.folder());
    monitor.run().await?;

    let stats = services.metrics().snapshot();
    println!(
        "arrivals={} departures={} reconnects={}",
        stats.arrivals, stats.departures, stats.reconnects
    );
    Ok(())
}
