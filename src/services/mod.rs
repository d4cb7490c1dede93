//! Composition root.
//!
//! [`MailServices`] wires senders, receivers and monitors from options or a
//! settings document, sharing one [`MailMetrics`] collector between them.
//!
//! ```no_run
//! # async fn demo() -> integrations_mail::MailResult<()> {
//! use integrations_mail::{MailServices, MailSettings};
//!
//! let settings = MailSettings::from_file_with_env("appsettings.json")?;
//! let services = MailServices::from_settings(settings)?;
//!
//! services
//!     .write_email()?
//!     .to("ops@example.com")
//!     .subject("Deployed")
//!     .body_text("Version 2 is live.")
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::{EmailOptions, EmailReceiverOptions, EmailSenderOptions, FolderMonitorOptions, MailSettings};
use crate::errors::{MailError, MailResult};
use crate::monitor::MailFolderMonitor;
use crate::observability::MailMetrics;
use crate::receiver::{ImapClientConnector, ImapConnector, ImapReceiver};
use crate::sender::{EmailSender, SmtpSender};
use crate::writer::{EmailWriter, SendableEmailWriter};

enum SenderRegistration {
    Options(EmailSenderOptions),
    Instance(Arc<dyn EmailSender>),
}

enum ReceiverRegistration {
    Options(EmailReceiverOptions),
    Connector(Arc<dyn ImapConnector>, String),
}

/// Builder for [`MailServices`].
#[derive(Default)]
pub struct MailServicesBuilder {
    sender: Option<SenderRegistration>,
    receiver: Option<ReceiverRegistration>,
    monitor: Option<FolderMonitorOptions>,
    mailbox: Option<EmailOptions>,
    metrics: Option<Arc<MailMetrics>>,
}

impl fmt::Debug for MailServicesBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailServicesBuilder")
            .field("sender", &self.sender.is_some())
            .field("receiver", &self.receiver.is_some())
            .field("monitor", &self.monitor)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

impl MailServicesBuilder {
    /// Registers an SMTP sender.
    pub fn add_email_sender(mut self, options: EmailSenderOptions) -> Self {
        self.sender = Some(SenderRegistration::Options(options));
        self
    }

    /// Registers a custom sender, e.g. a [`GenericEmailSender`](crate::sender::GenericEmailSender)
    /// over another lettre transport.
    pub fn add_custom_email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.sender = Some(SenderRegistration::Instance(sender));
        self
    }

    /// Registers an IMAP receiver.
    pub fn add_email_receiver(mut self, options: EmailReceiverOptions) -> Self {
        self.receiver = Some(ReceiverRegistration::Options(options));
        self
    }

    /// Registers a receiver over a custom connector.
    pub fn add_imap_connector(mut self, connector: Arc<dyn ImapConnector>, folder: impl Into<String>) -> Self {
        self.receiver = Some(ReceiverRegistration::Connector(connector, folder.into()));
        self
    }

    /// Enables the folder monitor. Requires a receiver.
    pub fn add_folder_monitor(mut self, options: FolderMonitorOptions) -> Self {
        self.monitor = Some(options);
        self
    }

    /// Sets the defaults applied by [`MailServices::write_email`].
    pub fn add_mailbox_defaults(mut self, options: EmailOptions) -> Self {
        self.mailbox = Some(options);
        self
    }

    /// Shares an existing metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<MailMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registers every section present in `settings`.
    pub fn from_settings(mut self, settings: MailSettings) -> Self {
        if let Some(options) = settings.email_sender {
            self = self.add_email_sender(options);
        }
        if let Some(options) = settings.email_receiver {
            self = self.add_email_receiver(options);
        }
        if let Some(options) = settings.folder_monitor {
            self = self.add_folder_monitor(options);
        }
        if let Some(options) = settings.mailbox {
            self = self.add_mailbox_defaults(options);
        }
        self
    }

    /// Builds the services.
    ///
    /// Building an SMTP sender starts lettre's connection pool, so this must
    /// run inside a Tokio runtime.
    pub fn build(self) -> MailResult<MailServices> {
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(MailMetrics::new()));

        let sender: Option<Arc<dyn EmailSender>> = match self.sender {
            Some(SenderRegistration::Options(options)) => {
                Some(Arc::new(SmtpSender::from_options(&options)?.with_metrics(metrics.clone())))
            }
            Some(SenderRegistration::Instance(sender)) => Some(sender),
            None => None,
        };

        let receiver = match self.receiver {
            Some(ReceiverRegistration::Options(options)) => {
                let folder = options.mail_folder_name.clone();
                let connector = ImapClientConnector::new(options)?;
                Some(ImapReceiver::with_connector(Arc::new(connector), folder))
            }
            Some(ReceiverRegistration::Connector(connector, folder)) => {
                Some(ImapReceiver::with_connector(connector, folder))
            }
            None => None,
        }
        .map(|receiver| Arc::new(receiver.with_metrics(metrics.clone())));

        if let Some(options) = &self.monitor {
            if receiver.is_none() {
                return Err(MailError::configuration(
                    "FolderMonitor requires an EmailReceiver registration",
                ));
            }
            options.validate()?;
        }

        let mailbox = self.mailbox.unwrap_or_default();
        if let Some(from) = &mailbox.from {
            crate::types::EmailContact::parse(from)
                .map_err(|e| MailError::configuration(format!("Mailbox.From: {}", e.message())))?;
        }

        tracing::debug!(
            sender = sender.is_some(),
            receiver = receiver.is_some(),
            monitor = self.monitor.is_some(),
            "Mail services built"
        );

        Ok(MailServices {
            sender,
            receiver,
            monitor: self.monitor,
            mailbox,
            metrics,
        })
    }
}

/// Registered mail services.
#[derive(Clone)]
pub struct MailServices {
    sender: Option<Arc<dyn EmailSender>>,
    receiver: Option<Arc<ImapReceiver>>,
    monitor: Option<FolderMonitorOptions>,
    mailbox: EmailOptions,
    metrics: Arc<MailMetrics>,
}

impl fmt::Debug for MailServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailServices")
            .field("sender", &self.sender.is_some())
            .field("receiver", &self.receiver)
            .field("monitor", &self.monitor)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

impl MailServices {
    /// Creates a new builder.
    pub fn builder() -> MailServicesBuilder {
        MailServicesBuilder::default()
    }

    /// Builds services from a settings document.
    pub fn from_settings(settings: MailSettings) -> MailResult<Self> {
        settings.validate()?;
        Self::builder().from_settings(settings).build()
    }

    /// Returns the registered sender.
    pub fn email_sender(&self) -> MailResult<Arc<dyn EmailSender>> {
        self.sender
            .clone()
            .ok_or_else(|| MailError::configuration("No email sender registered"))
    }

    /// Starts a writer pre-filled with the mailbox defaults and bound to the sender.
    pub fn write_email(&self) -> MailResult<SendableEmailWriter> {
        Ok(EmailWriter::new()
            .with_defaults(&self.mailbox)
            .with_sender(self.email_sender()?))
    }

    /// Returns the registered receiver.
    pub fn email_receiver(&self) -> MailResult<Arc<ImapReceiver>> {
        self.receiver
            .clone()
            .ok_or_else(|| MailError::configuration("No email receiver registered"))
    }

    /// Creates a folder monitor on the receiver's folder.
    ///
    /// Each call returns an independent monitor with its own session.
    pub fn folder_monitor(&self) -> MailResult<MailFolderMonitor> {
        let options = self
            .monitor
            .clone()
            .ok_or_else(|| MailError::configuration("No folder monitor registered"))?;
        let receiver = self.email_receiver()?;
        Ok(MailFolderMonitor::with_connector(receiver.connector().clone(), receiver.default_folder(), options)?
            .with_metrics(self.metrics.clone()))
    }

    /// Returns the mailbox defaults.
    pub fn mailbox_defaults(&self) -> &EmailOptions {
        &self.mailbox
    }

    /// Returns the shared metrics collector.
    pub fn metrics(&self) -> &Arc<MailMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;
    use crate::mocks::{MockImapConnector, RecordingSender};

    #[tokio::test]
    async fn test_write_email_applies_defaults() {
        let sender = Arc::new(RecordingSender::new());
        let services = MailServices::builder()
            .add_custom_email_sender(sender.clone())
            .add_mailbox_defaults(EmailOptions {
                from: Some("App <app@example.com>".to_string()),
                subject_prefix: Some("[App] ".to_string()),
                ..Default::default()
            })
            .build()
            .unwrap();

        assert!(services
            .write_email()
            .unwrap()
            .to("user@example.com")
            .subject("Hi")
            .body_text("Hello")
            .try_send()
            .await);

        let sent = sender.sent();
        assert_eq!(sent[0].from.as_ref().unwrap().address, "app@example.com");
        assert_eq!(sent[0].subject, "[App] Hi");
    }

    #[test]
    fn test_missing_registrations() {
        let services = MailServices::builder().build().unwrap();
        assert_eq!(services.email_sender().err().unwrap().kind(), MailErrorKind::Configuration);
        assert_eq!(services.email_receiver().err().unwrap().kind(), MailErrorKind::Configuration);
        assert_eq!(services.folder_monitor().err().unwrap().kind(), MailErrorKind::Configuration);
        assert!(services.write_email().is_err());
    }

    #[test]
    fn test_monitor_requires_receiver() {
        let result = MailServices::builder()
            .add_folder_monitor(FolderMonitorOptions::default())
            .build();
        assert_eq!(result.unwrap_err().kind(), MailErrorKind::Configuration);
    }

    #[test]
    fn test_invalid_mailbox_from() {
        let result = MailServices::builder()
            .add_mailbox_defaults(EmailOptions {
                from: Some("nobody".to_string()),
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_receiver_and_monitor_share_connector() {
        let connector = MockImapConnector::new();
        connector.create_folder("Support");

        let services = MailServices::builder()
            .add_imap_connector(Arc::new(connector.clone()), "Support")
            .add_folder_monitor(FolderMonitorOptions::default())
            .build()
            .unwrap();

        let receiver = services.email_receiver().unwrap();
        assert_eq!(receiver.default_folder(), "Support");
        assert!(receiver.read_mail().get_message_summaries().await.unwrap().is_empty());

        let monitor = services.folder_monitor().unwrap();
        assert_eq!(monitor.folder(), "Support");
        assert_eq!(services.metrics().snapshot().emails_received, 0);
    }

    #[tokio::test]
    async fn test_from_settings() {
        let settings = MailSettings::from_json_str(
            r#"{
                "EmailSender": { "SmtpHost": "localhost", "SmtpPort": 2525, "TlsMode": "None" },
                "Mailbox": { "From": "noreply@example.com" }
            }"#,
        )
        .unwrap();

        let services = MailServices::from_settings(settings).unwrap();
        assert!(services.email_sender().is_ok());
        assert!(services.email_receiver().is_err());
        assert_eq!(services.mailbox_defaults().from.as_deref(), Some("noreply@example.com"));
    }
}
