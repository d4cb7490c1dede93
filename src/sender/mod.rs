//! Email senders.
//!
//! [`EmailSender`] is the seam the writers send through. [`GenericEmailSender`]
//! implements it on top of any lettre [`AsyncTransport`], and [`SmtpSender`] is
//! the SMTP instantiation built from [`EmailSenderOptions`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::PoolConfig as SmtpPoolConfig;
use lettre::transport::stub::AsyncStubTransport;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{EmailSenderOptions, TlsMode};
use crate::errors::{MailError, MailResult};
use crate::mime::{self, strip_angle};
use crate::observability::{MailMetrics, ProtocolLogger, Timer};
use crate::types::{Email, SendResult};

/// Sends emails.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends an already composed MIME message.
    async fn send_message(&self, message: Message) -> MailResult<SendResult>;

    /// Validates, composes and sends an email.
    async fn send(&self, email: &Email) -> MailResult<SendResult> {
        let message = mime::to_message(email).await?;
        self.send_message(message).await
    }

    /// Sends an email, logging instead of returning failures.
    async fn try_send(&self, email: &Email) -> bool {
        match self.send(email).await {
            Ok(result) => {
                tracing::debug!(message_id = %result.message_id, "Email sent");
                true
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = ?e.kind(),
                    subject = %email.subject,
                    "Failed to send email"
                );
                false
            }
        }
    }

    /// Checks that the server is reachable.
    async fn test_connection(&self) -> MailResult<bool> {
        Ok(true)
    }
}

/// Maps a transport's error type into [`MailError`].
pub trait TransportError: std::error::Error + Send + Sync + Sized + 'static {
    /// Converts the error.
    fn into_mail_error(self) -> MailError;
}

impl TransportError for lettre::transport::smtp::Error {
    fn into_mail_error(self) -> MailError {
        self.into()
    }
}

impl TransportError for lettre::transport::stub::Error {
    fn into_mail_error(self) -> MailError {
        self.into()
    }
}

/// Connection check for transports that have one.
#[async_trait]
pub trait TransportProbe {
    /// Returns true when the transport can reach its server.
    async fn probe(&self) -> MailResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl TransportProbe for AsyncSmtpTransport<Tokio1Executor> {
    async fn probe(&self) -> MailResult<bool> {
        Ok(self.test_connection().await?)
    }
}

impl TransportProbe for AsyncStubTransport {}

/// Email sender delegating to a lettre transport.
pub struct GenericEmailSender<T> {
    transport: T,
    metrics: Arc<MailMetrics>,
    protocol_log: Option<ProtocolLogger>,
}

/// SMTP sender.
pub type SmtpSender = GenericEmailSender<AsyncSmtpTransport<Tokio1Executor>>;

impl<T> GenericEmailSender<T>
where
    T: AsyncTransport + TransportProbe + Send + Sync,
    T::Ok: Debug + Send,
    T::Error: TransportError,
{
    /// Creates a sender over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            metrics: Arc::new(MailMetrics::new()),
            protocol_log: None,
        }
    }

    /// Records metrics into a shared collector.
    pub fn with_metrics(mut self, metrics: Arc<MailMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Writes a transaction log for every send.
    pub fn with_protocol_log(mut self, logger: ProtocolLogger) -> Self {
        self.protocol_log = Some(logger);
        self
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<MailMetrics> {
        &self.metrics
    }

    fn log_envelope(&self, message: &Message) {
        let Some(log) = &self.protocol_log else { return };
        let envelope = message.envelope();
        let from = envelope.from().map(|a| a.to_string()).unwrap_or_default();
        log.log("C: ", &format!("MAIL FROM:<{}>", from));
        for to in envelope.to() {
            log.log("C: ", &format!("RCPT TO:<{}>", to));
        }
        log.log("C: ", "DATA");
    }

    fn log_outcome(&self, outcome: &str) {
        if let Some(log) = &self.protocol_log {
            log.log("S: ", outcome);
        }
    }
}

impl SmtpSender {
    /// Builds an SMTP sender from options.
    ///
    /// Must be called inside a Tokio runtime; lettre's pool spawns a cleanup task.
    pub fn from_options(options: &EmailSenderOptions) -> MailResult<Self> {
        options.validate()?;
        let host = options.smtp_host.as_str();

        let builder = match options.effective_tls_mode() {
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            TlsMode::StartTlsRequired => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .tls(Tls::Opportunistic(TlsParameters::new(host.to_string())?)),
            TlsMode::None | TlsMode::Auto => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let mut builder = builder
            .port(options.smtp_port)
            .timeout(Some(options.timeout))
            .pool_config(
                SmtpPoolConfig::new()
                    .max_size(options.pool.max_connections)
                    .idle_timeout(options.pool.idle_timeout),
            );

        if let Some(credential) = &options.smtp_credential {
            builder = builder.credentials(Credentials::new(
                credential.user_name.clone(),
                credential.password().to_string(),
            ));
        }
        if let Some(name) = &options.hello_name {
            builder = builder.hello_name(ClientId::Domain(name.clone()));
        }

        let mut sender = Self::new(builder.build());
        if let Some(path) = &options.protocol_log {
            sender = sender.with_protocol_log(ProtocolLogger::open(path)?);
        }

        tracing::info!(
            host = %options.smtp_host,
            port = options.smtp_port,
            tls = ?options.effective_tls_mode(),
            authenticated = options.smtp_credential.is_some(),
            "SMTP sender configured"
        );

        Ok(sender)
    }
}

#[async_trait]
impl<T> EmailSender for GenericEmailSender<T>
where
    T: AsyncTransport + TransportProbe + Send + Sync,
    T::Ok: Debug + Send,
    T::Error: TransportError,
{
    async fn send_message(&self, message: Message) -> MailResult<SendResult> {
        let timer = Timer::start("send_message");
        let start = Instant::now();
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(|id| strip_angle(id).to_string())
            .unwrap_or_default();
        let accepted = message.envelope().to().len();

        self.log_envelope(&message);

        match self.transport.send(message).await {
            Ok(response) => {
                let response = format!("{:?}", response);
                self.log_outcome(&response);
                self.metrics.record_send_success();
                timer.stop();
                tracing::info!(message_id = %message_id, recipients = accepted, "Email accepted by transport");
                Ok(SendResult {
                    message_id,
                    accepted,
                    response,
                    duration: start.elapsed(),
                })
            }
            Err(e) => {
                let error = e.into_mail_error();
                self.log_outcome(&error.to_string());
                self.metrics.record_send_failure();
                tracing::error!(message_id = %message_id, error = %error, "Email rejected by transport");
                Err(error)
            }
        }
    }

    async fn send(&self, email: &Email) -> MailResult<SendResult> {
        let message = match mime::to_message(email).await {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_send_failure();
                return Err(e);
            }
        };
        self.send_message(message).await
    }

    async fn test_connection(&self) -> MailResult<bool> {
        let reachable = self.transport.probe().await?;
        tracing::debug!(reachable, "Tested transport connection");
        Ok(reachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;
    use crate::mocks::test_email;

    #[tokio::test]
    async fn test_send_through_stub() {
        let transport = AsyncStubTransport::new_ok();
        let sender = GenericEmailSender::new(transport.clone());

        let mut email = test_email();
        email.cc.push("cc@example.com".parse().unwrap());
        let result = sender.send(&email).await.unwrap();

        assert!(!result.message_id.is_empty());
        assert_eq!(result.accepted, 2);
        assert_eq!(sender.metrics().snapshot().emails_sent, 1);

        let messages = transport.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Subject: Test Email"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let sender = GenericEmailSender::new(AsyncStubTransport::new_error());

        let err = sender.send(&test_email()).await.unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::PermanentRejection);
        assert_eq!(sender.metrics().snapshot().emails_failed, 1);
        assert!(!sender.try_send(&test_email()).await);
    }

    #[tokio::test]
    async fn test_invalid_email_never_reaches_transport() {
        let transport = AsyncStubTransport::new_ok();
        let sender = GenericEmailSender::new(transport.clone());

        let mut email = test_email();
        email.to = vec!["sender@example.com".parse().unwrap()];

        assert!(!sender.try_send(&email).await);
        assert!(transport.messages().await.is_empty());
        assert_eq!(sender.metrics().snapshot().emails_failed, 1);
    }

    #[tokio::test]
    async fn test_protocol_log_records_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smtp.log");
        let sender = GenericEmailSender::new(AsyncStubTransport::new_ok())
            .with_protocol_log(ProtocolLogger::open(&path).unwrap());

        assert!(sender.try_send(&test_email()).await);
        assert!(sender.test_connection().await.unwrap());

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("C: MAIL FROM:<sender@example.com>"));
        assert!(log.contains("C: RCPT TO:<recipient@example.com>"));
        assert!(log.contains("S: "));
    }

    #[tokio::test]
    async fn test_smtp_sender_from_options() {
        let options = EmailSenderOptions::builder()
            .smtp_host("localhost")
            .smtp_port(2525)
            .tls_mode(TlsMode::None)
            .credential("user", "pass")
            .hello_name("client.example.com")
            .build()
            .unwrap();

        let sender = SmtpSender::from_options(&options).unwrap();
        assert_eq!(sender.metrics().snapshot().emails_sent, 0);
    }
}
