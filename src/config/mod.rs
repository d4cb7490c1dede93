//! Configuration types for the mail services.
//!
//! Provides option types with builders for:
//! - SMTP sender connection settings
//! - IMAP receiver connection settings
//! - Folder monitoring behavior
//! - Default mailbox envelope values
//! - Retry policies
//!
//! Field names serialize in PascalCase so the types can be read straight from
//! appsettings-style sections (see [`settings`]).

use std::path::PathBuf;
use std::time::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailResult};

pub mod settings;

pub use settings::MailSettings;

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Implicit TLS SMTP port.
pub const SMTPS_PORT: u16 = 465;

/// Default IMAP port (implicit TLS).
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Default timeout for network operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default folder read and monitored by the receiver.
pub const DEFAULT_FOLDER: &str = "INBOX";

/// Servers drop IDLE connections after 30 minutes (RFC 2177).
pub const MAX_IDLE_MINUTES: u64 = 29;

/// TLS mode for mail connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsMode {
    /// Pick by port: implicit TLS on the well-known TLS ports, STARTTLS otherwise.
    #[default]
    Auto,
    /// No TLS (insecure, not recommended).
    None,
    /// Opportunistic STARTTLS.
    StartTls,
    /// Required STARTTLS (fail if not supported).
    StartTlsRequired,
    /// Implicit TLS.
    Implicit,
}

impl TlsMode {
    /// Resolves [`TlsMode::Auto`] against the port in use.
    pub fn resolve(self, port: u16, implicit_port: u16) -> TlsMode {
        match self {
            TlsMode::Auto if port == implicit_port => TlsMode::Implicit,
            TlsMode::Auto => TlsMode::StartTls,
            other => other,
        }
    }
}

/// Username/password pair for SMTP or IMAP login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credential {
    /// Login name.
    pub user_name: String,
    /// Password (never serialized).
    #[serde(skip_serializing)]
    pub password: SecretString,
}

impl Credential {
    /// Creates a credential.
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Returns the password in clear text.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial retry delay.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum retry delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Enable jitter.
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Enable retries.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool { true }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_delay() -> Duration { Duration::from_secs(1) }
fn default_max_delay() -> Duration { Duration::from_secs(60) }
fn default_multiplier() -> f64 { 2.0 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: true,
            enabled: true,
        }
    }
}

impl RetryConfig {
    /// Validates the retry settings of `section`.
    pub fn validate(&self, section: &str) -> MailResult<()> {
        if self.max_attempts == 0 {
            return Err(MailError::configuration(format!(
                "{}.Retry.MaxAttempts must be at least 1",
                section
            )));
        }
        if self.multiplier < 1.0 {
            return Err(MailError::configuration(format!(
                "{}.Retry.Multiplier must be at least 1",
                section
            )));
        }
        Ok(())
    }
}

/// SMTP connection pool configuration, handed to lettre's pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long an idle connection is kept.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
}

fn default_max_connections() -> u32 { 5 }
fn default_idle_timeout() -> Duration { Duration::from_secs(60) }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Options for the SMTP sender (`EmailSender` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailSenderOptions {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Login credential, if the server requires authentication.
    #[serde(default)]
    pub smtp_credential: Option<Credential>,
    /// Transport security.
    #[serde(default)]
    pub tls_mode: TlsMode,
    /// File that receives the SMTP transaction log.
    #[serde(default)]
    pub protocol_log: Option<PathBuf>,
    /// Network timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Name announced in EHLO (defaults to the local hostname).
    #[serde(default)]
    pub hello_name: Option<String>,
    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_smtp_port() -> u16 { DEFAULT_SMTP_PORT }
fn default_imap_port() -> u16 { DEFAULT_IMAP_PORT }
fn default_timeout() -> Duration { DEFAULT_TIMEOUT }
fn default_folder() -> String { DEFAULT_FOLDER.to_string() }

impl EmailSenderOptions {
    /// Creates a new options builder.
    pub fn builder() -> EmailSenderOptionsBuilder {
        EmailSenderOptionsBuilder::default()
    }

    /// Validates the options.
    pub fn validate(&self) -> MailResult<()> {
        if self.smtp_host.trim().is_empty() {
            return Err(MailError::configuration("SmtpHost is required"));
        }
        if self.smtp_port == 0 {
            return Err(MailError::configuration("SmtpPort must be non-zero"));
        }
        if self.pool.max_connections == 0 {
            return Err(MailError::configuration("Pool.MaxConnections must be positive"));
        }
        if let Some(credential) = &self.smtp_credential {
            if credential.user_name.is_empty() {
                return Err(MailError::configuration("SmtpCredential.UserName is required"));
            }
        }
        Ok(())
    }

    /// Returns the TLS mode with `Auto` resolved against the SMTP port.
    pub fn effective_tls_mode(&self) -> TlsMode {
        self.tls_mode.resolve(self.smtp_port, SMTPS_PORT)
    }
}

/// Builder for [`EmailSenderOptions`].
#[derive(Debug, Default)]
pub struct EmailSenderOptionsBuilder {
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_credential: Option<Credential>,
    tls_mode: TlsMode,
    protocol_log: Option<PathBuf>,
    timeout: Option<Duration>,
    hello_name: Option<String>,
    pool: PoolConfig,
}

impl EmailSenderOptionsBuilder {
    /// Sets the SMTP server host.
    pub fn smtp_host(mut self, host: impl Into<String>) -> Self {
        self.smtp_host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn smtp_port(mut self, port: u16) -> Self {
        self.smtp_port = Some(port);
        self
    }

    /// Sets the login credential.
    pub fn credential(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.smtp_credential = Some(Credential::new(user_name, password));
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Writes the SMTP transaction log to `path`.
    pub fn protocol_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.protocol_log = Some(path.into());
        self
    }

    /// Sets the network timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the EHLO name.
    pub fn hello_name(mut self, name: impl Into<String>) -> Self {
        self.hello_name = Some(name.into());
        self
    }

    /// Sets pool configuration.
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Builds and validates the options.
    pub fn build(self) -> MailResult<EmailSenderOptions> {
        let options = EmailSenderOptions {
            smtp_host: self.smtp_host.ok_or_else(|| MailError::configuration("SmtpHost is required"))?,
            smtp_port: self.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            smtp_credential: self.smtp_credential,
            tls_mode: self.tls_mode,
            protocol_log: self.protocol_log,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            hello_name: self.hello_name,
            pool: self.pool,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Options for the IMAP receiver (`EmailReceiver` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailReceiverOptions {
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port.
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// Login credential.
    pub imap_credential: Credential,
    /// Transport security.
    #[serde(default)]
    pub tls_mode: TlsMode,
    /// Folder to read and monitor.
    #[serde(default = "default_folder")]
    pub mail_folder_name: String,
    /// File that receives the raw IMAP conversation.
    #[serde(default)]
    pub protocol_log: Option<PathBuf>,
    /// Network timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Connect retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl EmailReceiverOptions {
    /// Creates a new options builder.
    pub fn builder() -> EmailReceiverOptionsBuilder {
        EmailReceiverOptionsBuilder::default()
    }

    /// Validates the options.
    pub fn validate(&self) -> MailResult<()> {
        if self.imap_host.trim().is_empty() {
            return Err(MailError::configuration("ImapHost is required"));
        }
        if self.imap_port == 0 {
            return Err(MailError::configuration("ImapPort must be non-zero"));
        }
        if self.imap_credential.user_name.is_empty() {
            return Err(MailError::configuration("ImapCredential.UserName is required"));
        }
        if self.mail_folder_name.trim().is_empty() {
            return Err(MailError::configuration("MailFolderName cannot be empty"));
        }
        self.retry.validate("EmailReceiver")
    }

    /// Returns the TLS mode with `Auto` resolved against the IMAP port.
    pub fn effective_tls_mode(&self) -> TlsMode {
        self.tls_mode.resolve(self.imap_port, DEFAULT_IMAP_PORT)
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.imap_host, self.imap_port)
    }
}

/// Builder for [`EmailReceiverOptions`].
#[derive(Debug, Default)]
pub struct EmailReceiverOptionsBuilder {
    imap_host: Option<String>,
    imap_port: Option<u16>,
    imap_credential: Option<Credential>,
    tls_mode: TlsMode,
    mail_folder_name: Option<String>,
    protocol_log: Option<PathBuf>,
    timeout: Option<Duration>,
    retry: RetryConfig,
}

impl EmailReceiverOptionsBuilder {
    /// Sets the IMAP server host.
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets the login credential.
    pub fn credential(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.imap_credential = Some(Credential::new(user_name, password));
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Sets the folder to read and monitor.
    pub fn mail_folder_name(mut self, folder: impl Into<String>) -> Self {
        self.mail_folder_name = Some(folder.into());
        self
    }

    /// Writes the IMAP conversation to `path`.
    pub fn protocol_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.protocol_log = Some(path.into());
        self
    }

    /// Sets the network timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect retry policy.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Builds and validates the options.
    pub fn build(self) -> MailResult<EmailReceiverOptions> {
        let options = EmailReceiverOptions {
            imap_host: self.imap_host.ok_or_else(|| MailError::configuration("ImapHost is required"))?,
            imap_port: self.imap_port.unwrap_or(DEFAULT_IMAP_PORT),
            imap_credential: self
                .imap_credential
                .ok_or_else(|| MailError::configuration("ImapCredential is required"))?,
            tls_mode: self.tls_mode,
            mail_folder_name: self.mail_folder_name.unwrap_or_else(default_folder),
            protocol_log: self.protocol_log,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry: self.retry,
        };
        options.validate()?;
        Ok(options)
    }
}

/// What the monitor fetches for each arriving message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SummaryItems {
    /// Flags, size and headers only.
    #[default]
    Envelope,
    /// The complete message, parsed into an [`Email`](crate::types::Email).
    Full,
}

/// Options for the folder monitor (`FolderMonitor` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FolderMonitorOptions {
    /// Minutes to stay in IDLE before re-issuing it.
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: u64,
    /// Consecutive connection failures tolerated before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Skip messages already in the folder when monitoring starts.
    #[serde(default = "default_true")]
    pub ignore_existing_mail_on_connect: bool,
    /// Fetch depth for arriving messages.
    #[serde(default)]
    pub message_summary_items: SummaryItems,
    /// Reconnect backoff.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_idle_minutes() -> u64 { 9 }
fn default_max_retries() -> u32 { 3 }

impl Default for FolderMonitorOptions {
    fn default() -> Self {
        Self {
            idle_minutes: default_idle_minutes(),
            max_retries: default_max_retries(),
            ignore_existing_mail_on_connect: true,
            message_summary_items: SummaryItems::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl FolderMonitorOptions {
    /// Validates the options.
    pub fn validate(&self) -> MailResult<()> {
        if self.idle_minutes == 0 || self.idle_minutes > MAX_IDLE_MINUTES {
            return Err(MailError::configuration(format!(
                "IdleMinutes must be between 1 and {}",
                MAX_IDLE_MINUTES
            )));
        }
        self.retry.validate("FolderMonitor")
    }

    /// Returns the IDLE timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_minutes * 60)
    }
}

/// Default envelope values for new emails (`Mailbox` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailOptions {
    /// Default sender.
    #[serde(default)]
    pub from: Option<String>,
    /// Default primary recipients (`;` or `,` separated).
    #[serde(default)]
    pub to: Option<String>,
    /// Default CC recipients.
    #[serde(default)]
    pub cc: Option<String>,
    /// Default BCC recipients.
    #[serde(default)]
    pub bcc: Option<String>,
    /// Default reply-to address.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Prefix added to every subject.
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;

    #[test]
    fn test_sender_options_builder() {
        let options = EmailSenderOptions::builder()
            .smtp_host("smtp.example.com")
            .smtp_port(465)
            .credential("user", "pass")
            .build()
            .unwrap();

        assert_eq!(options.smtp_host, "smtp.example.com");
        assert_eq!(options.smtp_port, 465);
        assert_eq!(options.effective_tls_mode(), TlsMode::Implicit);
        assert_eq!(options.smtp_credential.unwrap().password(), "pass");
    }

    #[test]
    fn test_sender_options_defaults() {
        let options = EmailSenderOptions::builder()
            .smtp_host("smtp.example.com")
            .build()
            .unwrap();

        assert_eq!(options.smtp_port, DEFAULT_SMTP_PORT);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert_eq!(options.effective_tls_mode(), TlsMode::StartTls);
        assert!(options.smtp_credential.is_none());
    }

    #[test]
    fn test_sender_options_validation() {
        assert!(EmailSenderOptions::builder().build().is_err());
        assert!(EmailSenderOptions::builder().smtp_host("  ").build().is_err());
        assert!(EmailSenderOptions::builder()
            .smtp_host("smtp.example.com")
            .pool(PoolConfig { max_connections: 0, ..Default::default() })
            .build()
            .is_err());
    }

    #[test]
    fn test_receiver_options_builder() {
        let options = EmailReceiverOptions::builder()
            .imap_host("imap.example.com")
            .credential("user", "pass")
            .build()
            .unwrap();

        assert_eq!(options.imap_port, DEFAULT_IMAP_PORT);
        assert_eq!(options.mail_folder_name, "INBOX");
        assert_eq!(options.effective_tls_mode(), TlsMode::Implicit);
        assert_eq!(options.address(), "imap.example.com:993");

        // Credential is mandatory for IMAP
        assert!(EmailReceiverOptions::builder().imap_host("imap.example.com").build().is_err());
    }

    #[test]
    fn test_explicit_tls_mode_is_kept() {
        assert_eq!(TlsMode::None.resolve(993, DEFAULT_IMAP_PORT), TlsMode::None);
        assert_eq!(TlsMode::StartTlsRequired.resolve(465, SMTPS_PORT), TlsMode::StartTlsRequired);
        assert_eq!(TlsMode::Auto.resolve(143, DEFAULT_IMAP_PORT), TlsMode::StartTls);
    }

    #[test]
    fn test_monitor_options() {
        let options = FolderMonitorOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.idle_timeout(), Duration::from_secs(9 * 60));

        let options = FolderMonitorOptions { idle_minutes: 30, ..Default::default() };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let zero = RetryConfig { max_attempts: 0, ..Default::default() };

        let err = EmailReceiverOptions::builder()
            .imap_host("imap.example.com")
            .credential("user", "pass")
            .retry(zero.clone())
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Configuration);
        assert!(err.message().contains("EmailReceiver.Retry.MaxAttempts"));

        let options = FolderMonitorOptions { retry: zero, ..Default::default() };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let credential = Credential::new("user", "hunter2");
        let json = serde_json::to_string(&credential).unwrap();
        assert!(json.contains("UserName"));
        assert!(!json.contains("hunter2"));
    }
}
