//! Appsettings-style configuration file support.
//!
//! A settings document is a JSON object with up to four sections:
//!
//! ```json
//! {
//!   "EmailSender":   { "SmtpHost": "smtp.example.com", "SmtpPort": 587 },
//!   "EmailReceiver": { "ImapHost": "imap.example.com", "ImapCredential": { "UserName": "u", "Password": "p" } },
//!   "FolderMonitor": { "IdleMinutes": 9 },
//!   "Mailbox":       { "From": "me@example.com" }
//! }
//! ```
//!
//! Environment variables named `Section__Key__SubKey` override values from the
//! file, e.g. `EmailSender__SmtpCredential__Password`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{EmailOptions, EmailReceiverOptions, EmailSenderOptions, FolderMonitorOptions};
use crate::errors::{MailError, MailResult};

/// Separator between path segments in override keys.
const KEY_SEPARATOR: &str = "__";

/// Section names recognised in settings documents.
const SECTIONS: [&str; 4] = ["EmailSender", "EmailReceiver", "FolderMonitor", "Mailbox"];

/// All mail sections of an application settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MailSettings {
    /// `EmailSender` section.
    #[serde(default)]
    pub email_sender: Option<EmailSenderOptions>,
    /// `EmailReceiver` section.
    #[serde(default)]
    pub email_receiver: Option<EmailReceiverOptions>,
    /// `FolderMonitor` section.
    #[serde(default)]
    pub folder_monitor: Option<FolderMonitorOptions>,
    /// `Mailbox` section.
    #[serde(default)]
    pub mailbox: Option<EmailOptions>,
}

impl MailSettings {
    /// Parses settings from a JSON document.
    pub fn from_json_str(json: &str) -> MailResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Reads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> MailResult<Self> {
        let json = read_settings_file(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Reads settings from a JSON file, then applies process environment overrides.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> MailResult<Self> {
        let json = read_settings_file(path.as_ref())?;
        Self::from_json_with_overrides(&json, std::env::vars())
    }

    /// Parses settings from JSON, applying `Section__Key` overrides first.
    pub fn from_json_with_overrides<I, K, V>(json: &str, vars: I) -> MailResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut value: Value = serde_json::from_str(json)?;
        apply_overrides(&mut value, vars);
        Self::from_value(value)
    }

    /// Validates every present section.
    pub fn validate(&self) -> MailResult<()> {
        if let Some(sender) = &self.email_sender {
            sender.validate()?;
        }
        if let Some(receiver) = &self.email_receiver {
            receiver.validate()?;
        }
        if let Some(monitor) = &self.folder_monitor {
            monitor.validate()?;
        }
        Ok(())
    }

    fn from_value(value: Value) -> MailResult<Self> {
        let settings: MailSettings = serde_json::from_value(value)?;
        settings.validate()?;
        tracing::debug!(
            sender = settings.email_sender.is_some(),
            receiver = settings.email_receiver.is_some(),
            monitor = settings.folder_monitor.is_some(),
            mailbox = settings.mailbox.is_some(),
            "Loaded mail settings"
        );
        Ok(settings)
    }
}

fn read_settings_file(path: &Path) -> MailResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        MailError::configuration(format!("Cannot read settings file {}: {}", path.display(), e))
            .with_cause(e)
    })
}

/// Merges `Section__Key__SubKey=value` pairs into a settings document.
///
/// Keys outside the known sections are ignored. Values that parse as JSON
/// numbers or booleans are stored as such, everything else as a string.
pub fn apply_overrides<I, K, V>(document: &mut Value, vars: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    for (key, raw) in vars {
        let segments: Vec<&str> = key.as_ref().split(KEY_SEPARATOR).collect();
        if segments.len() < 2 || !SECTIONS.contains(&segments[0]) {
            continue;
        }
        if segments.iter().any(|s| s.is_empty()) {
            continue;
        }
        insert_path(document, &segments, coerce(raw.as_ref()));
    }
}

fn insert_path(node: &mut Value, path: &[&str], value: Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { return };

    match path {
        [leaf] => {
            map.insert(leaf.to_string(), value);
        }
        [head, rest @ ..] => {
            let child = map.entry(head.to_string()).or_insert(Value::Null);
            insert_path(child, rest, value);
        }
        [] => {}
    }
}

fn coerce(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SummaryItems, TlsMode};
    use std::io::Write;
    use std::time::Duration;

    const SETTINGS: &str = r#"{
        "EmailSender": {
            "SmtpHost": "smtp.example.com",
            "SmtpPort": 465,
            "SmtpCredential": { "UserName": "sender", "Password": "secret" },
            "ProtocolLog": "Logs/SmtpClient.txt"
        },
        "EmailReceiver": {
            "ImapHost": "imap.example.com",
            "ImapCredential": { "UserName": "reader", "Password": "secret" },
            "MailFolderName": "Archive",
            "Timeout": "45s"
        },
        "FolderMonitor": {
            "IdleMinutes": 5,
            "MessageSummaryItems": "Full"
        },
        "Mailbox": { "From": "me@example.com" },
        "Logging": { "LogLevel": { "Default": "Information" } }
    }"#;

    #[test]
    fn test_parse_all_sections() {
        let settings = MailSettings::from_json_str(SETTINGS).unwrap();

        let sender = settings.email_sender.unwrap();
        assert_eq!(sender.smtp_host, "smtp.example.com");
        assert_eq!(sender.effective_tls_mode(), TlsMode::Implicit);
        assert_eq!(sender.smtp_credential.unwrap().password(), "secret");
        assert_eq!(sender.protocol_log.unwrap().to_str(), Some("Logs/SmtpClient.txt"));

        let receiver = settings.email_receiver.unwrap();
        assert_eq!(receiver.mail_folder_name, "Archive");
        assert_eq!(receiver.timeout, Duration::from_secs(45));

        let monitor = settings.folder_monitor.unwrap();
        assert_eq!(monitor.idle_minutes, 5);
        assert_eq!(monitor.message_summary_items, SummaryItems::Full);
        assert!(monitor.ignore_existing_mail_on_connect);

        assert_eq!(settings.mailbox.unwrap().from.as_deref(), Some("me@example.com"));
    }

    #[test]
    fn test_missing_sections_are_none() {
        let settings = MailSettings::from_json_str("{}").unwrap();
        assert!(settings.email_sender.is_none());
        assert!(settings.email_receiver.is_none());
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let result = MailSettings::from_json_str(r#"{ "EmailSender": { "SmtpHost": "" } }"#);
        assert!(result.is_err());

        let result = MailSettings::from_json_str(r#"{ "FolderMonitor": { "IdleMinutes": 45 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars = vec![
            ("EmailSender__SmtpHost", "smtp.override.com"),
            ("EmailSender__SmtpPort", "2525"),
            ("EmailSender__SmtpCredential__Password", "from-env"),
            ("FolderMonitor__IgnoreExistingMailOnConnect", "false"),
            ("PATH", "/usr/bin"),
        ];
        let settings = MailSettings::from_json_with_overrides(SETTINGS, vars).unwrap();

        let sender = settings.email_sender.unwrap();
        assert_eq!(sender.smtp_host, "smtp.override.com");
        assert_eq!(sender.smtp_port, 2525);
        assert_eq!(sender.smtp_credential.unwrap().password(), "from-env");
        assert!(!settings.folder_monitor.unwrap().ignore_existing_mail_on_connect);
    }

    #[test]
    fn test_overrides_create_missing_sections() {
        let mut doc = serde_json::json!({});
        apply_overrides(&mut doc, [("Mailbox__From", "env@example.com"), ("Mailbox__", "ignored")]);
        assert_eq!(doc["Mailbox"]["From"], "env@example.com");
        assert_eq!(doc.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SETTINGS.as_bytes()).unwrap();

        let settings = MailSettings::from_file(file.path()).unwrap();
        assert!(settings.email_sender.is_some());

        let missing = MailSettings::from_file(file.path().with_extension("missing"));
        assert!(missing.is_err());
    }
}
