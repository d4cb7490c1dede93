//! Mock implementations for testing.
//!
//! [`RecordingSender`] stands in for an SMTP server and [`MockImapConnector`]
//! serves an in-memory mailbox, so writers, receivers and monitors can be
//! exercised without a network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::Message;
use tokio::sync::watch;

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::mime;
use crate::receiver::{shutdown_requested, FetchItems, FetchedMessage, IdleEvent, ImapConnector, ImapSession, DELETED, SEEN};
use crate::sender::EmailSender;
use crate::types::{Email, EmailContact, SendResult};

/// Sender that records emails instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Email>>,
    fail_next: Mutex<Option<MailError>>,
}

impl RecordingSender {
    /// Creates a new recording sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next send with `error`.
    pub fn fail_next_with(&self, error: MailError) -> &Self {
        *lock(&self.fail_next) = Some(error);
        self
    }

    /// Returns the emails sent so far.
    pub fn sent(&self) -> Vec<Email> {
        lock(&self.sent).clone()
    }

    /// Clears recorded emails.
    pub fn clear(&self) {
        lock(&self.sent).clear();
    }

    fn record(&self, email: Email, accepted: usize) -> MailResult<SendResult> {
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }
        let message_id = email
            .message_id
            .clone()
            .unwrap_or_else(|| mime::generate_message_id("localhost"));
        lock(&self.sent).push(email);
        Ok(SendResult {
            message_id,
            accepted,
            response: "250 OK".to_string(),
            duration: Duration::ZERO,
        })
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send_message(&self, message: Message) -> MailResult<SendResult> {
        let accepted = message.envelope().to().len();
        let email = mime::parse_email(&message.formatted())?;
        self.record(email, accepted)
    }

    async fn send(&self, email: &Email) -> MailResult<SendResult> {
        email.validate()?;
        self.record(email.clone(), email.recipient_count())
    }
}

/// Creates a valid test email.
pub fn test_email() -> Email {
    Email {
        from: Some(EmailContact {
            name: None,
            address: "sender@example.com".to_string(),
        }),
        to: vec![EmailContact {
            name: None,
            address: "recipient@example.com".to_string(),
        }],
        subject: "Test Email".to_string(),
        body_text: Some("This is a test email.".to_string()),
        ..Default::default()
    }
}

/// Creates a minimal raw RFC 5322 message.
pub fn raw_message(subject: &str, from: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: inbox@example.com\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{id}>\r\n\
         Date: Tue, 1 Oct 2024 10:00:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Body of {subject}\r\n",
        from = from,
        subject = subject,
        id = mime::generate_message_id("example.com"),
    )
    .into_bytes()
}

/// A scripted server-side event, consumed by one IDLE call.
#[derive(Debug)]
pub enum IdleStep {
    /// Deliver a message, then report new data.
    Deliver {
        /// Target folder.
        folder: String,
        /// Raw message.
        raw: Vec<u8>,
    },
    /// Remove a message, then report new data.
    Remove {
        /// Folder holding the message.
        folder: String,
        /// Message UID.
        uid: u32,
    },
    /// Recreate a folder empty with a new UIDVALIDITY, then drop the connection.
    Recreate {
        /// Folder to recreate.
        folder: String,
    },
    /// End IDLE on timeout.
    Timeout,
    /// Drop the connection.
    Disconnect,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: u32,
    flags: Vec<String>,
    raw: Vec<u8>,
}

#[derive(Debug)]
struct Folder {
    uid_validity: u32,
    next_uid: u32,
    messages: Vec<StoredMessage>,
}

impl Folder {
    fn new() -> Self {
        Self::with_validity(1)
    }

    fn with_validity(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            next_uid: 1,
            messages: Vec::new(),
        }
    }

    fn append(&mut self, raw: Vec<u8>, flags: Vec<String>) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;
        self.messages.push(StoredMessage { uid, flags, raw });
        uid
    }
}

#[derive(Debug)]
struct MockServer {
    folders: BTreeMap<String, Folder>,
    commands: Vec<String>,
    failures: VecDeque<MailError>,
    connect_failures: u32,
    connects: u32,
    idle_script: VecDeque<IdleStep>,
}

impl MockServer {
    fn folder(&mut self, name: &str) -> MailResult<&mut Folder> {
        self.folders
            .get_mut(name)
            .ok_or_else(|| MailError::new(MailErrorKind::FolderNotFound, format!("No such folder: {}", name)))
    }

    fn recreate(&mut self, name: &str) {
        let uid_validity = self.folders.get(name).map_or(1, |f| f.uid_validity + 1);
        self.folders.insert(name.to_string(), Folder::with_validity(uid_validity));
    }

    fn apply(&mut self, step: IdleStep) -> MailResult<IdleEvent> {
        match step {
            IdleStep::Deliver { folder, raw } => {
                self.folders.entry(folder).or_insert_with(Folder::new).append(raw, Vec::new());
                Ok(IdleEvent::NewData)
            }
            IdleStep::Remove { folder, uid } => {
                self.folder(&folder)?.messages.retain(|m| m.uid != uid);
                Ok(IdleEvent::NewData)
            }
            IdleStep::Recreate { folder } => {
                self.recreate(&folder);
                Err(MailError::disconnected())
            }
            IdleStep::Timeout => Ok(IdleEvent::Timeout),
            IdleStep::Disconnect => Err(MailError::disconnected()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory IMAP server handing out [`ImapSession`]s.
///
/// Clones share the same mailbox, so a test can keep one handle to seed and
/// inspect state while the code under test holds another.
#[derive(Debug, Clone)]
pub struct MockImapConnector {
    server: Arc<Mutex<MockServer>>,
}

impl Default for MockImapConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImapConnector {
    /// Creates a server with an empty INBOX.
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert("INBOX".to_string(), Folder::new());
        Self {
            server: Arc::new(Mutex::new(MockServer {
                folders,
                commands: Vec::new(),
                failures: VecDeque::new(),
                connect_failures: 0,
                connects: 0,
                idle_script: VecDeque::new(),
            })),
        }
    }

    fn server(&self) -> MutexGuard<'_, MockServer> {
        lock(&self.server)
    }

    /// Creates an empty folder.
    pub fn create_folder(&self, name: &str) -> &Self {
        self.server().folders.entry(name.to_string()).or_insert_with(Folder::new);
        self
    }

    /// Delivers a message and returns its UID.
    pub fn deliver(&self, folder: &str, raw: Vec<u8>) -> u32 {
        self.server()
            .folders
            .entry(folder.to_string())
            .or_insert_with(Folder::new)
            .append(raw, Vec::new())
    }

    /// Returns the UIDs in a folder.
    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.server()
            .folders
            .get(folder)
            .map(|f| f.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    /// Replaces a folder with an empty one under a new UIDVALIDITY.
    pub fn recreate_folder(&self, name: &str) -> &Self {
        self.server().recreate(name);
        self
    }

    /// Returns the UIDVALIDITY of a folder.
    pub fn uid_validity(&self, folder: &str) -> Option<u32> {
        self.server().folders.get(folder).map(|f| f.uid_validity)
    }

    /// Returns the flags of a message.
    pub fn flags(&self, folder: &str, uid: u32) -> Vec<String> {
        self.server()
            .folders
            .get(folder)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid))
            .map(|m| m.flags.clone())
            .unwrap_or_default()
    }

    /// Queues an event for the next IDLE call.
    pub fn script_idle(&self, step: IdleStep) -> &Self {
        self.server().idle_script.push_back(step);
        self
    }

    /// Fails the next session command with `error`.
    pub fn fail_next_command(&self, error: MailError) -> &Self {
        self.server().failures.push_back(error);
        self
    }

    /// Refuses the next `count` connection attempts.
    pub fn fail_connects(&self, count: u32) -> &Self {
        self.server().connect_failures = count;
        self
    }

    /// Returns the number of successful connects.
    pub fn connects(&self) -> u32 {
        self.server().connects
    }

    /// Returns the commands issued so far.
    pub fn commands(&self) -> Vec<String> {
        self.server().commands.clone()
    }
}

#[async_trait]
impl ImapConnector for MockImapConnector {
    async fn connect(&self) -> MailResult<Box<dyn ImapSession>> {
        let mut server = self.server();
        if server.connect_failures > 0 {
            server.connect_failures -= 1;
            return Err(MailError::connection("Connection refused"));
        }
        server.connects += 1;
        server.commands.push("LOGIN".to_string());
        Ok(Box::new(MockImapSession {
            server: self.server.clone(),
            selected: None,
            open: true,
        }))
    }
}

/// Session over a [`MockImapConnector`] mailbox.
#[derive(Debug)]
pub struct MockImapSession {
    server: Arc<Mutex<MockServer>>,
    selected: Option<String>,
    open: bool,
}

impl MockImapSession {
    /// Records `command` and returns the server, or a queued failure.
    fn begin(&mut self, command: String) -> MailResult<MutexGuard<'_, MockServer>> {
        if !self.open {
            return Err(MailError::disconnected());
        }
        let mut server = lock(&self.server);
        server.commands.push(command);
        if let Some(error) = server.failures.pop_front() {
            if error.is_retryable() {
                self.open = false;
            }
            return Err(error);
        }
        Ok(server)
    }

    fn selected(&self) -> MailResult<String> {
        self.selected
            .clone()
            .ok_or_else(|| MailError::protocol("No folder selected"))
    }
}

fn header_block(raw: &[u8]) -> Vec<u8> {
    match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => raw[..end + 4].to_vec(),
        None => raw.to_vec(),
    }
}

#[async_trait]
impl ImapSession for MockImapSession {
    async fn select(&mut self, folder: &str) -> MailResult<Option<u32>> {
        let mut server = self.begin(format!("SELECT {}", folder))?;
        let uid_validity = server.folder(folder)?.uid_validity;
        drop(server);
        self.selected = Some(folder.to_string());
        Ok(Some(uid_validity))
    }

    async fn list_folders(&mut self) -> MailResult<Vec<String>> {
        let server = self.begin("LIST".to_string())?;
        Ok(server.folders.keys().cloned().collect())
    }

    async fn search(&mut self, query: &str) -> MailResult<Vec<u32>> {
        let folder = self.selected()?;
        let mut server = self.begin(format!("UID SEARCH {}", query))?;
        let unseen = query.eq_ignore_ascii_case("UNSEEN");
        Ok(server
            .folder(&folder)?
            .messages
            .iter()
            .filter(|m| !unseen || !m.flags.iter().any(|f| f == SEEN))
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch(&mut self, uids: &[u32], items: FetchItems) -> MailResult<Vec<FetchedMessage>> {
        let folder = self.selected()?;
        let mut server = self.begin(format!("UID FETCH {:?} {}", uids, items.query()))?;
        Ok(server
            .folder(&folder)?
            .messages
            .iter()
            .filter(|m| uids.contains(&m.uid))
            .map(|m| FetchedMessage {
                uid: m.uid,
                flags: m.flags.clone(),
                size: Some(m.raw.len() as u32),
                internal_date: Some(Utc::now()),
                header: (items == FetchItems::Headers).then(|| header_block(&m.raw)),
                body: (items == FetchItems::Full).then(|| m.raw.clone()),
            })
            .collect())
    }

    async fn store(&mut self, uids: &[u32], command: &str) -> MailResult<()> {
        let folder = self.selected()?;
        let mut server = self.begin(format!("UID STORE {:?} {}", uids, command))?;
        let add = !command.starts_with('-');
        let flags: Vec<String> = command
            .split(['(', ')'])
            .nth(1)
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        for message in server.folder(&folder)?.messages.iter_mut().filter(|m| uids.contains(&m.uid)) {
            for flag in &flags {
                if add && !message.flags.contains(flag) {
                    message.flags.push(flag.clone());
                } else if !add {
                    message.flags.retain(|f| f != flag);
                }
            }
        }
        Ok(())
    }

    async fn move_to(&mut self, uids: &[u32], destination: &str) -> MailResult<()> {
        let folder = self.selected()?;
        let mut server = self.begin(format!("UID MOVE {:?} {}", uids, destination))?;
        server.folder(destination)?;

        let source = server.folder(&folder)?;
        let (moved, kept): (Vec<_>, Vec<_>) = source.messages.drain(..).partition(|m| uids.contains(&m.uid));
        source.messages = kept;

        let target = server.folder(destination)?;
        for message in moved {
            target.append(message.raw, message.flags);
        }
        Ok(())
    }

    async fn expunge(&mut self, uids: &[u32]) -> MailResult<()> {
        let folder = self.selected()?;
        let mut server = self.begin(format!("UID EXPUNGE {:?}", uids))?;
        server
            .folder(&folder)?
            .messages
            .retain(|m| !uids.contains(&m.uid) || !m.flags.iter().any(|f| f == DELETED));
        Ok(())
    }

    async fn idle(&mut self, _timeout: Duration, shutdown: &mut watch::Receiver<bool>) -> MailResult<IdleEvent> {
        let step = {
            let mut server = self.begin("IDLE".to_string())?;
            server.idle_script.pop_front()
        };

        match step {
            Some(step) => {
                let event = lock(&self.server).apply(step);
                if event.is_err() {
                    self.open = false;
                }
                event
            }
            None => {
                shutdown_requested(shutdown).await;
                Ok(IdleEvent::Shutdown)
            }
        }
    }

    async fn logout(&mut self) -> MailResult<()> {
        if self.open {
            lock(&self.server).commands.push("LOGOUT".to_string());
            self.open = false;
        }
        Ok(())
    }
}
