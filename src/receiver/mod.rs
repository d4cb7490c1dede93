//! IMAP receiver.
//!
//! [`ImapReceiver`] reads mail and manages folders through one cached
//! session. Sessions come from an [`ImapConnector`]; the production connector
//! is [`ImapClientConnector`] (async-imap over tokio-rustls).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};

use crate::config::EmailReceiverOptions;
use crate::errors::{MailError, MailResult};
use crate::mime;
use crate::observability::{MailMetrics, Timer};
use crate::types::{Email, MessageSummary};

mod session;

pub use session::{ImapClientConnector, ImapStream, LoggedStream};

/// IMAP flag marking a message as read.
pub const SEEN: &str = "\\Seen";

/// IMAP flag marking a message for removal.
pub const DELETED: &str = "\\Deleted";

/// What to fetch for each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItems {
    /// Flags, size, arrival date and the header block.
    Headers,
    /// Flags, size, arrival date and the whole message.
    Full,
}

impl FetchItems {
    /// Returns the IMAP fetch attribute list. Bodies are peeked so `\Seen` is untouched.
    pub fn query(&self) -> &'static str {
        match self {
            FetchItems::Headers => "(UID FLAGS RFC822.SIZE INTERNALDATE BODY.PEEK[HEADER])",
            FetchItems::Full => "(UID FLAGS RFC822.SIZE INTERNALDATE BODY.PEEK[])",
        }
    }
}

/// One message as returned by a UID FETCH.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedMessage {
    /// Message UID.
    pub uid: u32,
    /// Flags.
    pub flags: Vec<String>,
    /// RFC 822 size.
    pub size: Option<u32>,
    /// Server arrival time.
    pub internal_date: Option<DateTime<Utc>>,
    /// Header block, for [`FetchItems::Headers`].
    pub header: Option<Vec<u8>>,
    /// Whole message, for [`FetchItems::Full`].
    pub body: Option<Vec<u8>>,
}

/// Why an IDLE wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// The server reported a change in the selected folder.
    NewData,
    /// The IDLE timeout elapsed.
    Timeout,
    /// Shutdown was requested.
    Shutdown,
}

/// An authenticated IMAP session.
#[async_trait]
pub trait ImapSession: Send {
    /// Selects a folder, returning its UIDVALIDITY when the server reports one.
    async fn select(&mut self, folder: &str) -> MailResult<Option<u32>>;

    /// Lists all folder names.
    async fn list_folders(&mut self) -> MailResult<Vec<String>>;

    /// Runs UID SEARCH, returning UIDs in ascending order.
    async fn search(&mut self, query: &str) -> MailResult<Vec<u32>>;

    /// Runs UID FETCH.
    async fn fetch(&mut self, uids: &[u32], items: FetchItems) -> MailResult<Vec<FetchedMessage>>;

    /// Runs UID STORE with a store command such as `+FLAGS.SILENT (\Seen)`.
    async fn store(&mut self, uids: &[u32], command: &str) -> MailResult<()>;

    /// Moves messages to another folder.
    async fn move_to(&mut self, uids: &[u32], folder: &str) -> MailResult<()>;

    /// Expunges `uids` if they are flagged `\Deleted`.
    ///
    /// Other deleted messages in the folder are left alone when the server
    /// supports UIDPLUS; without it only a folder-wide EXPUNGE is possible.
    async fn expunge(&mut self, uids: &[u32]) -> MailResult<()>;

    /// Waits in IDLE until the server reports a change, `timeout` elapses or
    /// `shutdown` turns true.
    async fn idle(&mut self, timeout: Duration, shutdown: &mut watch::Receiver<bool>) -> MailResult<IdleEvent>;

    /// Logs out.
    async fn logout(&mut self) -> MailResult<()>;
}

/// Opens authenticated sessions.
#[async_trait]
pub trait ImapConnector: Send + Sync {
    /// Connects and logs in, retrying connection failures.
    async fn connect(&self) -> MailResult<Box<dyn ImapSession>>;

    /// Connects and logs in with a single attempt.
    async fn connect_once(&self) -> MailResult<Box<dyn ImapSession>> {
        self.connect().await
    }
}

/// Resolves once `shutdown` is true or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Compresses UIDs into an IMAP sequence set, e.g. `[1, 2, 3, 7]` to `1:3,7`.
pub fn uid_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut end) = (first, first);
    for uid in iter {
        if uid == end + 1 {
            end = uid;
            continue;
        }
        ranges.push(format_range(start, end));
        start = uid;
        end = uid;
    }
    ranges.push(format_range(start, end));
    ranges.join(",")
}

fn format_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    }
}

/// Formats flags as an IMAP parenthesized list.
fn flag_list(flags: &[&str]) -> String {
    format!("({})", flags.join(" "))
}

/// Turns a fetch result into a summary, parsing the full message when present.
pub fn summarize(folder: &str, fetched: &FetchedMessage) -> MailResult<MessageSummary> {
    let mut summary = match (&fetched.body, &fetched.header) {
        (Some(body), _) => {
            let email = mime::parse_email(body)?;
            MessageSummary {
                uid: fetched.uid,
                folder: folder.to_string(),
                message_id: email.message_id.clone(),
                subject: Some(email.subject.clone()),
                from: email.from.iter().cloned().collect(),
                to: email.to.clone(),
                cc: email.cc.clone(),
                date: email.date,
                email: Some(email),
                ..Default::default()
            }
        }
        (None, Some(header)) => mime::summary_from_headers(fetched.uid, folder, header)?,
        (None, None) => MessageSummary {
            uid: fetched.uid,
            folder: folder.to_string(),
            ..Default::default()
        },
    };

    summary.flags = fetched.flags.clone();
    summary.size = fetched.size;
    summary.internal_date = fetched.internal_date;
    Ok(summary)
}

/// Reads mail and manages folders on an IMAP server.
pub struct ImapReceiver {
    connector: Arc<dyn ImapConnector>,
    default_folder: String,
    session: Mutex<Option<Box<dyn ImapSession>>>,
    metrics: Arc<MailMetrics>,
}

impl std::fmt::Debug for ImapReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapReceiver")
            .field("default_folder", &self.default_folder)
            .finish_non_exhaustive()
    }
}

impl ImapReceiver {
    /// Creates a receiver that connects with async-imap.
    pub fn new(options: EmailReceiverOptions) -> MailResult<Self> {
        let folder = options.mail_folder_name.clone();
        let connector = ImapClientConnector::new(options)?;
        Ok(Self::with_connector(Arc::new(connector), folder))
    }

    /// Creates a receiver over any connector.
    pub fn with_connector(connector: Arc<dyn ImapConnector>, default_folder: impl Into<String>) -> Self {
        Self {
            connector,
            default_folder: default_folder.into(),
            session: Mutex::new(None),
            metrics: Arc::new(MailMetrics::new()),
        }
    }

    /// Records metrics into a shared collector.
    pub fn with_metrics(mut self, metrics: Arc<MailMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the folder read when none is given.
    pub fn default_folder(&self) -> &str {
        &self.default_folder
    }

    /// Returns the connector.
    pub fn connector(&self) -> &Arc<dyn ImapConnector> {
        &self.connector
    }

    /// Starts a mail query against the default folder.
    pub fn read_mail(&self) -> MailReader<'_> {
        MailReader {
            receiver: self,
            folder: self.default_folder.clone(),
            skip: 0,
            take: None,
            unread_only: false,
            mark_as_read: false,
        }
    }

    /// Lists all folder names.
    pub async fn get_folder_names(&self) -> MailResult<Vec<String>> {
        let mut guard = self.session().await?;
        let result = active(&mut guard)?.list_folders().await;
        settle(&mut guard, result)
    }

    /// Adds flags to messages.
    pub async fn add_flags(&self, folder: &str, uids: &[u32], flags: &[&str]) -> MailResult<()> {
        self.store(folder, uids, &format!("+FLAGS.SILENT {}", flag_list(flags))).await
    }

    /// Removes flags from messages.
    pub async fn remove_flags(&self, folder: &str, uids: &[u32], flags: &[&str]) -> MailResult<()> {
        self.store(folder, uids, &format!("-FLAGS.SILENT {}", flag_list(flags))).await
    }

    /// Moves messages to `destination`.
    pub async fn move_to(&self, folder: &str, uids: &[u32], destination: &str) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut guard = self.session().await?;
        let session = active(&mut guard)?;
        let result = async {
            session.select(folder).await?;
            session.move_to(uids, destination).await
        }
        .await;
        tracing::debug!(folder, destination, count = uids.len(), ok = result.is_ok(), "Moved messages");
        settle(&mut guard, result)
    }

    /// Flags messages `\Deleted` and expunges the folder.
    pub async fn delete(&self, folder: &str, uids: &[u32]) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut guard = self.session().await?;
        let session = active(&mut guard)?;
        let result = async {
            session.select(folder).await?;
            session.store(uids, &format!("+FLAGS.SILENT {}", flag_list(&[DELETED]))).await?;
            session.expunge(uids).await
        }
        .await;
        tracing::debug!(folder, count = uids.len(), ok = result.is_ok(), "Deleted messages");
        settle(&mut guard, result)
    }

    /// Logs out and drops the cached session.
    pub async fn disconnect(&self) -> MailResult<()> {
        let mut guard = self.session.lock().await;
        match guard.take() {
            Some(mut session) => {
                tracing::debug!("Logging out of IMAP session");
                session.logout().await
            }
            None => Ok(()),
        }
    }

    async fn store(&self, folder: &str, uids: &[u32], command: &str) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut guard = self.session().await?;
        let session = active(&mut guard)?;
        let result = async {
            session.select(folder).await?;
            session.store(uids, command).await
        }
        .await;
        settle(&mut guard, result)
    }

    async fn session(&self) -> MailResult<tokio::sync::MutexGuard<'_, Option<Box<dyn ImapSession>>>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connector.connect().await?);
            tracing::debug!("Opened IMAP session");
        }
        Ok(guard)
    }

    async fn query(&self, query: &MailReader<'_>, items: FetchItems) -> MailResult<Vec<MessageSummary>> {
        let timer = Timer::start("imap_query");
        let mut guard = match self.session().await {
            Ok(guard) => guard,
            Err(e) => {
                self.metrics.record_receive_failure();
                return Err(e);
            }
        };
        let session = active(&mut guard)?;

        let result = async {
            session.select(&query.folder).await?;
            let uids = session
                .search(if query.unread_only { "UNSEEN" } else { "ALL" })
                .await?;
            let selected: Vec<u32> = uids
                .into_iter()
                .skip(query.skip)
                .take(query.take.unwrap_or(usize::MAX))
                .collect();
            if selected.is_empty() {
                return Ok(Vec::new());
            }

            let fetched = session.fetch(&selected, items).await?;
            if query.mark_as_read {
                session.store(&selected, &format!("+FLAGS.SILENT {}", flag_list(&[SEEN]))).await?;
            }

            let mut summaries = Vec::with_capacity(fetched.len());
            for message in &fetched {
                match summarize(&query.folder, message) {
                    Ok(mut summary) => {
                        if query.mark_as_read && !summary.is_seen() {
                            summary.flags.push(SEEN.to_string());
                        }
                        summaries.push(summary);
                    }
                    Err(e) => tracing::warn!(uid = message.uid, error = %e, "Skipping unparseable message"),
                }
            }
            Ok::<_, MailError>(summaries)
        }
        .await;

        match &result {
            Ok(summaries) => {
                self.metrics.record_received(summaries.len());
                tracing::debug!(
                    folder = %query.folder,
                    count = summaries.len(),
                    duration_ms = timer.stop().as_millis() as u64,
                    "Read mail"
                );
            }
            Err(_) => self.metrics.record_receive_failure(),
        }
        settle(&mut guard, result)
    }
}

fn active<'g>(guard: &'g mut Option<Box<dyn ImapSession>>) -> MailResult<&'g mut Box<dyn ImapSession>> {
    guard.as_mut().ok_or_else(MailError::disconnected)
}

/// Drops the cached session after a connection-class failure so the next call reconnects.
fn settle<T>(guard: &mut Option<Box<dyn ImapSession>>, result: MailResult<T>) -> MailResult<T> {
    if let Err(e) = &result {
        if e.is_retryable() && guard.take().is_some() {
            tracing::warn!(error = %e, "Dropping IMAP session after failure");
        }
    }
    result
}

/// Query builder returned by [`ImapReceiver::read_mail`].
///
/// Messages are ordered by UID, oldest first; `skip` and `take` page through
/// that order.
#[derive(Debug)]
pub struct MailReader<'r> {
    receiver: &'r ImapReceiver,
    folder: String,
    skip: usize,
    take: Option<usize>,
    unread_only: bool,
    mark_as_read: bool,
}

impl<'r> MailReader<'r> {
    /// Reads from `folder` instead of the default folder.
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Skips the first `count` messages.
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    /// Returns at most `count` messages.
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Only returns messages without `\Seen`.
    pub fn unread_only(mut self) -> Self {
        self.unread_only = true;
        self
    }

    /// Flags returned messages `\Seen`.
    pub fn mark_as_read(mut self, mark: bool) -> Self {
        self.mark_as_read = mark;
        self
    }

    /// Fetches header summaries.
    pub async fn get_message_summaries(&self) -> MailResult<Vec<MessageSummary>> {
        self.receiver.query(self, FetchItems::Headers).await
    }

    /// Fetches and parses whole messages.
    pub async fn get_emails(&self) -> MailResult<Vec<Email>> {
        let summaries = self.receiver.query(self, FetchItems::Full).await?;
        Ok(summaries.into_iter().filter_map(|s| s.email).collect())
    }

    /// Like [`get_emails`](Self::get_emails), logging failures and returning `None`.
    pub async fn try_get_emails(&self) -> Option<Vec<Email>> {
        match self.get_emails().await {
            Ok(emails) => Some(emails),
            Err(e) => {
                tracing::warn!(folder = %self.folder, error = %e, kind = ?e.kind(), "Failed to read mail");
                None
            }
        }
    }
}
