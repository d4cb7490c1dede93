//! Folder monitoring over IMAP IDLE.
//!
//! [`MailFolderMonitor`] keeps a session idling on one folder and reports
//! messages that arrive in or leave it. Connection failures are retried with
//! backoff; the set of known UIDs survives reconnects, so mail delivered while
//! disconnected is still reported once the session is back.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::{EmailReceiverOptions, FolderMonitorOptions, SummaryItems};
use crate::errors::MailResult;
use crate::observability::MailMetrics;
use crate::receiver::{shutdown_requested, summarize, FetchItems, IdleEvent, ImapClientConnector, ImapConnector, ImapSession};
use crate::resilience::RetryExecutor;
use crate::types::MessageSummary;

/// Callback for arriving messages.
pub type ArrivalHandler = Arc<dyn Fn(MessageSummary) + Send + Sync>;

/// Callback for departed messages, given the UID.
pub type DepartureHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// What the monitor remembers between connections.
#[derive(Debug, Default)]
struct FolderState {
    uid_validity: Option<u32>,
    known: Option<BTreeSet<u32>>,
}

/// Stops a running monitor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Requests shutdown. IDLE is interrupted and the session logs out.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Watches a mail folder for arrivals and departures.
pub struct MailFolderMonitor {
    connector: Arc<dyn ImapConnector>,
    folder: String,
    options: FolderMonitorOptions,
    retry: RetryExecutor,
    on_arrival: Option<ArrivalHandler>,
    on_departure: Option<DepartureHandler>,
    metrics: Arc<MailMetrics>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for MailFolderMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailFolderMonitor")
            .field("folder", &self.folder)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MailFolderMonitor {
    /// Creates a monitor for the receiver's configured folder.
    pub fn new(receiver: EmailReceiverOptions, options: FolderMonitorOptions) -> MailResult<Self> {
        let folder = receiver.mail_folder_name.clone();
        let connector = ImapClientConnector::new(receiver)?;
        Self::with_connector(Arc::new(connector), folder, options)
    }

    /// Creates a monitor over any connector.
    pub fn with_connector(
        connector: Arc<dyn ImapConnector>,
        folder: impl Into<String>,
        options: FolderMonitorOptions,
    ) -> MailResult<Self> {
        options.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            connector,
            folder: folder.into(),
            retry: RetryExecutor::new(options.retry.clone()),
            options,
            on_arrival: None,
            on_departure: None,
            metrics: Arc::new(MailMetrics::new()),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Sets the arrival handler.
    pub fn on_message_arrival<F>(mut self, handler: F) -> Self
    where
        F: Fn(MessageSummary) + Send + Sync + 'static,
    {
        self.on_arrival = Some(Arc::new(handler));
        self
    }

    /// Sets the departure handler.
    pub fn on_message_departure<F>(mut self, handler: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_departure = Some(Arc::new(handler));
        self
    }

    /// Records metrics into a shared collector.
    pub fn with_metrics(mut self, metrics: Arc<MailMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the monitored folder.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Returns a handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown.clone(),
        }
    }

    /// Monitors the folder until shutdown.
    ///
    /// Returns `Ok` after a requested shutdown, or the error that ended
    /// monitoring: a non-retryable failure, or a retryable one after
    /// `max_retries` consecutive failed attempts.
    pub async fn run(&self) -> MailResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut state = FolderState::default();
        let mut failures = 0u32;

        tracing::info!(folder = %self.folder, idle_minutes = self.options.idle_minutes, "Starting folder monitor");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_watch(&mut state, &mut failures, &mut shutdown).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && failures < self.options.max_retries => {
                    failures += 1;
                    let delay = self.retry.delay_for_attempt(failures);
                    self.metrics.record_reconnect();
                    tracing::warn!(
                        folder = %self.folder,
                        attempt = failures,
                        max_retries = self.options.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Folder monitor lost connection, reconnecting"
                    );

                    let stopped = tokio::select! {
                        _ = sleep(delay) => false,
                        _ = shutdown_requested(&mut shutdown) => true,
                    };
                    if stopped {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(folder = %self.folder, error = %e, kind = ?e.kind(), "Folder monitor stopped");
                    return Err(e);
                }
            }
        }

        tracing::info!(folder = %self.folder, "Folder monitor stopped");
        Ok(())
    }

    async fn connect_and_watch(
        &self,
        state: &mut FolderState,
        failures: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> MailResult<()> {
        // One attempt per pass; run() owns the backoff
        let mut session = self.connector.connect_once().await?;
        let uid_validity = session.select(&self.folder).await?;
        *failures = 0;

        if state.known.is_some() && uid_validity != state.uid_validity {
            // Old UIDs mean nothing under a new UIDVALIDITY
            tracing::warn!(
                folder = %self.folder,
                previous = ?state.uid_validity,
                current = ?uid_validity,
                "UIDVALIDITY changed, taking a fresh snapshot"
            );
            state.known = Some(session.search("ALL").await?.into_iter().collect());
        }
        state.uid_validity = uid_validity;

        let result = self.watch(session.as_mut(), &mut state.known, shutdown).await;
        if result.is_ok() {
            if let Err(e) = session.logout().await {
                tracing::debug!(error = %e, "Logout after monitoring failed");
            }
        }
        result
    }

    async fn watch(
        &self,
        session: &mut dyn ImapSession,
        known: &mut Option<BTreeSet<u32>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> MailResult<()> {
        if known.is_none() {
            let existing: BTreeSet<u32> = session.search("ALL").await?.into_iter().collect();
            tracing::debug!(folder = %self.folder, existing = existing.len(), "Snapshot taken");
            if self.options.ignore_existing_mail_on_connect {
                *known = Some(existing);
            } else {
                *known = Some(BTreeSet::new());
            }
        }
        self.sync(session, known).await?;

        loop {
            match session.idle(self.options.idle_timeout(), shutdown).await? {
                IdleEvent::Shutdown => return Ok(()),
                IdleEvent::NewData => self.sync(session, known).await?,
                IdleEvent::Timeout => {
                    tracing::trace!(folder = %self.folder, "IDLE timed out, re-issuing");
                    self.sync(session, known).await?;
                }
            }
        }
    }

    /// Diffs the folder against `known` and reports the changes.
    async fn sync(&self, session: &mut dyn ImapSession, known: &mut Option<BTreeSet<u32>>) -> MailResult<()> {
        let current: BTreeSet<u32> = session.search("ALL").await?.into_iter().collect();
        let previous = known.take().unwrap_or_default();

        let arrived: Vec<u32> = current.difference(&previous).copied().collect();
        let departed: Vec<u32> = previous.difference(&current).copied().collect();

        let summaries = if arrived.is_empty() {
            Vec::new()
        } else {
            match self.fetch_arrivals(session, &arrived).await {
                Ok(summaries) => summaries,
                Err(e) => {
                    *known = Some(previous);
                    return Err(e);
                }
            }
        };
        *known = Some(current);

        for uid in departed {
            self.metrics.record_departure();
            tracing::debug!(folder = %self.folder, uid, "Message departed");
            if let Some(handler) = &self.on_departure {
                handler(uid);
            }
        }
        for summary in summaries {
            self.metrics.record_arrival();
            tracing::debug!(folder = %self.folder, uid = summary.uid, subject = ?summary.subject, "Message arrived");
            if let Some(handler) = &self.on_arrival {
                handler(summary);
            }
        }
        Ok(())
    }

    async fn fetch_arrivals(&self, session: &mut dyn ImapSession, uids: &[u32]) -> MailResult<Vec<MessageSummary>> {
        let items = match self.options.message_summary_items {
            SummaryItems::Envelope => FetchItems::Headers,
            SummaryItems::Full => FetchItems::Full,
        };

        let fetched = session.fetch(uids, items).await?;
        let mut summaries = Vec::with_capacity(fetched.len());
        for message in &fetched {
            match summarize(&self.folder, message) {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::warn!(uid = message.uid, error = %e, "Skipping unparseable arrival"),
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::errors::MailErrorKind;
    use crate::mocks::{raw_message, IdleStep, MockImapConnector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn options() -> FolderMonitorOptions {
        FolderMonitorOptions {
            max_retries: 2,
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    enum Event {
        Arrived(MessageSummary),
        Departed(u32),
    }

    fn monitor(connector: &MockImapConnector, options: FolderMonitorOptions) -> (MailFolderMonitor, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let departures = tx.clone();
        let monitor = MailFolderMonitor::with_connector(Arc::new(connector.clone()), "INBOX", options)
            .unwrap()
            .on_message_arrival(move |summary| {
                let _ = tx.send(Event::Arrived(summary));
            })
            .on_message_departure(move |uid| {
                let _ = departures.send(Event::Departed(uid));
            });
        (monitor, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_reports_arrivals_and_departures() {
        let connector = MockImapConnector::new();
        connector.deliver("INBOX", raw_message("Existing", "a@example.com"));
        connector.script_idle(IdleStep::Deliver {
            folder: "INBOX".to_string(),
            raw: raw_message("Fresh", "b@example.com"),
        });
        connector.script_idle(IdleStep::Remove {
            folder: "INBOX".to_string(),
            uid: 1,
        });

        let (monitor, mut rx) = monitor(&connector, options());
        let handle = monitor.shutdown_handle();
        let task = tokio::spawn(async move { monitor.run().await });

        match next(&mut rx).await {
            Event::Arrived(summary) => {
                assert_eq!(summary.uid, 2);
                assert_eq!(summary.subject.as_deref(), Some("Fresh"));
                assert!(summary.email.is_none());
            }
            Event::Departed(uid) => panic!("unexpected departure {}", uid),
        }
        assert!(matches!(next(&mut rx).await, Event::Departed(1)));

        handle.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert!(handle.is_shutdown());
        assert!(connector.commands().iter().any(|c| c == "LOGOUT"));
    }

    #[tokio::test]
    async fn test_existing_mail_reported_when_not_ignored() {
        let connector = MockImapConnector::new();
        connector.deliver("INBOX", raw_message("Old", "a@example.com"));

        let (monitor, mut rx) = monitor(
            &connector,
            FolderMonitorOptions {
                ignore_existing_mail_on_connect: false,
                message_summary_items: SummaryItems::Full,
                ..options()
            },
        );
        let handle = monitor.shutdown_handle();
        let task = tokio::spawn(async move { monitor.run().await });

        match next(&mut rx).await {
            Event::Arrived(summary) => {
                let email = summary.email.unwrap();
                assert_eq!(email.subject, "Old");
                assert!(email.body_text.unwrap().contains("Body of Old"));
            }
            Event::Departed(_) => panic!("unexpected departure"),
        }

        handle.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_and_keeps_snapshot() {
        let connector = MockImapConnector::new();
        connector.deliver("INBOX", raw_message("Existing", "a@example.com"));
        connector.script_idle(IdleStep::Disconnect);
        connector.script_idle(IdleStep::Deliver {
            folder: "INBOX".to_string(),
            raw: raw_message("After reconnect", "b@example.com"),
        });

        let metrics = Arc::new(MailMetrics::new());
        let (monitor, mut rx) = monitor(&connector, options());
        let monitor = monitor.with_metrics(metrics.clone());
        let handle = monitor.shutdown_handle();
        let task = tokio::spawn(async move { monitor.run().await });

        match next(&mut rx).await {
            Event::Arrived(summary) => assert_eq!(summary.uid, 2),
            Event::Departed(_) => panic!("unexpected departure"),
        }

        handle.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert_eq!(connector.connects(), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.arrivals, 1);
    }

    #[tokio::test]
    async fn test_uid_validity_change_takes_fresh_snapshot() {
        let connector = MockImapConnector::new();
        connector.deliver("INBOX", raw_message("Existing", "a@example.com"));
        connector.script_idle(IdleStep::Recreate {
            folder: "INBOX".to_string(),
        });
        connector.script_idle(IdleStep::Deliver {
            folder: "INBOX".to_string(),
            raw: raw_message("Renumbered", "b@example.com"),
        });

        let metrics = Arc::new(MailMetrics::new());
        let (monitor, mut rx) = monitor(&connector, options());
        let monitor = monitor.with_metrics(metrics.clone());
        let handle = monitor.shutdown_handle();
        let task = tokio::spawn(async move { monitor.run().await });

        // UID 1 is reused under the new UIDVALIDITY: a new message, not a departure
        match next(&mut rx).await {
            Event::Arrived(summary) => {
                assert_eq!(summary.uid, 1);
                assert_eq!(summary.subject.as_deref(), Some("Renumbered"));
            }
            Event::Departed(uid) => panic!("unexpected departure {}", uid),
        }

        handle.shutdown();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert_eq!(connector.uid_validity("INBOX"), Some(2));
        assert_eq!(connector.connects(), 2);
        assert_eq!(metrics.snapshot().departures, 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let connector = MockImapConnector::new();
        connector.fail_connects(10);

        let (monitor, _rx) = monitor(&connector, options());
        let err = timeout(Duration::from_secs(5), monitor.run()).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Connection);
        assert_eq!(connector.connects(), 0);
    }

    /// Counts which connect entry point the monitor uses.
    struct CountingConnector {
        inner: MockImapConnector,
        retrying: AtomicU32,
        single: AtomicU32,
    }

    #[async_trait]
    impl ImapConnector for CountingConnector {
        async fn connect(&self) -> MailResult<Box<dyn ImapSession>> {
            self.retrying.fetch_add(1, Ordering::SeqCst);
            self.inner.connect().await
        }

        async fn connect_once(&self) -> MailResult<Box<dyn ImapSession>> {
            self.single.fetch_add(1, Ordering::SeqCst);
            self.inner.connect().await
        }
    }

    #[tokio::test]
    async fn test_each_attempt_is_a_single_connect() {
        let inner = MockImapConnector::new();
        inner.fail_connects(10);
        let connector = Arc::new(CountingConnector {
            inner,
            retrying: AtomicU32::new(0),
            single: AtomicU32::new(0),
        });

        let monitor = MailFolderMonitor::with_connector(connector.clone(), "INBOX", options()).unwrap();
        assert!(timeout(Duration::from_secs(5), monitor.run()).await.unwrap().is_err());

        // First pass plus max_retries reconnects
        assert_eq!(connector.single.load(Ordering::SeqCst), 3);
        assert_eq!(connector.retrying.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let connector = MockImapConnector::new();
        let (monitor, _rx) = monitor(&connector, options());
        let monitor = MailFolderMonitor {
            folder: "Missing".to_string(),
            ..monitor
        };

        let err = timeout(Duration::from_secs(5), monitor.run()).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::FolderNotFound);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let connector = MockImapConnector::new();
        let (monitor, _rx) = monitor(&connector, options());

        monitor.shutdown_handle().shutdown();
        monitor.run().await.unwrap();
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn test_invalid_idle_minutes_rejected() {
        let result = MailFolderMonitor::with_connector(
            Arc::new(MockImapConnector::new()),
            "INBOX",
            FolderMonitorOptions {
                idle_minutes: 45,
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}
