//! async-imap backed sessions.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use super::{shutdown_requested, uid_set, FetchItems, FetchedMessage, IdleEvent, ImapConnector, ImapSession, DELETED};
use crate::config::{EmailReceiverOptions, TlsMode};
use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::observability::ProtocolLogger;
use crate::resilience::RetryExecutor;

type ImapClient = Client<LoggedStream<ImapStream>>;
type ImapClientSession = Session<LoggedStream<ImapStream>>;

/// Stream type that can be plain TCP or TLS.
#[derive(Debug)]
pub enum ImapStream {
    /// Unencrypted TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ImapStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ImapStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ImapStream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ImapStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ImapStream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ImapStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ImapStream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ImapStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ImapStream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// Stream wrapper that copies complete protocol lines to a [`ProtocolLogger`].
///
/// Client lines are prefixed `C: `, server lines `S: `. LOGIN passwords are
/// masked.
#[derive(Debug)]
pub struct LoggedStream<S> {
    inner: S,
    log: Option<ProtocolLogger>,
    client_line: Vec<u8>,
    server_line: Vec<u8>,
}

impl<S> LoggedStream<S> {
    /// Wraps a stream. With no logger this is a plain pass-through.
    pub fn new(inner: S, log: Option<ProtocolLogger>) -> Self {
        Self {
            inner,
            log,
            client_line: Vec::new(),
            server_line: Vec::new(),
        }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn record(&mut self, from_client: bool, data: &[u8]) {
        let Some(log) = &self.log else { return };
        let pending = if from_client { &mut self.client_line } else { &mut self.server_line };
        pending.extend_from_slice(data);

        while let Some(end) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if from_client {
                log.log("C: ", &redact_line(text));
            } else {
                log.log("S: ", text);
            }
        }
    }
}

/// Masks the password argument of a LOGIN command.
pub(crate) fn redact_line(line: &str) -> String {
    let mut parts = line.splitn(4, ' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(command), Some(user), Some(_)) if command.eq_ignore_ascii_case("LOGIN") => {
            format!("{} {} {} ****", tag, command, user)
        }
        _ => line.to_string(),
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for LoggedStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.record(false, &buf.filled()[before..]);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LoggedStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            this.record(true, &buf[..*written]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Connects to an IMAP server with async-imap.
pub struct ImapClientConnector {
    options: EmailReceiverOptions,
    protocol_log: Option<ProtocolLogger>,
    retry: RetryExecutor,
}

impl fmt::Debug for ImapClientConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapClientConnector")
            .field("address", &self.options.address())
            .field("tls_mode", &self.options.effective_tls_mode())
            .field("user", &self.options.imap_credential.user_name)
            .finish()
    }
}

impl ImapClientConnector {
    /// Creates a connector, opening the protocol log when one is configured.
    pub fn new(options: EmailReceiverOptions) -> MailResult<Self> {
        options.validate()?;
        let protocol_log = match &options.protocol_log {
            Some(path) => Some(ProtocolLogger::open(path)?),
            None => None,
        };
        let retry = RetryExecutor::new(options.retry.clone());
        Ok(Self {
            options,
            protocol_log,
            retry,
        })
    }

    /// Returns the receiver options.
    pub fn options(&self) -> &EmailReceiverOptions {
        &self.options
    }

    async fn open_session(&self) -> MailResult<ClientSession> {
        let address = self.options.address();
        let host = self.options.imap_host.as_str();

        let tcp = timeout(self.options.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| MailError::timeout(format!("Connect to {} timed out", address)))?
            .map_err(|e| connect_error(e, &address))?;
        tcp.set_nodelay(true).ok();

        let client = match self.options.effective_tls_mode() {
            TlsMode::Implicit => {
                let tls = self.handshake(host, tcp).await?;
                let mut client = Client::new(self.logged(ImapStream::Tls(Box::new(tls))));
                self.read_greeting(&mut client).await?;
                client
            }
            TlsMode::StartTls | TlsMode::StartTlsRequired => {
                let mut client = Client::new(self.logged(ImapStream::Plain(tcp)));
                self.read_greeting(&mut client).await?;
                timeout(self.options.timeout, client.run_command_and_check_ok("STARTTLS", None))
                    .await?
                    .map_err(|e| MailError::tls(format!("STARTTLS rejected: {}", e)))?;

                let ImapStream::Plain(tcp) = client.into_inner().into_inner() else {
                    return Err(MailError::tls("Connection is already encrypted"));
                };
                let tls = self.handshake(host, tcp).await?;
                Client::new(self.logged(ImapStream::Tls(Box::new(tls))))
            }
            TlsMode::None | TlsMode::Auto => {
                let mut client = Client::new(self.logged(ImapStream::Plain(tcp)));
                self.read_greeting(&mut client).await?;
                client
            }
        };

        let credential = &self.options.imap_credential;
        let session = timeout(self.options.timeout, client.login(&credential.user_name, credential.password()))
            .await?
            .map_err(|(e, _client)| login_error(e))?;

        tracing::info!(
            address = %address,
            user = %credential.user_name,
            tls = ?self.options.effective_tls_mode(),
            "IMAP session established"
        );

        Ok(ClientSession {
            session: Some(session),
            timeout: self.options.timeout,
            uidplus: None,
        })
    }

    fn logged(&self, stream: ImapStream) -> LoggedStream<ImapStream> {
        LoggedStream::new(stream, self.protocol_log.clone())
    }

    async fn read_greeting(&self, client: &mut ImapClient) -> MailResult<()> {
        match timeout(self.options.timeout, client.read_response()).await? {
            Some(Ok(_greeting)) => Ok(()),
            Some(Err(e)) => Err(e.into()),
            None => Err(MailError::new(
                MailErrorKind::Disconnected,
                "Server closed the connection before the greeting",
            )),
        }
    }

    async fn handshake(&self, host: &str, tcp: TcpStream) -> MailResult<TlsStream<TcpStream>> {
        use rustls::pki_types::ServerName;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| MailError::tls(format!("Invalid server name: {}", host)))?;

        timeout(self.options.timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| MailError::timeout("TLS handshake timed out"))?
            .map_err(|e| MailError::tls(format!("TLS handshake failed: {}", e)))
    }
}

#[async_trait]
impl ImapConnector for ImapClientConnector {
    async fn connect(&self) -> MailResult<Box<dyn ImapSession>> {
        let session = self.retry.execute("imap_connect", || self.open_session()).await?;
        Ok(Box::new(session))
    }

    async fn connect_once(&self) -> MailResult<Box<dyn ImapSession>> {
        Ok(Box::new(self.open_session().await?))
    }
}

/// A tagged NO to LOGIN means bad credentials.
fn login_error(error: async_imap::error::Error) -> MailError {
    let error = MailError::from(error);
    if error.kind() == MailErrorKind::Protocol {
        MailError::authentication(error.message().to_string())
    } else {
        error
    }
}

fn connect_error(error: io::Error, address: &str) -> MailError {
    let message = format!("Cannot connect to {}: {}", address, error);
    MailError::new(MailError::from(error).kind(), message)
}

struct ClientSession {
    session: Option<ImapClientSession>,
    timeout: Duration,
    uidplus: Option<bool>,
}

impl ClientSession {
    fn inner(&mut self) -> MailResult<&mut ImapClientSession> {
        self.session.as_mut().ok_or_else(MailError::disconnected)
    }

    /// Asks for CAPABILITY once per session.
    async fn supports_uidplus(&mut self) -> MailResult<bool> {
        if let Some(supported) = self.uidplus {
            return Ok(supported);
        }
        let duration = self.timeout;
        let session = self.inner()?;
        let capabilities = timeout(duration, session.capabilities()).await??;
        let supported = capabilities.has_str("UIDPLUS");
        self.uidplus = Some(supported);
        Ok(supported)
    }
}

fn flag_name(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::Custom(name) => name.to_string(),
        _ => "\\*".to_string(),
    }
}

fn fetched(fetch: &Fetch) -> Option<FetchedMessage> {
    Some(FetchedMessage {
        uid: fetch.uid?,
        flags: fetch.flags().map(|f| flag_name(&f)).collect(),
        size: fetch.size,
        internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        header: fetch.header().map(<[u8]>::to_vec),
        body: fetch.body().map(<[u8]>::to_vec),
    })
}

#[async_trait]
impl ImapSession for ClientSession {
    async fn select(&mut self, folder: &str) -> MailResult<Option<u32>> {
        let duration = self.timeout;
        let session = self.inner()?;
        match timeout(duration, session.select(folder)).await? {
            Ok(mailbox) => Ok(mailbox.uid_validity),
            Err(e @ async_imap::error::Error::No(_)) => {
                Err(MailError::new(MailErrorKind::FolderNotFound, format!("{}: {}", folder, e)).with_cause(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_folders(&mut self) -> MailResult<Vec<String>> {
        let duration = self.timeout;
        let session = self.inner()?;
        let names = timeout(duration, async {
            let stream = session.list(Some(""), Some("*")).await?;
            stream.try_collect::<Vec<_>>().await
        })
        .await??;
        Ok(names.iter().map(|n| n.name().to_string()).collect())
    }

    async fn search(&mut self, query: &str) -> MailResult<Vec<u32>> {
        let duration = self.timeout;
        let session = self.inner()?;
        let found = timeout(duration, session.uid_search(query)).await??;
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uids: &[u32], items: FetchItems) -> MailResult<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let duration = self.timeout;
        let session = self.inner()?;
        let set = uid_set(uids);
        let fetches = timeout(duration, async {
            let stream = session.uid_fetch(&set, items.query()).await?;
            stream.try_collect::<Vec<_>>().await
        })
        .await??;

        let mut messages: Vec<FetchedMessage> = fetches.iter().filter_map(fetched).collect();
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn store(&mut self, uids: &[u32], command: &str) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let duration = self.timeout;
        let session = self.inner()?;
        let set = uid_set(uids);
        timeout(duration, async {
            let stream = session.uid_store(&set, command).await?;
            stream.try_collect::<Vec<_>>().await
        })
        .await??;
        Ok(())
    }

    async fn move_to(&mut self, uids: &[u32], folder: &str) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let duration = self.timeout;
        let set = uid_set(uids);
        let session = self.inner()?;
        match timeout(duration, session.uid_mv(&set, folder)).await? {
            Ok(()) => Ok(()),
            Err(async_imap::error::Error::Bad(_)) => {
                // No MOVE extension: copy, flag and expunge
                tracing::debug!(folder, "UID MOVE unsupported, falling back to COPY");
                timeout(duration, session.uid_copy(&set, folder)).await??;
                self.store(uids, &format!("+FLAGS.SILENT ({})", DELETED)).await?;
                self.expunge(uids).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn expunge(&mut self, uids: &[u32]) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let uidplus = self.supports_uidplus().await?;
        let duration = self.timeout;
        let set = uid_set(uids);
        let session = self.inner()?;

        if uidplus {
            timeout(duration, async {
                let stream = session.uid_expunge(&set).await?;
                stream.try_collect::<Vec<_>>().await
            })
            .await??;
        } else {
            tracing::debug!(uids = %set, "No UIDPLUS, expunging the whole folder");
            timeout(duration, async {
                let stream = session.expunge().await?;
                stream.try_collect::<Vec<_>>().await
            })
            .await??;
        }
        Ok(())
    }

    async fn idle(&mut self, idle_timeout: Duration, shutdown: &mut watch::Receiver<bool>) -> MailResult<IdleEvent> {
        let session = self.session.take().ok_or_else(MailError::disconnected)?;
        let mut handle = session.idle();
        handle.init().await?;

        let event = {
            let (wait, _interrupt) = handle.wait_with_timeout(idle_timeout);
            tokio::select! {
                response = wait => match response? {
                    IdleResponse::NewData(_) => IdleEvent::NewData,
                    IdleResponse::Timeout => IdleEvent::Timeout,
                    IdleResponse::ManualInterrupt => IdleEvent::Shutdown,
                },
                _ = shutdown_requested(shutdown) => IdleEvent::Shutdown,
            }
        };

        let session = timeout(self.timeout, handle.done()).await??;
        self.session = Some(session);
        Ok(event)
    }

    async fn logout(&mut self) -> MailResult<()> {
        let duration = self.timeout;
        if let Some(mut session) = self.session.take() {
            timeout(duration, session.logout()).await??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_redact_login() {
        assert_eq!(
            redact_line("A0001 LOGIN \"user@example.com\" \"hunter2\""),
            "A0001 LOGIN \"user@example.com\" ****"
        );
        assert_eq!(redact_line("A0002 SELECT INBOX"), "A0002 SELECT INBOX");
        assert_eq!(redact_line("A0003 LOGOUT"), "A0003 LOGOUT");
    }

    #[tokio::test]
    async fn test_logged_stream_records_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imap.log");
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut stream = LoggedStream::new(local, Some(ProtocolLogger::open(&path).unwrap()));

        stream.write_all(b"A1 LOGIN user se").await.unwrap();
        stream.write_all(b"cret\r\n").await.unwrap();
        stream.flush().await.unwrap();
        remote.write_all(b"* OK ready\r\n").await.unwrap();

        let mut buf = [0u8; 12];
        stream.read_exact(&mut buf).await.unwrap();

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("C: A1 LOGIN user ****"));
        assert!(log.contains("S: * OK ready"));
        assert!(!log.contains("secret"));
    }

    fn options(port: u16) -> EmailReceiverOptions {
        EmailReceiverOptions::builder()
            .imap_host("127.0.0.1")
            .imap_port(port)
            .tls_mode(TlsMode::None)
            .credential("user", "secret")
            .timeout(Duration::from_secs(5))
            .retry(RetryConfig {
                enabled: false,
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = ImapClientConnector::new(options(port)).unwrap();
        let err = connector.connect().await.err().unwrap();
        assert!(err.is_retryable());
    }

    /// Answers each tagged command with a canned reply and returns the
    /// commands received, without tags.
    async fn fake_server(listener: TcpListener, login_ok: bool) -> Vec<String> {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();
        write.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();

        while let Ok(Some(line)) = lines.next_line().await {
            let mut parts = line.split_whitespace();
            let tag = parts.next().unwrap_or("*").to_string();
            let mut command = parts.next().unwrap_or("").to_ascii_uppercase();
            if command == "UID" {
                command = format!("UID {}", parts.next().unwrap_or("").to_ascii_uppercase());
            }
            received.push(command.clone());

            let reply = match command.as_str() {
                "LOGIN" if login_ok => format!("{} OK LOGIN completed\r\n", tag),
                "LOGIN" => format!("{} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n", tag),
                "SELECT" => format!(
                    "* 2 EXISTS\r\n* FLAGS (\\Seen \\Deleted)\r\n* OK [UIDVALIDITY 42] UIDs valid\r\n{} OK [READ-WRITE] SELECT completed\r\n",
                    tag
                ),
                "CAPABILITY" => format!("* CAPABILITY IMAP4rev1 UIDPLUS\r\n{} OK CAPABILITY completed\r\n", tag),
                "UID SEARCH" => format!("* SEARCH 7 3\r\n{} OK SEARCH completed\r\n", tag),
                "UID COPY" => format!("{} OK COPY completed\r\n", tag),
                "UID STORE" => format!("{} OK STORE completed\r\n", tag),
                "UID EXPUNGE" => format!("* 2 EXPUNGE\r\n{} OK EXPUNGE completed\r\n", tag),
                "LOGOUT" => format!("* BYE logging out\r\n{} OK LOGOUT completed\r\n", tag),
                _ => format!("{} BAD unknown command\r\n", tag),
            };
            write.write_all(reply.as_bytes()).await.unwrap();
            if command == "LOGOUT" {
                break;
            }
        }
        received
    }

    #[tokio::test]
    async fn test_plain_session_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener, true));

        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(port);
        opts.protocol_log = Some(dir.path().join("imap.log"));
        let connector = ImapClientConnector::new(opts).unwrap();

        let mut session = connector.connect().await.unwrap();
        assert_eq!(session.select("INBOX").await.unwrap(), Some(42));
        assert_eq!(session.search("ALL").await.unwrap(), vec![3, 7]);
        session.logout().await.unwrap();
        server.await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("imap.log")).unwrap();
        assert!(log.contains("S: * OK IMAP4rev1 ready"));
        assert!(log.contains("LOGIN"));
        assert!(!log.contains("secret"));
    }

    #[tokio::test]
    async fn test_move_falls_back_to_copy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener, true));

        let connector = ImapClientConnector::new(options(port)).unwrap();
        let mut session = connector.connect().await.unwrap();
        session.select("INBOX").await.unwrap();
        session.move_to(&[2], "Archive").await.unwrap();
        session.logout().await.unwrap();

        // Only UID 2 is expunged; other deleted mail stays
        assert_eq!(
            server.await.unwrap(),
            vec!["LOGIN", "SELECT", "UID MOVE", "UID COPY", "UID STORE", "CAPABILITY", "UID EXPUNGE", "LOGOUT"]
        );
    }

    #[tokio::test]
    async fn test_connect_once_does_not_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let server = tokio::spawn(async move {
            // Hang up before the greeting
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });

        let mut opts = options(port);
        opts.retry = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let connector = ImapClientConnector::new(opts).unwrap();

        let err = connector.connect_once().await.err().unwrap();
        assert!(err.is_retryable());
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        assert!(connector.connect().await.is_err());
        assert_eq!(accepted.load(Ordering::SeqCst), 4);
        server.abort();
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener, false));

        let connector = ImapClientConnector::new(options(port)).unwrap();
        let err = connector.connect().await.err().unwrap();
        assert_eq!(err.kind(), MailErrorKind::Authentication);
        server.abort();
    }
}
