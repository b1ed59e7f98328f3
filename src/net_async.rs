//! Async (Tokio) transport for the chunkwire daemon and client.
//!
//! `server` holds the connection acceptor and the per-connection session
//! state machine. `client` holds the request/response client and a small
//! manager that runs independent downloads concurrently.

use crate::codec::LineStream;
use crate::error::{Error, Result};
use crate::protocol_core::{Command, Response};

pub mod server {
    use super::*;
    use crate::config::ServerConfig;
    use crate::fs_enum::list_served_files;
    use crate::logger::Logger;
    use crate::protocol::text;
    use crate::protocol_core::normalize_under_root;
    use crate::transfer::{send_file, OutgoingFile};
    use anyhow::Context;
    use std::future::Future;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::{TcpListener, TcpSocket};

    /// Read-only settings shared by every session.
    pub struct SessionContext {
        pub root: PathBuf,
        pub chunk_size: u32,
        pub idle_timeout: Option<Duration>,
        pub logger: Arc<dyn Logger>,
    }

    impl SessionContext {
        /// `root` must already be canonical.
        pub fn new(config: &ServerConfig, root: PathBuf, logger: Arc<dyn Logger>) -> Self {
            Self {
                root,
                chunk_size: config.chunk_size,
                idle_timeout: config.idle_timeout(),
                logger,
            }
        }
    }

    /// Why a session ended.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SessionEnd {
        /// Client sent QUIT and got its goodbye
        Quit,
        /// Client disconnected or sent an empty line
        PeerClosed,
        /// No command arrived before the idle deadline
        Timeout,
        /// Unrecoverable I/O or framing failure
        Failed,
    }

    impl SessionEnd {
        pub fn as_str(&self) -> &'static str {
            match self {
                SessionEnd::Quit => "quit",
                SessionEnd::PeerClosed => "disconnected",
                SessionEnd::Timeout => "idle timeout",
                SessionEnd::Failed => "error",
            }
        }
    }

    enum Step {
        Continue,
        End(SessionEnd),
    }

    /// Bind `bind` with address reuse enabled and start listening.
    pub async fn bind_listener(bind: &str) -> anyhow::Result<TcpListener> {
        let addr: SocketAddr = tokio::net::lookup_host(bind)
            .await
            .with_context(|| format!("resolve {}", bind))?
            .next()
            .with_context(|| format!("no address for {}", bind))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("create socket")?;
        socket.set_reuseaddr(true).context("set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("bind {}", addr))?;
        let listener = socket
            .listen(1024)
            .with_context(|| format!("listen {}", addr))?;
        Ok(listener)
    }

    /// Accept connections until `shutdown` completes, one task per connection.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve_until<F>(
        listener: TcpListener,
        ctx: Arc<SessionContext>,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        ctx.logger.listening(&local.to_string(), &ctx.root);
        tokio::pin!(shutdown);
        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => return Ok(()),
                res = listener.accept() => match res {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        ctx.logger.session_error(local, &format!("accept failed: {}", e));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            let _ = stream.set_nodelay(true);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.logger.session_open(peer);
                let end = handle_session(LineStream::new(stream), peer, &ctx).await;
                ctx.logger.session_closed(peer, end.as_str());
            });
        }
    }

    /// Run one session to completion.
    ///
    /// Loops AwaitingCommand -> Dispatching -> (list | stream | quit) until the
    /// client quits, disconnects, idles out, or the connection breaks.
    pub async fn handle_session<S>(
        mut ls: LineStream<S>,
        peer: SocketAddr,
        ctx: &SessionContext,
    ) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ls.set_read_timeout(ctx.idle_timeout);
        loop {
            let line = match ls.read_line().await {
                Ok(line) => line,
                Err(Error::ConnectionClosed { partial }) => {
                    if !partial.is_empty() {
                        ctx.logger
                            .session_error(peer, &format!("closed mid-command: '{}'", partial));
                    }
                    return SessionEnd::PeerClosed;
                }
                Err(Error::Timeout { .. }) => return SessionEnd::Timeout,
                Err(e @ Error::ProtocolViolation { .. }) => {
                    ctx.logger.session_error(peer, &e.to_string());
                    let _ = ls.write_line(&Response::Error(e.to_string()).to_string()).await;
                    return SessionEnd::Failed;
                }
                Err(e) => {
                    ctx.logger.session_error(peer, &e.to_string());
                    return SessionEnd::Failed;
                }
            };
            if line.trim().is_empty() {
                return SessionEnd::PeerClosed;
            }
            ctx.logger.command(peer, &line);

            let step = match Command::parse(&line) {
                Command::List => handle_list(&mut ls, peer, ctx).await,
                Command::Download(Some(name)) => handle_download(&mut ls, peer, ctx, &name).await,
                Command::Download(None) => {
                    respond(&mut ls, Response::Error(text::FILENAME_MISSING.into())).await
                }
                Command::Quit => quit(&mut ls).await,
                Command::Unknown(_) => {
                    respond(&mut ls, Response::Error(text::UNKNOWN_COMMAND.into())).await
                }
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::End(end)) => return end,
                Err(e) => {
                    ctx.logger.session_error(peer, &e.to_string());
                    return SessionEnd::Failed;
                }
            }
        }
    }

    async fn respond<S>(ls: &mut LineStream<S>, response: Response) -> Result<Step>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ls.write_line(&response.to_string()).await?;
        Ok(Step::Continue)
    }

    async fn quit<S>(ls: &mut LineStream<S>) -> Result<Step>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ls.write_line(&Response::Ok(text::GOODBYE.into()).to_string())
            .await?;
        let _ = ls.shutdown().await;
        Ok(Step::End(SessionEnd::Quit))
    }

    async fn handle_list<S>(ls: &mut LineStream<S>, peer: SocketAddr, ctx: &SessionContext) -> Result<Step>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let files = match list_served_files(&ctx.root) {
            Ok(files) => files,
            Err(e) => {
                ctx.logger.session_error(peer, &format!("list failed: {}", e));
                return respond(ls, Response::Error(format!("Could not list files: {}", e))).await;
            }
        };
        if files.is_empty() {
            ctx.logger.listed(peer, 0);
            return respond(ls, Response::Ok(text::NO_FILES.into())).await;
        }

        let mut out = Response::Ok(files.len().to_string()).to_string();
        out.push('\n');
        for name in &files {
            out.push_str(name);
            out.push('\n');
        }
        ls.write_bytes(out.as_bytes()).await?;
        ctx.logger.listed(peer, files.len());
        Ok(Step::Continue)
    }

    async fn handle_download<S>(
        ls: &mut LineStream<S>,
        peer: SocketAddr,
        ctx: &SessionContext,
        name: &str,
    ) -> Result<Step>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let not_found = || Response::FileNotFound(format!("File '{}' not found.", name));
        let path = match normalize_under_root(&ctx.root, name) {
            Ok(p) if p.is_file() => p,
            Ok(_) | Err(Error::NotFound { .. }) => {
                ctx.logger.not_found(peer, name);
                return respond(ls, not_found()).await;
            }
            Err(e) => {
                return respond(ls, Response::Error(format!("Error preparing file: {}", e))).await;
            }
        };
        let outgoing = match OutgoingFile::open(&path, name).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ctx.logger.not_found(peer, name);
                return respond(ls, not_found()).await;
            }
            Err(e) => {
                ctx.logger.session_error(peer, &format!("open {}: {}", name, e));
                return respond(ls, Response::Error(format!("Error preparing file: {}", e))).await;
            }
        };

        // Past the header the stream is committed to this file; any failure
        // here leaves the client mid-payload, so the session must end.
        let plan = send_file(ls, outgoing, ctx.chunk_size).await?;
        ctx.logger
            .file_sent(peer, name, plan.file_size, plan.chunk_count);
        Ok(Step::Continue)
    }
}

pub mod client {
    use super::*;
    use crate::config::ClientConfig;
    use crate::protocol::{text, timeouts};
    use crate::transfer::{receive_file, ProgressObserver, TransferProgress};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::sync::Semaphore;
    use tokio::time::timeout;
    use uuid::Uuid;

    const LIST_PREALLOC: usize = 1024;

    /// Result of a client operation as shown to a user.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Outcome {
        pub success: bool,
        pub message: String,
    }

    impl Outcome {
        pub fn ok(message: impl Into<String>) -> Self {
            Self {
                success: true,
                message: message.into(),
            }
        }

        pub fn failed(message: impl Into<String>) -> Self {
            Self {
                success: false,
                message: message.into(),
            }
        }
    }

    /// Files offered by the server.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Listing {
        pub files: Vec<String>,
        pub message: String,
    }

    /// A completed download.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DownloadReport {
        pub name: String,
        pub path: PathBuf,
        pub bytes: u64,
    }

    pub struct Client {
        config: ClientConfig,
        ls: Option<LineStream<TcpStream>>,
    }

    fn not_connected() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "not connected",
        ))
    }

    /// Local file name for a requested name; only the last path component is kept.
    pub fn local_name(name: &str) -> Option<&str> {
        Path::new(name).file_name().and_then(|base| base.to_str())
    }

    impl Client {
        pub fn new(config: ClientConfig) -> Self {
            Self { config, ls: None }
        }

        pub fn is_connected(&self) -> bool {
            self.ls.is_some()
        }

        pub async fn connect(&mut self) -> Result<String> {
            let addr = self.config.addr();
            let stream = match timeout(
                Duration::from_millis(timeouts::CONNECT_MS),
                TcpStream::connect(&addr),
            )
            .await
            {
                Ok(res) => res?,
                Err(_) => {
                    return Err(Error::Timeout {
                        ms: timeouts::CONNECT_MS,
                    })
                }
            };
            let _ = stream.set_nodelay(true);
            // A fresh connection always starts with an empty carry-over buffer.
            self.ls = Some(LineStream::new(stream).with_read_timeout(self.config.read_timeout()));
            Ok(format!("Connected to server at {}", addr))
        }

        /// Send QUIT (best effort), wait briefly for the goodbye and close.
        pub async fn disconnect(&mut self) -> String {
            if let Some(mut ls) = self.ls.take() {
                if ls.write_line(&Command::Quit.to_string()).await.is_ok() {
                    ls.set_read_timeout(Some(Duration::from_millis(timeouts::QUIT_ACK_MS)));
                    let _ = ls.read_line().await;
                }
                let _ = ls.shutdown().await;
            }
            "Disconnected.".to_string()
        }

        // After a framing or transport error the stream position is unknown,
        // so the connection cannot carry another command.
        fn drop_if_broken<T>(&mut self, res: &Result<T>) {
            if let Err(e) = res {
                if e.is_fatal_to_connection() {
                    self.ls = None;
                }
            }
        }

        pub async fn list_files(&mut self) -> Result<Listing> {
            let ls = self.ls.as_mut().ok_or_else(not_connected)?;
            let res = request_list(ls).await;
            self.drop_if_broken(&res);
            res
        }

        /// Download `name` into the configured downloads directory.
        pub async fn download(
            &mut self,
            name: &str,
            observer: &mut dyn ProgressObserver,
        ) -> Result<DownloadReport> {
            let base = local_name(name)
                .ok_or_else(|| Error::not_found(format!("File '{}' not found.", name)))?;
            let dest = self.config.downloads_dir.join(base);
            let chunk_size = self.config.chunk_size;
            let ls = self.ls.as_mut().ok_or_else(not_connected)?;
            let res = request_download(ls, name, chunk_size, dest, observer).await;
            self.drop_if_broken(&res);
            res
        }
    }

    async fn request_list(ls: &mut LineStream<TcpStream>) -> Result<Listing> {
        ls.write_line(&Command::List.to_string()).await?;
        let header = ls.read_line().await?;
        match Response::parse(&header)? {
            Response::Ok(payload) => {
                if payload == text::NO_FILES {
                    return Ok(Listing {
                        files: Vec::new(),
                        message: payload,
                    });
                }
                let count: usize = payload
                    .trim()
                    .parse()
                    .map_err(|_| Error::protocol(format!("invalid file count: {}", payload)))?;
                // The count is peer-controlled; grow as names actually arrive.
                let mut files = Vec::with_capacity(count.min(LIST_PREALLOC));
                for _ in 0..count {
                    match ls.read_line().await {
                        Ok(name) => files.push(name),
                        Err(Error::ConnectionClosed { .. }) => {
                            return Err(Error::protocol(format!(
                                "listing ended after {} of {} names",
                                files.len(),
                                count
                            )));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Listing {
                    files,
                    message: format!("Found {} files.", count),
                })
            }
            Response::Error(msg) => Err(Error::Server { message: msg }),
            other => Err(Error::protocol(format!(
                "unexpected response to LIST: {}",
                other
            ))),
        }
    }

    async fn request_download(
        ls: &mut LineStream<TcpStream>,
        name: &str,
        chunk_size: u32,
        dest: PathBuf,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DownloadReport> {
        ls.write_line(&Command::Download(Some(name.to_string())).to_string())
            .await?;
        let header = ls.read_line().await?;
        match Response::parse(&header)? {
            Response::FileInfo {
                size, chunk_count, ..
            } => {
                let bytes =
                    receive_file(ls, name, size, chunk_count, chunk_size, &dest, observer).await?;
                Ok(DownloadReport {
                    name: name.to_string(),
                    path: dest,
                    bytes,
                })
            }
            Response::FileNotFound(msg) => Err(Error::NotFound { message: msg }),
            Response::Error(msg) => Err(Error::Server { message: msg }),
            Response::Ok(msg) => Err(Error::protocol(format!(
                "unexpected OK to DOWNLOAD: {}",
                msg
            ))),
        }
    }

    /// Notifications from background downloads.
    #[derive(Debug, Clone)]
    pub enum DownloadEvent {
        Started {
            id: Uuid,
            name: String,
        },
        Progress {
            id: Uuid,
            progress: TransferProgress,
        },
        Finished {
            id: Uuid,
            name: String,
            outcome: Outcome,
            report: Option<DownloadReport>,
        },
    }

    #[derive(Debug, thiserror::Error, PartialEq, Eq)]
    pub enum SpawnError {
        #[error("download limit reached ({limit} running)")]
        Busy { limit: usize },
    }

    /// Runs each download on its own connection and task, up to a soft cap.
    ///
    /// Progress and completion are reported through the event channel
    /// returned by [`DownloadManager::new`]; nothing is shared between
    /// downloads.
    pub struct DownloadManager {
        config: Arc<ClientConfig>,
        permits: Arc<Semaphore>,
        limit: usize,
        tx: UnboundedSender<DownloadEvent>,
    }

    impl DownloadManager {
        pub fn new(config: ClientConfig) -> (Self, UnboundedReceiver<DownloadEvent>) {
            let limit = config.max_concurrent_downloads.max(1);
            let (tx, rx) = unbounded_channel();
            let mgr = Self {
                config: Arc::new(config),
                permits: Arc::new(Semaphore::new(limit)),
                limit,
                tx,
            };
            (mgr, rx)
        }

        /// Free download slots.
        pub fn available(&self) -> usize {
            self.permits.available_permits()
        }

        /// Start downloading `name` in the background, or refuse when the
        /// cap is reached.
        pub fn spawn(&self, name: &str) -> std::result::Result<Uuid, SpawnError> {
            let permit = self
                .permits
                .clone()
                .try_acquire_owned()
                .map_err(|_| SpawnError::Busy { limit: self.limit })?;
            let id = Uuid::new_v4();
            let name = name.to_string();
            let config = (*self.config).clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(DownloadEvent::Started {
                    id,
                    name: name.clone(),
                });
                let progress_tx = tx.clone();
                let mut observer = move |p: &TransferProgress| {
                    let _ = progress_tx.send(DownloadEvent::Progress {
                        id,
                        progress: p.clone(),
                    });
                };
                let result = download_once(config, &name, &mut observer).await;
                // Free the slot before reporting so a waiting caller can start the next one.
                drop(permit);
                let (outcome, report) = match result {
                    Ok(report) => (
                        Outcome::ok(format!(
                            "File '{}' downloaded successfully to {}",
                            name,
                            report.path.display()
                        )),
                        Some(report),
                    ),
                    Err(e) => (
                        Outcome::failed(format!("Download of '{}' failed: {}", name, e)),
                        None,
                    ),
                };
                let _ = tx.send(DownloadEvent::Finished {
                    id,
                    name,
                    outcome,
                    report,
                });
            });
            Ok(id)
        }
    }

    /// Connect, download one file, say goodbye.
    pub async fn download_once(
        config: ClientConfig,
        name: &str,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DownloadReport> {
        let mut client = Client::new(config);
        client.connect().await?;
        let res = client.download(name, observer).await;
        client.disconnect().await;
        res
    }
}
