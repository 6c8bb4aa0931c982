// Protocol engine and TCP listener

use crate::mailserver::auth::Authenticator;
use crate::mailserver::commands::{split_lines, Dispatcher, ERR};
use crate::mailserver::config::ServerConfig;
use crate::mailserver::frame::{read_frame, write_frame, MAX_FRAME_LEN};
use crate::mailserver::guard::AbuseGuard;
use crate::mailserver::mailbox::MailboxStore;
use crate::mailserver::session::Session;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Per-connection transport limits
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Largest accepted request payload
    pub max_frame_len: u32,
    /// Close the connection if no complete request arrives in time
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            idle_timeout: None,
        }
    }
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_frame_len: config.max_frame_len,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Run the request/response loop for one connection until it ends
///
/// Transport failures end the connection quietly and are not errors. The
/// only error returned is a command handler that could not be run.
pub async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let session = Session::new(peer);
    let span = tracing::info_span!("conn", id = %session.id, peer = %peer);

    connection_loop(stream, session, dispatcher, limits)
        .instrument(span)
        .await
}

async fn connection_loop<S>(
    stream: S,
    mut session: Session,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    tracing::info!("Client connected");

    loop {
        let frame = match limits.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, read_frame(&mut reader, limits.max_frame_len)).await {
                Ok(frame) => frame,
                Err(_) => {
                    tracing::info!("Closing idle connection");
                    break;
                }
            },
            None => read_frame(&mut reader, limits.max_frame_len).await,
        };

        let payload = match frame {
            Ok(payload) => payload,
            Err(e) if e.is_protocol_violation() => {
                tracing::warn!("Rejecting request: {}", e);
                let _ = write_frame(&mut writer, ERR.as_bytes()).await;
                break;
            }
            Err(e) => {
                tracing::debug!("Read ended: {}", e);
                break;
            }
        };

        // Never empty: a payload without a command name reaches the
        // dispatcher as an unknown command and gets `ERR`
        let text = String::from_utf8_lossy(&payload).into_owned();
        let lines = split_lines(&text);

        // Handlers block on file locks and disk I/O
        let worker = dispatcher.clone();
        let span = tracing::Span::current();
        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let outcome = worker.dispatch(&mut session, &lines);
            (session, outcome)
        })
        .await
        .context("Command handler failed")?;
        session = returned;

        if !outcome.response.is_empty() {
            if let Err(e) = write_frame(&mut writer, outcome.response.as_bytes()).await {
                tracing::debug!("Write failed: {}", e);
                break;
            }
        }

        if outcome.should_close {
            break;
        }
    }

    let _ = writer.shutdown().await;
    tracing::info!("Client disconnected");
    Ok(())
}

/// Accepts connections and spawns one task per client
pub struct MailServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
}

impl MailServer {
    /// Open the spool and guard state described by `config` and bind its address
    pub async fn bind(config: &ServerConfig, directory: Arc<dyn Authenticator>) -> Result<Self> {
        let store = MailboxStore::new(&config.spool_dir)
            .with_context(|| format!("Failed to open spool {:?}", config.spool_dir))?;
        let guard = AbuseGuard::new(&config.guard_state_path(), config.policy)
            .context("Failed to prepare abuse guard state")?;
        let dispatcher = Arc::new(Dispatcher::new(store, guard, directory));

        Self::bind_with(config.listen_addr, dispatcher, ConnectionLimits::from(config)).await
    }

    /// Bind an address for an already assembled dispatcher
    pub async fn bind_with(
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        limits: ConnectionLimits,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        Ok(Self {
            listener,
            dispatcher,
            limits,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections until a shutdown signal arrives
    ///
    /// Connections already running are left to finish on their own.
    pub async fn run(self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) -> Result<()> {
        tracing::info!("Listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let dispatcher = self.dispatcher.clone();
                            let limits = self.limits;
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, peer, dispatcher, limits).await {
                                    tracing::error!("Connection from {} failed: {:#}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            if let Err(e) = self.run(shutdown_rx).await {
                tracing::error!("Listener error: {:#}", e);
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to a server started with [`MailServer::spawn`]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the listener to exit
    pub async fn shutdown(self) -> Result<()> {
        // The listener may already be gone; that is fine
        let _ = self.shutdown_tx.send(());
        self.task.await.context("Listener task panicked")
    }
}
