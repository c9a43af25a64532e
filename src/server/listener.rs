use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::http::connection::Connection;
use crate::server::admission::AdmissionController;
use crate::server::dispatch::Dispatcher;
use crate::server::pool::ContextPool;

/// A running HTTP server.
///
/// [`listen`](HttpServer::listen) binds the socket and starts accepting in
/// the background; the returned handle controls the server's lifetime.
pub struct HttpServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
    admission: AdmissionController,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    /// Kept apart from `acceptor` so `kill()` works while `shutdown()` is
    /// awaiting the handle.
    abort: AbortHandle,
    running: Arc<AtomicBool>,
}

impl HttpServer {
    pub async fn listen(config: ServerConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let listener = TcpListener::bind(config.listen_addr())
            .await
            .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
        let local_addr = listener.local_addr()?;

        info!(
            address = %local_addr,
            max_connections = config.connection_limit(),
            max_request_size = config.request_size_limit(),
            "Listening"
        );

        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&config)));
        let admission = AdmissionController::new(config.connection_limit());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));

        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&dispatcher),
            admission.clone(),
            shutdown_rx,
            Arc::clone(&running),
        ));

        let abort = acceptor.abort_handle();

        Ok(Self {
            config,
            dispatcher,
            admission,
            local_addr,
            shutdown,
            acceptor: Mutex::new(Some(acceptor)),
            abort,
            running,
        })
    }

    /// The bound address; useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live configuration. Handlers can be added and removed through it while
    /// the server runs.
    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn pool(&self) -> &Arc<ContextPool> {
        self.dispatcher.pool()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops accepting, closes idle connections and waits for in-flight
    /// responses (suspended ones included) to finish.
    ///
    /// Returns early, without error, if [`kill`](HttpServer::kill) cuts the
    /// wait short.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!(address = %self.local_addr, "Graceful shutdown requested");
        self.shutdown.send_replace(true);

        let acceptor = self.take_acceptor();
        if let Some(acceptor) = acceptor {
            match acceptor.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    debug!(address = %self.local_addr, "Graceful shutdown cut short by kill");
                }
                Err(e) => return Err(e).context("acceptor task failed"),
            }
        }
        Ok(())
    }

    /// Stops at once. Every open connection is dropped, in-flight responses
    /// included, even while a graceful shutdown is draining.
    pub fn kill(&self) {
        warn!(address = %self.local_addr, "Killing server");
        self.shutdown.send_replace(true);

        // Dropping the acceptor's JoinSet aborts every connection task.
        self.abort.abort();
        drop(self.take_acceptor());
        self.running.store(false, Ordering::Release);
    }

    fn take_acceptor(&self) -> Option<JoinHandle<()>> {
        self.acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("live_connections", &self.admission.live())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    admission: AdmissionController,
    mut shutdown: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let admitted = admission.try_admit();
                if admitted.is_some() {
                    debug!(peer = %peer, live = admission.live(), "Accepted connection");
                } else {
                    warn!(peer = %peer, limit = ?admission.limit(), "Connection limit reached");
                }

                let connection = Connection::new(socket, Arc::clone(&dispatcher))
                    .with_peer(peer)
                    .with_shutdown(shutdown.clone())
                    .admitted(admitted.is_some());

                connections.spawn(async move {
                    // Held for the connection's lifetime
                    let _admitted = admitted;
                    if let Err(e) = connection.run().await {
                        debug!(peer = %peer, error = %e, "Connection error");
                    }
                });
            }

            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                reap(joined);
            }
        }
    }

    drop(listener);
    info!(open_connections = connections.len(), "Listener closed, draining connections");

    while let Some(joined) = connections.join_next().await {
        reap(joined);
    }

    running.store(false, Ordering::Release);
    info!("Server stopped");
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Connection task panicked");
        }
    }
}
