//! Async TCP listener using Tokio.
//!
//! Accepts TCP connections and serves HTTP/1.1 on each one from its own
//! task. Persistent connections (keep-alive) are supported out of the box;
//! [`Server::run_until`] adds graceful shutdown.

mod config;
mod connection;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub use config::{Limits, ServerConfig};

use crate::router::Router;
use connection::Service;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The wicket HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use wicket::router::Router;
/// use wicket::server::{Server, ServerConfig};
/// use wicket::{BoxError, Request, Response};
///
/// async fn hello(_req: Request, res: Response) -> Result<(), BoxError> {
///     res.send_text("Hello!").await?;
///     Ok(())
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", hello)?;
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(router, ServerConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Binds to `port` on all IPv4 interfaces.
    pub async fn bind_port(port: u16) -> Result<Self, ServerError> {
        Self::bind(format!("0.0.0.0:{port}")).await
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `router` until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the listener itself fails.
    pub async fn run(self, router: Router, config: ServerConfig) -> Result<(), ServerError> {
        self.run_until(router, config, std::future::pending()).await
    }

    /// Serves `router` until `signal` resolves, then shuts down gracefully.
    ///
    /// Shutdown stops accepting, closes idle connections, cancels in-flight
    /// handlers (terminating any open response stream) and waits up to
    /// [`ServerConfig::drain_timeout`] for connections to finish before
    /// aborting the rest.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use wicket::router::Router;
    /// use wicket::server::{Server, ServerConfig};
    ///
    /// # async fn example() -> Result<(), wicket::server::ServerError> {
    /// let server = Server::bind("127.0.0.1:0").await?;
    /// let ctrl_c = async {
    ///     let _ = tokio::signal::ctrl_c().await;
    /// };
    /// server.run_until(Router::new(), ServerConfig::default(), ctrl_c).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_until<F>(
        self,
        router: Router,
        config: ServerConfig,
        signal: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let drain_timeout = config.drain_timeout;
        let service = Arc::new(Service::new(router, &config));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        info!(address = %self.local_addr, "wicket listening");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                () = &mut signal => break,
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    debug!(peer = %peer_addr, "connection accepted");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
                    }
                    connections.spawn(connection::serve(
                        stream,
                        Some(peer_addr),
                        Arc::clone(&service),
                        shutdown_rx.clone(),
                    ));
                }
                Some(joined) = connections.join_next() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        info!(open = connections.len(), "shutting down");
        drop(self.listener);
        shutdown_tx.send_replace(true);

        let drained = timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "drain timeout elapsed, aborting connections"
            );
            connections.shutdown().await;
        }

        info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxError, Request, Response};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn double(req: Request, res: Response) -> Result<(), BoxError> {
        let id = req.param_int("id").ok_or("missing id")?;
        res.send_text((id * 2).to_string()).await?;
        Ok(())
    }

    type ServerTask = tokio::task::JoinHandle<Result<(), ServerError>>;

    async fn start(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>, ServerTask) {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let mut router = Router::new();
        router.get("/items/<id:int>", double).unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(router, config, async {
            let _ = stopped.await;
        }));
        (addr, stop, task)
    }

    async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&out).contains(needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "closed early: {}", String::from_utf8_lossy(&out));
            out.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn keep_alive_over_tcp() {
        let (addr, stop, task) = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(b"GET /items/21 HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let first = read_until(&mut stream, "\r\n\r\n42").await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));

        stream
            .write_all(b"GET /items/abc HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut rest = String::new();
        stream.read_to_string(&mut rest).await.unwrap();
        assert!(rest.starts_with("HTTP/1.1 404 Not Found\r\n"));

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn default_headers_on_every_response() {
        let config = ServerConfig::default().with_default_header("Server", "wicket");
        let (addr, stop, task) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"DELETE /items/1 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\nServer: wicket\r\n"));
        assert!(out.contains("Allow: GET\r\n"));

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_idle_connections() {
        let config = ServerConfig::default().with_drain_timeout(Duration::from_secs(2));
        let (addr, stop, task) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /items/1 HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        read_until(&mut stream, "\r\n\r\n2").await;

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        match Server::bind(&addr).await {
            Err(ServerError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("second bind to {addr} succeeded"),
        }
    }
}
