//! Unix socket listener for the daemon's IPC surface.
//!
//! One [`Connection`] per client, each holding a semaphore permit so the
//! number of in-flight connections stays bounded. Frames are read and
//! written under the per-connection deadline from [`ServerConfig`].

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use calbridge_protocol::{
    Envelope, MAX_MESSAGE_SIZE, PROTOCOL_VERSION, ProtocolError, Request, Response,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Listens on the daemon socket and hands out [`Connection`]s.
pub struct SocketServer {
    config: ServerConfig,
    listener: UnixListener,
    permits: Arc<Semaphore>,
}

impl SocketServer {
    /// Prepares the socket path and binds the listener.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        prepare_socket_path(&config).await?;

        let listener = UnixListener::bind(&config.socket_path)?;
        info!(path = %config.socket_path.display(), "listening");

        let permits = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config,
            listener,
            permits,
        })
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.config.socket_path
    }

    /// Accepts one connection, waiting for a free permit first.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, _) = self.listener.accept().await?;
        debug!("client connected");

        Ok(Connection {
            stream,
            deadline: self.config.connection_timeout,
            _permit: permit,
        })
    }

    /// Accept loop: each connection is handed to `handler` on its own task.
    pub async fn run<F, Fut>(&self, handler: F) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    tokio::spawn(handler(connection));
                }
                Err(ServerError::Shutdown) => return Ok(()),
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
    }

    /// Runs the accept loop until the shutdown future completes.
    pub async fn run_until_shutdown<F, Fut, S>(&self, handler: F, shutdown: S) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(handler) => result,
            _ = shutdown => {
                info!("shutdown signal received");
                Ok(())
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let path = &self.config.socket_path;
        if path.exists()
            && let Err(e) = std::fs::remove_file(path)
        {
            warn!(path = %path.display(), error = %e, "could not remove socket file");
        }
    }
}

/// Checks the parent directory exists and clears a socket file left over
/// from a previous run. A socket another process still answers on is an
/// error either way.
async fn prepare_socket_path(config: &ServerConfig) -> ServerResult<()> {
    let path = &config.socket_path;

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        return Err(ServerError::socket_path_invalid(parent.to_string_lossy()));
    }

    if !path.exists() {
        return Ok(());
    }

    if config.cleanup_stale_socket && UnixStream::connect(path).await.is_err() {
        info!(path = %path.display(), "removing stale socket file");
        std::fs::remove_file(path)?;
        return Ok(());
    }

    Err(ServerError::socket_in_use(path.to_string_lossy()))
}

/// One client connection, counted against the server's connection limit.
pub struct Connection {
    stream: UnixStream,
    deadline: Duration,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    /// Reads one request frame.
    ///
    /// Returns `Ok(None)` when the client closed the connection between
    /// frames.
    pub async fn read_request(&mut self) -> ServerResult<Option<Envelope<Request>>> {
        let mut len_buf = [0u8; 4];
        match timed(
            self.deadline,
            "read frame length",
            self.stream.read_exact(&mut len_buf),
        )
        .await
        {
            Ok(_) => {}
            Err(ServerError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let len = u32::from_be_bytes(len_buf);
        if len == 0 {
            return Err(ProtocolError::EmptyMessage.into());
        }
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let mut payload = vec![0u8; len as usize];
        timed(
            self.deadline,
            "read frame payload",
            self.stream.read_exact(&mut payload),
        )
        .await?;

        let envelope: Envelope<Request> =
            serde_json::from_slice(&payload).map_err(ProtocolError::from)?;

        if !envelope.is_compatible() {
            warn!(
                version = %envelope.protocol_version,
                expected = %PROTOCOL_VERSION,
                "client sent a different protocol version"
            );
        }

        Ok(Some(envelope))
    }

    /// Writes one response frame.
    pub async fn write_response(&mut self, envelope: &Envelope<Response>) -> ServerResult<()> {
        let frame = calbridge_protocol::encode_message(envelope)?;
        timed(
            self.deadline,
            "write response frame",
            self.stream.write_all(&frame),
        )
        .await
    }

    /// Sends a response for the given request.
    pub async fn respond(
        &mut self,
        request_id: impl Into<String>,
        response: Response,
    ) -> ServerResult<()> {
        let envelope = Envelope::response(request_id, response);
        self.write_response(&envelope).await
    }
}

/// Runs one I/O future under the connection deadline.
async fn timed<T>(
    deadline: Duration,
    operation: &str,
    fut: impl Future<Output = std::io::Result<T>>,
) -> ServerResult<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ProtocolError::Timeout {
            operation: operation.to_string(),
        }
        .into()),
    }
}
