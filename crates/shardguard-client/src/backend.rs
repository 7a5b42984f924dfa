//! The seam between the orchestrator and the database wire protocol.
//!
//! A [`Backend`] executes typed queries against one node and owns the
//! underlying connection. The bundled [`TcpBackend`] speaks a
//! line-delimited JSON protocol: one request envelope per line, one JSON
//! reply per line. Anything that can answer the four [`Query`] variants
//! can stand in for it, which is exactly what the mock backend does in
//! the test suites.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

use shardguard_common::{Error, Result};

use crate::query::{ConnOptions, Query};

/// One live client to one node of the managed cluster.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Executes a query, finishing no later than `deadline`.
    async fn exec(&self, query: &Query, deadline: Instant) -> Result<Value>;

    /// Drops the underlying connection. The next exec reconnects.
    async fn reset(&self);

    /// Terminates the client.
    async fn close(&self);
}

/// Builds one backend per sanitized URI. The pool calls this exactly once
/// per URI over the lifetime of a cluster.
pub trait BackendFactory: Send + Sync {
    fn connect(&self, uri: &str, opts: &ConnOptions) -> Arc<dyn Backend>;
}

/// Line-delimited JSON over TCP.
///
/// The connection is established lazily on the first exec and kept until
/// an error tears it down. Requests carry the credentials from the
/// connection options in the envelope.
pub struct TcpBackend {
    uri: String,
    opts: ConnOptions,
    stream: Mutex<Option<BufStream<TcpStream>>>,
}

impl TcpBackend {
    pub fn new(uri: String, opts: ConnOptions) -> Self {
        Self {
            uri,
            opts,
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>> {
        let connect = TcpStream::connect(&self.uri);
        let stream = tokio::time::timeout(self.opts.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(|_| Error::NoConnection)?;

        Ok(BufStream::new(stream))
    }

    fn envelope(&self, query: &Query) -> Value {
        let mut wire = query.to_wire();
        if !self.opts.user.is_empty() {
            wire["user"] = Value::String(self.opts.user.clone());
            wire["password"] = Value::String(self.opts.password.clone());
        }
        wire
    }

    async fn round_trip(&self, query: &Query) -> Result<Value> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let stream = guard.as_mut().ok_or(Error::NoConnection)?;

        let mut line = serde_json::to_vec(&self.envelope(query))
            .map_err(|_| Error::Parse("request".into()))?;
        line.push(b'\n');

        let io = async {
            stream.write_all(&line).await?;
            stream.flush().await?;

            let mut reply = String::new();
            stream.read_line(&mut reply).await?;
            Ok::<String, std::io::Error>(reply)
        };

        match io.await {
            Ok(reply) if !reply.trim().is_empty() => serde_json::from_str(reply.trim())
                .map_err(|_| Error::Parse("response".into())),
            // An empty line means the peer closed the connection.
            Ok(_) | Err(_) => {
                *guard = None;
                Err(Error::NoConnection)
            }
        }
    }
}

#[async_trait]
impl Backend for TcpBackend {
    async fn exec(&self, query: &Query, deadline: Instant) -> Result<Value> {
        tokio::time::timeout_at(deadline, self.round_trip(query))
            .await
            .map_err(|_| Error::RequestTimeout)?
    }

    async fn reset(&self) {
        *self.stream.lock().await = None;
    }

    async fn close(&self) {
        *self.stream.lock().await = None;
    }
}

/// The production factory: every URI gets a [`TcpBackend`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBackendFactory;

impl BackendFactory for TcpBackendFactory {
    fn connect(&self, uri: &str, opts: &ConnOptions) -> Arc<dyn Backend> {
        Arc::new(TcpBackend::new(uri.to_string(), opts.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_exec_against_unreachable_node() {
        let backend = TcpBackend::new(
            "127.0.0.1:1".into(),
            ConnOptions {
                connect_timeout: Duration::from_millis(200),
                ..ConnOptions::default()
            },
        );
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = backend.exec(&Query::RouterInfo, deadline).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_exec_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request: Value = serde_json::from_slice(&buf[..n]).unwrap();
            assert_eq!(request["op"], "router_info");
            socket.write_all(b"{\"status\":0}\n").await.unwrap();
        });

        let backend = TcpBackend::new(addr, ConnOptions::default());
        let deadline = Instant::now() + Duration::from_secs(1);
        let reply = backend.exec(&Query::RouterInfo, deadline).await.unwrap();
        assert_eq!(reply["status"], 0);
    }

    #[tokio::test]
    async fn test_exec_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let backend = TcpBackend::new(addr, ConnOptions::default());
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = backend.exec(&Query::RouterInfo, deadline).await.unwrap_err();
        assert!(matches!(err, Error::NoConnection));
    }

    #[tokio::test]
    async fn test_exec_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // A peer that accepts but never answers.
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let backend = TcpBackend::new(addr, ConnOptions::default());
        let deadline = Instant::now() + Duration::from_millis(100);
        let err = backend.exec(&Query::RouterInfo, deadline).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout));
    }

    #[tokio::test]
    async fn test_envelope_carries_credentials() {
        let backend = TcpBackend::new(
            "127.0.0.1:1".into(),
            ConnOptions {
                user: "guard".into(),
                password: "secret".into(),
                ..ConnOptions::default()
            },
        );
        let wire = backend.envelope(&Query::Replication);
        assert_eq!(wire["user"], "guard");
        assert_eq!(wire["password"], "secret");

        let anonymous = TcpBackend::new("127.0.0.1:1".into(), ConnOptions::default());
        let wire = anonymous.envelope(&Query::Replication);
        assert!(wire.get("user").is_none());
    }
}
