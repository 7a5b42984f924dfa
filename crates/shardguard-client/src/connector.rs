use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use shardguard_common::{Error, Result};

use crate::backend::Backend;
use crate::query::{ConnOptions, Query};

/// Attempts per exec. A transient failure tears the connection down and
/// retries once; anything else is returned verbatim.
const MAX_RETRIES: usize = 2;

/// Retrying wrapper around one [`Backend`]. The pool hands out one
/// connector per sanitized URI and every component shares it.
pub struct Connector {
    backend: Arc<dyn Backend>,
    opts: ConnOptions,
}

impl Connector {
    pub fn new(backend: Arc<dyn Backend>, opts: ConnOptions) -> Self {
        Self { backend, opts }
    }

    /// Executes a query under the per-call budget from the connection
    /// options.
    pub async fn exec(&self, query: &Query) -> Result<Value> {
        let deadline = Instant::now() + self.opts.request_timeout * MAX_RETRIES as u32;
        self.exec_until(query, deadline).await
    }

    /// Executes a query, finishing no later than `deadline`. Each attempt
    /// is additionally bounded by the per-call request timeout. An already
    /// expired deadline returns a timeout without issuing the call.
    pub async fn exec_until(&self, query: &Query, deadline: Instant) -> Result<Value> {
        let mut last = Error::RequestTimeout;

        for _ in 0..MAX_RETRIES {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::RequestTimeout);
            }
            let attempt_deadline = deadline.min(now + self.opts.request_timeout);

            match self.backend.exec(query, attempt_deadline).await {
                Err(err) if err.is_retryable() => {
                    tracing::debug!(%err, "transient exec error, dropping the connection");
                    self.backend.reset().await;
                    last = err;
                }
                other => return other,
            }
        }

        Err(last)
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}
