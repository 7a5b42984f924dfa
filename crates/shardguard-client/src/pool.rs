use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::BackendFactory;
use crate::connector::Connector;
use crate::query::ConnOptions;

/// Operator-supplied URI rewrite table. Applied after the user info is
/// stripped, so the keys are bare `host:port` addresses.
pub type OverrideUriRules = HashMap<String, String>;

/// URI-keyed lazy connection pool.
///
/// The first lookup for a URI constructs the client under the write lock;
/// subsequent lookups take the read lock and return the same client.
pub struct ConnPool {
    template: ConnOptions,
    rules: OverrideUriRules,
    factory: Arc<dyn BackendFactory>,
    conns: RwLock<HashMap<String, Arc<Connector>>>,
}

impl ConnPool {
    pub fn new(
        template: ConnOptions,
        rules: OverrideUriRules,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            template,
            rules,
            factory,
            conns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, uri: &str) -> Arc<Connector> {
        let uri = override_uri(strip_user_info(uri), &self.rules);

        {
            let conns = self.conns.read().await;
            if let Some(conn) = conns.get(uri) {
                return conn.clone();
            }
        }

        let mut conns = self.conns.write().await;
        // Another task may have won the race between the locks.
        if let Some(conn) = conns.get(uri) {
            return conn.clone();
        }

        let backend = self.factory.connect(uri, &self.template);
        let conn = Arc::new(Connector::new(backend, self.template.clone()));
        conns.insert(uri.to_string(), conn.clone());

        conn
    }

    /// Terminates all clients.
    pub async fn close(&self) {
        let conns = self.conns.write().await;
        for conn in conns.values() {
            conn.close().await;
        }
    }
}

fn strip_user_info(uri: &str) -> &str {
    match uri.find('@') {
        Some(idx) => &uri[idx + 1..],
        None => uri,
    }
}

fn override_uri<'a>(uri: &'a str, rules: &'a OverrideUriRules) -> &'a str {
    rules.get(uri).map(String::as_str).unwrap_or(uri)
}
