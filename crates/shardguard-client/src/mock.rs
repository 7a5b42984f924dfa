//! Scriptable in-memory backend.
//!
//! Mirrors a whole cluster behind the [`Backend`] seam: probe replies are
//! configured per URI, nodes can be taken down, and every applied
//! promotion is both recorded and executed against an in-memory sharding
//! configuration so tests can assert on the resulting roles.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use shardguard_common::{Error, InstanceId, ReplicaSetId, Result};

use crate::backend::{Backend, BackendFactory};
use crate::query::{ConnOptions, Query};

/// One applied `promote_master` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRecord {
    pub uri: String,
    pub set: ReplicaSetId,
    pub master: InstanceId,
}

#[derive(Default)]
struct MockState {
    router_info: HashMap<String, Value>,
    replication: HashMap<String, Value>,
    instance_info: HashMap<String, Value>,
    down: HashSet<String>,
    fail_promote: HashSet<String>,
    promotions: Vec<PromotionRecord>,
    // set id -> instance id -> is master
    sharding: HashMap<ReplicaSetId, HashMap<InstanceId, bool>>,
}

/// Shared scripted state of a mock cluster.
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn set_router_info(&self, uri: &str, reply: Value) {
        self.state
            .lock()
            .unwrap()
            .router_info
            .insert(uri.to_string(), reply);
    }

    pub fn set_replication(&self, uri: &str, reply: Value) {
        self.state
            .lock()
            .unwrap()
            .replication
            .insert(uri.to_string(), reply);
    }

    pub fn set_instance_info(&self, uri: &str, reply: Value) {
        self.state
            .lock()
            .unwrap()
            .instance_info
            .insert(uri.to_string(), reply);
    }

    /// The node stops answering anything until restored.
    pub fn take_down(&self, uri: &str) {
        self.state.lock().unwrap().down.insert(uri.to_string());
    }

    pub fn restore(&self, uri: &str) {
        self.state.lock().unwrap().down.remove(uri);
    }

    /// Promotions on this node fail while everything else keeps working.
    pub fn fail_promotions_on(&self, uri: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_promote
            .insert(uri.to_string());
    }

    /// Seeds the in-memory sharding configuration of one replica set.
    pub fn seed_set(&self, set: &str, members: &[&str], master: &str) {
        let roles = members
            .iter()
            .map(|id| (id.to_string(), *id == master))
            .collect();
        self.state
            .lock()
            .unwrap()
            .sharding
            .insert(set.to_string(), roles);
    }

    /// Roles of one replica set after the applied promotions.
    pub fn roles_of(&self, set: &str) -> Option<HashMap<InstanceId, bool>> {
        self.state.lock().unwrap().sharding.get(set).cloned()
    }

    pub fn promotions(&self) -> Vec<PromotionRecord> {
        self.state.lock().unwrap().promotions.clone()
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

struct MockBackend {
    uri: String,
    cluster: Arc<MockCluster>,
}

#[async_trait]
impl Backend for MockBackend {
    async fn exec(&self, query: &Query, _deadline: Instant) -> Result<Value> {
        let mut state = self.cluster.state.lock().unwrap();
        if state.down.contains(&self.uri) {
            return Err(Error::NoConnection);
        }

        match query {
            Query::RouterInfo => state
                .router_info
                .get(&self.uri)
                .cloned()
                .ok_or(Error::NoConnection),
            Query::Replication => state
                .replication
                .get(&self.uri)
                .cloned()
                .ok_or(Error::NoConnection),
            Query::InstanceInfo => state
                .instance_info
                .get(&self.uri)
                .cloned()
                .ok_or(Error::NoConnection),
            Query::PromoteMaster { set, master } => {
                if state.fail_promote.contains(&self.uri) {
                    return Err(Error::NoConnection);
                }
                state.promotions.push(PromotionRecord {
                    uri: self.uri.clone(),
                    set: set.clone(),
                    master: master.clone(),
                });
                if let Some(roles) = state.sharding.get_mut(set) {
                    for (id, is_master) in roles.iter_mut() {
                        *is_master = id == master;
                    }
                }
                Ok(json!({"ok": true}))
            }
        }
    }

    async fn reset(&self) {}

    async fn close(&self) {}
}

/// Factory wiring every URI to the shared [`MockCluster`].
pub struct MockBackendFactory {
    cluster: Arc<MockCluster>,
}

impl MockBackendFactory {
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        Self { cluster }
    }
}

impl BackendFactory for MockBackendFactory {
    fn connect(&self, uri: &str, _opts: &ConnOptions) -> Arc<dyn Backend> {
        Arc::new(MockBackend {
            uri: uri.to_string(),
            cluster: self.cluster.clone(),
        })
    }
}
