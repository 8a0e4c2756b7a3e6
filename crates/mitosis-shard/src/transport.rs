//! Transport seam between the shard proxy and shard hosts.
//!
//! A transport makes exactly one delivery attempt; retries and deadlines
//! belong to [`crate::proxy::ShardProxy`]. `LocalTransport` routes commands
//! to in-process [`ShardStore`]s by host string, which is how the
//! standalone daemon and the tests run a whole cluster in one process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{ShardCommand, ShardReply};
use crate::error::{ShardError, ShardResult};
use crate::store::ShardStore;

/// One-shot delivery of a command to a shard host.
#[async_trait]
pub trait ShardTransport: Send + Sync {
    async fn send(&self, host: &str, command: ShardCommand) -> ShardResult<ShardReply>;
}

/// In-process transport: host string → shard store.
#[derive(Default)]
pub struct LocalTransport {
    shards: RwLock<HashMap<String, ShardStore>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` reachable at `host`, replacing any previous binding.
    pub fn register(&self, host: &str, store: ShardStore) {
        debug!(%host, shard = %store.shard_id(), "shard host registered");
        self.shards
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(host.to_string(), store);
    }

    /// Remove the binding for `host`; later sends are unreachable.
    pub fn unregister(&self, host: &str) -> bool {
        self.shards
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(host)
            .is_some()
    }

    /// The store bound to `host`, if any.
    pub fn shard(&self, host: &str) -> Option<ShardStore> {
        self.shards
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(host)
            .cloned()
    }
}

#[async_trait]
impl ShardTransport for LocalTransport {
    async fn send(&self, host: &str, command: ShardCommand) -> ShardResult<ShardReply> {
        let store = self.shard(host).ok_or_else(|| ShardError::Unreachable {
            host: host.to_string(),
            reason: "no shard bound to host".to_string(),
        })?;
        store.execute(command).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mitosis_catalog::{CatalogStore, Namespace};

    use super::*;

    fn store(id: &str) -> ShardStore {
        ShardStore::open_in_memory(id, Arc::new(CatalogStore::open_in_memory().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn routes_by_host() {
        let transport = LocalTransport::new();
        let rs0 = store("rs0");
        rs0.create_collection(&Namespace::new("test1", "coll1")).unwrap();
        transport.register("rs0/localhost:27018", rs0);
        transport.register("newShard/localhost:27019", store("newShard"));

        let list = ShardCommand::ListCollections {
            db: "test1".to_string(),
        };
        let on_rs0 = transport.send("rs0/localhost:27018", list.clone()).await.unwrap();
        let on_new = transport.send("newShard/localhost:27019", list).await.unwrap();

        assert_eq!(
            on_rs0,
            ShardReply::Collections {
                names: vec!["coll1".to_string()]
            }
        );
        assert_eq!(on_new, ShardReply::Collections { names: vec![] });
    }

    #[tokio::test]
    async fn unknown_host_is_unreachable() {
        let transport = LocalTransport::new();
        transport.register("rs0/a:1", store("rs0"));
        assert!(transport.unregister("rs0/a:1"));

        let err = transport
            .send(
                "rs0/a:1",
                ShardCommand::ListCollections {
                    db: "x".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::Unreachable { .. }));
    }
}
