//! ShardStore: the shard-local state a split touches.
//!
//! Each shard keeps three redb tables: its physical collections, its
//! routing cache (the ranges it believes it owns, per namespace) and the
//! range deletion collection consumed by the background range deleter.
//! `execute` is the command entry point used by transports.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use mitosis_catalog::{
    ChunkRange, ChunkVersion, MetadataClient, Namespace, RangeDeletionTask, ReadConcern, ShardId,
};

use crate::command::{DropOutcome, ShardCommand, ShardReply};
use crate::error::{ShardError, ShardResult};

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Physical collections keyed by namespace.
const COLLECTIONS: JsonTable = TableDefinition::new("collections");

/// Cached routing tables keyed by namespace.
const ROUTING_CACHE: JsonTable = TableDefinition::new("cache.collections");

/// Range deletion tasks keyed by task id.
const RANGE_DELETIONS: JsonTable = TableDefinition::new("range_deletions");

macro_rules! map_err {
    () => {
        |e| ShardError::Storage(e.to_string())
    };
}

/// A collection physically present on the shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalCollection {
    pub nss: Namespace,
    pub uuid: Uuid,
    pub created_at: u64,
}

/// The shard's view of one sharded collection's routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRoutingTable {
    pub nss: Namespace,
    /// Highest chunk version in the collection, `None` if it has no chunks.
    pub collection_version: Option<ChunkVersion>,
    /// Ranges this shard owns.
    pub owned: Vec<ChunkRange>,
    pub refreshed_at: u64,
}

/// Shard-local state, shareable across tasks.
#[derive(Clone)]
pub struct ShardStore {
    shard_id: ShardId,
    db: Arc<Database>,
    catalog: Arc<dyn MetadataClient>,
}

impl ShardStore {
    /// Open (or create) a persistent shard store at the given path.
    pub fn open(
        shard_id: &str,
        path: &Path,
        catalog: Arc<dyn MetadataClient>,
    ) -> ShardResult<Self> {
        let db = Database::create(path).map_err(map_err!())?;
        let store = Self {
            shard_id: shard_id.to_string(),
            db: Arc::new(db),
            catalog,
        };
        store.ensure_tables()?;
        debug!(shard = %shard_id, ?path, "shard store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory shard store (for testing).
    pub fn open_in_memory(shard_id: &str, catalog: Arc<dyn MetadataClient>) -> ShardResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!())?;
        let store = Self {
            shard_id: shard_id.to_string(),
            db: Arc::new(db),
            catalog,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> ShardResult<()> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        txn.open_table(COLLECTIONS).map_err(map_err!())?;
        txn.open_table(ROUTING_CACHE).map_err(map_err!())?;
        txn.open_table(RANGE_DELETIONS).map_err(map_err!())?;
        txn.commit().map_err(map_err!())?;
        Ok(())
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    // ── Physical collections ───────────────────────────────────────

    /// Create a physical collection. Re-creating an existing one is a no-op.
    pub fn create_collection(&self, nss: &Namespace) -> ShardResult<PhysicalCollection> {
        if let Some(existing) = self.get_collection(nss)? {
            return Ok(existing);
        }
        let coll = PhysicalCollection {
            nss: nss.clone(),
            uuid: Uuid::new_v4(),
            created_at: epoch_secs(),
        };
        let value = serde_json::to_vec(&coll).map_err(map_err!())?;
        let txn = self.db.begin_write().map_err(map_err!())?;
        {
            let mut table = txn.open_table(COLLECTIONS).map_err(map_err!())?;
            table
                .insert(nss.as_str(), value.as_slice())
                .map_err(map_err!())?;
        }
        txn.commit().map_err(map_err!())?;
        debug!(shard = %self.shard_id, %nss, "collection created");
        Ok(coll)
    }

    pub fn get_collection(&self, nss: &Namespace) -> ShardResult<Option<PhysicalCollection>> {
        let txn = self.db.begin_read().map_err(map_err!())?;
        let table = txn.open_table(COLLECTIONS).map_err(map_err!())?;
        match table.get(nss.as_str()).map_err(map_err!())? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(map_err!())?,
            )),
            None => Ok(None),
        }
    }

    /// Collection names (without the db prefix) in `db`.
    pub fn list_collections(&self, db: &str) -> ShardResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!())?;
        let table = txn.open_table(COLLECTIONS).map_err(map_err!())?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!())? {
            let (_, value) = entry.map_err(map_err!())?;
            let coll: PhysicalCollection = serde_json::from_slice(value.value()).map_err(map_err!())?;
            if coll.nss.db() == db {
                names.push(coll.nss.collection().to_string());
            }
        }
        Ok(names)
    }

    /// Drop a physical collection. Returns true if it existed.
    pub fn drop_collection(&self, nss: &Namespace) -> ShardResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        let existed;
        {
            let mut table = txn.open_table(COLLECTIONS).map_err(map_err!())?;
            existed = table.remove(nss.as_str()).map_err(map_err!())?.is_some();
        }
        txn.commit().map_err(map_err!())?;
        debug!(shard = %self.shard_id, %nss, existed, "collection dropped");
        Ok(existed)
    }

    // ── Range deletions ────────────────────────────────────────────

    /// Insert a batch of tasks in a single transaction.
    pub fn insert_range_deletions(&self, tasks: &[RangeDeletionTask]) -> ShardResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        {
            let mut table = txn.open_table(RANGE_DELETIONS).map_err(map_err!())?;
            for task in tasks {
                let key = task.id.to_string();
                let value = serde_json::to_vec(task).map_err(map_err!())?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!())?;
            }
        }
        txn.commit().map_err(map_err!())?;
        debug!(shard = %self.shard_id, count = tasks.len(), "range deletion tasks inserted");
        Ok(tasks.len())
    }

    /// All pending range deletion tasks.
    pub fn list_range_deletions(&self) -> ShardResult<Vec<RangeDeletionTask>> {
        let txn = self.db.begin_read().map_err(map_err!())?;
        let table = txn.open_table(RANGE_DELETIONS).map_err(map_err!())?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!())? {
            let (_, value) = entry.map_err(map_err!())?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!())?);
        }
        Ok(results)
    }

    // ── Routing cache ──────────────────────────────────────────────

    pub fn routing_cache(&self, nss: &Namespace) -> ShardResult<Option<CachedRoutingTable>> {
        let txn = self.db.begin_read().map_err(map_err!())?;
        let table = txn.open_table(ROUTING_CACHE).map_err(map_err!())?;
        match table.get(nss.as_str()).map_err(map_err!())? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(map_err!())?,
            )),
            None => Ok(None),
        }
    }

    /// Rebuild the cached routing table for `nss` from the catalog.
    pub async fn refresh_routing_cache(&self, nss: &Namespace) -> ShardResult<CachedRoutingTable> {
        let chunks = self
            .catalog
            .chunks_of_collection(nss, ReadConcern::Majority)
            .await?;

        let collection_version = chunks
            .iter()
            .map(|c| c.version)
            .max_by_key(|v| (v.major, v.minor));
        let owned = chunks
            .iter()
            .filter(|c| c.shard == self.shard_id)
            .map(|c| c.range())
            .collect();
        let cached = CachedRoutingTable {
            nss: nss.clone(),
            collection_version,
            owned,
            refreshed_at: epoch_secs(),
        };

        let value = serde_json::to_vec(&cached).map_err(map_err!())?;
        let txn = self.db.begin_write().map_err(map_err!())?;
        {
            let mut table = txn.open_table(ROUTING_CACHE).map_err(map_err!())?;
            table
                .insert(nss.as_str(), value.as_slice())
                .map_err(map_err!())?;
        }
        txn.commit().map_err(map_err!())?;

        debug!(
            shard = %self.shard_id,
            %nss,
            owned = cached.owned.len(),
            version = ?cached.collection_version,
            "routing cache refreshed"
        );
        Ok(cached)
    }

    // ── Command entry point ────────────────────────────────────────

    /// Run one command against this shard.
    pub async fn execute(&self, command: ShardCommand) -> ShardResult<ShardReply> {
        match command {
            ShardCommand::FlushRoutingTableCacheUpdates {
                nss,
                sync_from_config,
            } => {
                if sync_from_config || self.routing_cache(&nss)?.is_none() {
                    self.refresh_routing_cache(&nss).await?;
                }
                Ok(ShardReply::Ok)
            }
            ShardCommand::ListCollections { db } => Ok(ShardReply::Collections {
                names: self.list_collections(&db)?,
            }),
            ShardCommand::Drop { db, collection } => {
                let nss = Namespace::new(&db, &collection);
                if self.drop_collection(&nss)? {
                    info!(shard = %self.shard_id, %nss, "dropped collection");
                    Ok(ShardReply::Dropped(DropOutcome::dropped()))
                } else {
                    Ok(ShardReply::Dropped(DropOutcome::namespace_not_found(&nss)))
                }
            }
            ShardCommand::InsertRangeDeletions { tasks } => Ok(ShardReply::Inserted {
                count: self.insert_range_deletions(&tasks)?,
            }),
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use mitosis_catalog::{CatalogStore, Chunk, ClusterTimestamp};
    use serde_json::json;

    use super::*;
    use crate::command::ErrorCode;

    fn catalog_with_chunks() -> CatalogStore {
        let catalog = CatalogStore::open_in_memory().unwrap();
        let nss = Namespace::new("test4", "coll4");
        let epoch = Uuid::new_v4();
        for (i, shard) in ["rs0", "newShard"].iter().enumerate() {
            catalog
                .put_chunk(&Chunk {
                    nss: nss.clone(),
                    min: json!({ "_id": i * 10 }),
                    max: json!({ "_id": (i + 1) * 10 }),
                    shard: shard.to_string(),
                    version: ChunkVersion::new(epoch, 1, i as u32),
                    last_modified: ClusterTimestamp::new(1, 0),
                })
                .unwrap();
        }
        catalog
    }

    fn shard(id: &str, catalog: CatalogStore) -> ShardStore {
        ShardStore::open_in_memory(id, Arc::new(catalog)).unwrap()
    }

    #[test]
    fn collections_list_by_db() {
        let store = shard("rs0", CatalogStore::open_in_memory().unwrap());
        store.create_collection(&Namespace::new("test1", "coll1")).unwrap();
        store.create_collection(&Namespace::new("test1", "coll2")).unwrap();
        store.create_collection(&Namespace::new("test2", "coll1")).unwrap();

        assert_eq!(store.list_collections("test1").unwrap(), vec!["coll1", "coll2"]);
        assert!(store.list_collections("nope").unwrap().is_empty());
    }

    #[test]
    fn create_collection_is_idempotent() {
        let store = shard("rs0", CatalogStore::open_in_memory().unwrap());
        let nss = Namespace::new("test1", "coll1");
        let first = store.create_collection(&nss).unwrap();
        let second = store.create_collection(&nss).unwrap();
        assert_eq!(first.uuid, second.uuid);
    }

    #[tokio::test]
    async fn drop_missing_collection_reports_namespace_not_found() {
        let store = shard("rs0", CatalogStore::open_in_memory().unwrap());
        store.create_collection(&Namespace::new("test1", "coll1")).unwrap();

        let drop = |coll: &str| ShardCommand::Drop {
            db: "test1".to_string(),
            collection: coll.to_string(),
        };
        let first = store.execute(drop("coll1")).await.unwrap();
        assert_eq!(first, ShardReply::Dropped(DropOutcome::dropped()));

        let ShardReply::Dropped(second) = store.execute(drop("coll1")).await.unwrap() else {
            panic!("expected drop reply");
        };
        assert_eq!(second.command_error.unwrap().code, ErrorCode::NamespaceNotFound);
        assert!(second.write_concern_error.is_none());
    }

    #[tokio::test]
    async fn refresh_caches_owned_ranges_and_collection_version() {
        let store = shard("newShard", catalog_with_chunks());
        let nss = Namespace::new("test4", "coll4");
        assert!(store.routing_cache(&nss).unwrap().is_none());

        let reply = store
            .execute(ShardCommand::FlushRoutingTableCacheUpdates {
                nss: nss.clone(),
                sync_from_config: true,
            })
            .await
            .unwrap();
        assert_eq!(reply, ShardReply::Ok);

        let cached = store.routing_cache(&nss).unwrap().unwrap();
        assert_eq!(cached.owned.len(), 1);
        assert_eq!(cached.owned[0].min, json!({"_id": 10}));
        assert_eq!(cached.collection_version.unwrap().minor, 1);
    }

    #[tokio::test]
    async fn insert_range_deletions_persists_batch() {
        let store = shard("rs0", CatalogStore::open_in_memory().unwrap());
        let tasks: Vec<RangeDeletionTask> = (0..3)
            .map(|i| {
                RangeDeletionTask::delayed(
                    Namespace::new("test5", "coll5"),
                    Uuid::nil(),
                    "newShard",
                    ChunkRange {
                        min: json!({ "_id": i }),
                        max: json!({ "_id": i + 1 }),
                    },
                )
            })
            .collect();

        let reply = store
            .execute(ShardCommand::InsertRangeDeletions { tasks })
            .await
            .unwrap();
        assert_eq!(reply, ShardReply::Inserted { count: 3 });
        assert_eq!(store.list_range_deletions().unwrap().len(), 3);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.redb");
        let catalog: Arc<dyn MetadataClient> = Arc::new(CatalogStore::open_in_memory().unwrap());

        {
            let store = ShardStore::open("rs0", &path, catalog.clone()).unwrap();
            store.create_collection(&Namespace::new("test1", "coll1")).unwrap();
        }

        let store = ShardStore::open("rs0", &path, catalog).unwrap();
        assert_eq!(store.list_collections("test1").unwrap(), vec!["coll1"]);
    }
}
