//! CatalogStore: redb-backed persistence for cluster ownership metadata.
//!
//! Provides typed CRUD over databases, chunks, sharded collections and the
//! shard registry, plus the two ownership commits used by split-shard.
//! Every commit runs in a single redb write transaction, so readers observe
//! either the whole ownership change or none of it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `CatalogError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CatalogError::$variant(e.to_string())
    };
}

/// Thread-safe catalog store backed by redb.
#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    /// Open (or create) a persistent catalog at the given path.
    pub fn open(path: &Path) -> CatalogResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "catalog store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory catalog (for testing).
    pub fn open_in_memory() -> CatalogResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory catalog store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> CatalogResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DATABASES).map_err(map_err!(Table))?;
        txn.open_table(CHUNKS).map_err(map_err!(Table))?;
        txn.open_table(COLLECTIONS).map_err(map_err!(Table))?;
        txn.open_table(SHARDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Upsert a single JSON record.
    fn put_record<T: serde::Serialize>(
        &self,
        table_def: JsonTable,
        key: &str,
        record: &T,
    ) -> CatalogResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        table_def: JsonTable,
        key: &str,
    ) -> CatalogResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Scan a table in key order, keeping the records accepted by `keep`.
    fn scan_records<T, F>(
        &self,
        table_def: JsonTable,
        mut keep: F,
    ) -> CatalogResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Databases ──────────────────────────────────────────────────

    /// Insert or update a database entry.
    pub fn put_database(&self, entry: &DatabaseEntry) -> CatalogResult<()> {
        self.put_record(DATABASES, &entry.name, entry)?;
        debug!(db = %entry.name, primary = %entry.primary, "database entry stored");
        Ok(())
    }

    pub fn get_database(&self, name: &str) -> CatalogResult<Option<DatabaseEntry>> {
        self.get_record(DATABASES, name)
    }

    pub fn list_databases(&self) -> CatalogResult<Vec<DatabaseEntry>> {
        self.scan_records(DATABASES, |_: &DatabaseEntry| true)
    }

    /// Databases whose primary is `shard`, ordered by name.
    pub fn databases_owned_by(&self, shard: &str) -> CatalogResult<Vec<DatabaseEntry>> {
        self.scan_records(DATABASES, |db: &DatabaseEntry| db.primary == shard)
    }

    /// Delete a database entry. Returns true if it existed.
    pub fn delete_database(&self, name: &str) -> CatalogResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DATABASES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(db = %name, existed, "database entry deleted");
        Ok(existed)
    }

    // ── Chunks ─────────────────────────────────────────────────────

    /// Insert or update a chunk.
    pub fn put_chunk(&self, chunk: &Chunk) -> CatalogResult<()> {
        self.put_record(CHUNKS, &chunk.table_key(), chunk)
    }

    /// Get a chunk by its composite key.
    pub fn get_chunk(&self, key: &str) -> CatalogResult<Option<Chunk>> {
        self.get_record(CHUNKS, key)
    }

    /// All chunks of one collection, ordered by lower bound.
    pub fn list_chunks_for_collection(&self, nss: &Namespace) -> CatalogResult<Vec<Chunk>> {
        let mut chunks = self.scan_records(CHUNKS, |c: &Chunk| &c.nss == nss)?;
        chunks.sort_by(compare_chunks);
        Ok(chunks)
    }

    /// Chunks owned by `shard`, ordered by namespace then lower bound.
    pub fn chunks_owned_by(&self, shard: &str) -> CatalogResult<Vec<Chunk>> {
        let mut chunks = self.scan_records(CHUNKS, |c: &Chunk| c.shard == shard)?;
        chunks.sort_by(compare_chunks);
        Ok(chunks)
    }

    // ── Collections ────────────────────────────────────────────────

    /// Insert or update a sharded collection record.
    pub fn put_collection(&self, coll: &CollectionEntry) -> CatalogResult<()> {
        self.put_record(COLLECTIONS, coll.nss.as_str(), coll)
    }

    pub fn get_collection(&self, nss: &Namespace) -> CatalogResult<Option<CollectionEntry>> {
        self.get_record(COLLECTIONS, nss.as_str())
    }

    /// Live (not dropped) sharded collections of a database.
    pub fn collections_of_database(&self, db: &str) -> CatalogResult<Vec<CollectionEntry>> {
        self.scan_records(COLLECTIONS, |c: &CollectionEntry| {
            !c.dropped && c.nss.db() == db
        })
    }

    // ── Shards ─────────────────────────────────────────────────────

    /// Register (or re-point) a shard.
    pub fn put_shard(&self, shard: &ShardEntry) -> CatalogResult<()> {
        self.put_record(SHARDS, &shard.id, shard)?;
        debug!(shard = %shard.id, host = %shard.host, "shard registered");
        Ok(())
    }

    pub fn get_shard(&self, id: &str) -> CatalogResult<Option<ShardEntry>> {
        self.get_record(SHARDS, id)
    }

    pub fn list_shards(&self) -> CatalogResult<Vec<ShardEntry>> {
        self.scan_records(SHARDS, |_: &ShardEntry| true)
    }

    // ── Ownership commits ──────────────────────────────────────────

    /// Move `chunks` from `from_shard` to `to_shard` in one transaction.
    ///
    /// Every chunk must still be stored with `from_shard` as owner and with
    /// exactly the version the caller read; otherwise nothing is written and
    /// `CatalogError::Conflict` is returned. Returns the committed records.
    pub fn commit_chunk_ownership(
        &self,
        chunks: &[Chunk],
        from_shard: &str,
        to_shard: &str,
        timestamp: ClusterTimestamp,
    ) -> CatalogResult<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let staged = {
            let mut table = txn.open_table(CHUNKS).map_err(map_err!(Table))?;
            stage_chunk_moves(&mut table, chunks, from_shard, to_shard, timestamp)
        };
        let committed = match staged {
            Ok(committed) => committed,
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                return Err(e);
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            count = committed.len(),
            from = %from_shard,
            to = %to_shard,
            %timestamp,
            "chunk ownership committed"
        );
        Ok(committed)
    }

    /// Point database `name` at `new_primary`, bumping its version.
    pub fn commit_database_primary(
        &self,
        name: &str,
        new_primary: &str,
    ) -> CatalogResult<DatabaseEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(DATABASES).map_err(map_err!(Table))?;
            let current: Option<DatabaseEntry> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                Some(mut entry) => {
                    entry.primary = new_primary.to_string();
                    entry.version.last_mod += 1;
                    let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
                    table
                        .insert(name, value.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(entry)
                }
                None => None,
            }
        };
        let Some(entry) = updated else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(CatalogError::NotFound(format!("database {name}")));
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(db = %name, primary = %new_primary, last_mod = entry.version.last_mod, "database primary committed");
        Ok(entry)
    }
}

/// Validate and rewrite the moving chunks inside an open write transaction.
///
/// Moved chunks of a collection get `major = max_major + 1` and consecutive
/// minors in input order, so every shard's cached collection version is
/// strictly behind the new one.
fn stage_chunk_moves(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    chunks: &[Chunk],
    from_shard: &str,
    to_shard: &str,
    timestamp: ClusterTimestamp,
) -> CatalogResult<Vec<Chunk>> {
    for chunk in chunks {
        let key = chunk.table_key();
        let stored: Chunk = match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => return Err(CatalogError::Conflict(format!("chunk {key} no longer exists"))),
        };
        if stored.shard != from_shard {
            return Err(CatalogError::Conflict(format!(
                "chunk {key} is owned by {}, expected {from_shard}",
                stored.shard
            )));
        }
        if stored.version != chunk.version {
            return Err(CatalogError::Conflict(format!(
                "chunk {key} is at version {}, caller saw {}",
                stored.version, chunk.version
            )));
        }
    }

    // Highest major version per touched collection, across all shards.
    let mut max_major: BTreeMap<Namespace, u32> = BTreeMap::new();
    for chunk in chunks {
        max_major.entry(chunk.nss.clone()).or_insert(0);
    }
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let stored: Chunk = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        if let Some(major) = max_major.get_mut(&stored.nss) {
            *major = (*major).max(stored.version.major);
        }
    }

    let mut next_minor: BTreeMap<Namespace, u32> = BTreeMap::new();
    let mut committed = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let major = max_major.get(&chunk.nss).copied().unwrap_or(0) + 1;
        let minor = next_minor.entry(chunk.nss.clone()).or_insert(0);
        let mut moved = chunk.clone();
        moved.shard = to_shard.to_string();
        moved.version = ChunkVersion::new(chunk.version.epoch, major, *minor);
        moved.last_modified = timestamp;
        *minor += 1;

        let value = serde_json::to_vec(&moved).map_err(map_err!(Serialize))?;
        table
            .insert(moved.table_key().as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        committed.push(moved);
    }
    Ok(committed)
}
