//! `MetadataClient`: the async read/write surface of the cluster catalog.
//!
//! Orchestration code and shards talk to the catalog only through this
//! trait, so tests can substitute a store with injected failures.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::store::CatalogStore;
use crate::types::*;

/// Access to authoritative ownership records.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Databases whose primary shard is `shard`.
    async fn databases_owned_by(&self, shard: &str) -> CatalogResult<Vec<DatabaseEntry>>;

    /// Chunks currently owned by `shard`, in catalog order.
    async fn chunks_owned_by(
        &self,
        shard: &str,
        read_concern: ReadConcern,
    ) -> CatalogResult<Vec<Chunk>>;

    /// Every chunk of one collection, regardless of owner.
    async fn chunks_of_collection(
        &self,
        nss: &Namespace,
        read_concern: ReadConcern,
    ) -> CatalogResult<Vec<Chunk>>;

    /// Sharded collections of a database.
    async fn collections_of_database(
        &self,
        db: &str,
        read_concern: ReadConcern,
    ) -> CatalogResult<Vec<CollectionIdentity>>;

    /// Identity of one sharded collection; `NotFound` if untracked.
    async fn get_collection(
        &self,
        nss: &Namespace,
        read_concern: ReadConcern,
    ) -> CatalogResult<CollectionIdentity>;

    /// Registry entry of a shard; `NotFound` if unknown.
    async fn get_shard(&self, id: &str) -> CatalogResult<ShardEntry>;

    /// Atomically hand `chunks` from `from_shard` to `to_shard`.
    async fn commit_chunk_ownership(
        &self,
        chunks: &[Chunk],
        from_shard: &str,
        to_shard: &str,
        timestamp: ClusterTimestamp,
    ) -> CatalogResult<()>;

    /// Rewrite the primary shard of `db`; `NotFound` if the entry is gone.
    async fn commit_database_primary(&self, db: &str, new_shard: &str) -> CatalogResult<()>;
}

// The embedded store is linearizable, so both read concerns observe the
// latest committed state.
#[async_trait]
impl MetadataClient for CatalogStore {
    async fn databases_owned_by(&self, shard: &str) -> CatalogResult<Vec<DatabaseEntry>> {
        CatalogStore::databases_owned_by(self, shard)
    }

    async fn chunks_owned_by(
        &self,
        shard: &str,
        read_concern: ReadConcern,
    ) -> CatalogResult<Vec<Chunk>> {
        debug!(%shard, ?read_concern, "loading owned chunks");
        CatalogStore::chunks_owned_by(self, shard)
    }

    async fn chunks_of_collection(
        &self,
        nss: &Namespace,
        _read_concern: ReadConcern,
    ) -> CatalogResult<Vec<Chunk>> {
        self.list_chunks_for_collection(nss)
    }

    async fn collections_of_database(
        &self,
        db: &str,
        _read_concern: ReadConcern,
    ) -> CatalogResult<Vec<CollectionIdentity>> {
        Ok(CatalogStore::collections_of_database(self, db)?
            .iter()
            .map(CollectionEntry::identity)
            .collect())
    }

    async fn get_collection(
        &self,
        nss: &Namespace,
        _read_concern: ReadConcern,
    ) -> CatalogResult<CollectionIdentity> {
        match CatalogStore::get_collection(self, nss)? {
            Some(coll) if !coll.dropped => Ok(coll.identity()),
            _ => Err(CatalogError::NotFound(format!("collection {nss}"))),
        }
    }

    async fn get_shard(&self, id: &str) -> CatalogResult<ShardEntry> {
        CatalogStore::get_shard(self, id)?
            .ok_or_else(|| CatalogError::NotFound(format!("shard {id}")))
    }

    async fn commit_chunk_ownership(
        &self,
        chunks: &[Chunk],
        from_shard: &str,
        to_shard: &str,
        timestamp: ClusterTimestamp,
    ) -> CatalogResult<()> {
        CatalogStore::commit_chunk_ownership(self, chunks, from_shard, to_shard, timestamp)?;
        Ok(())
    }

    async fn commit_database_primary(&self, db: &str, new_shard: &str) -> CatalogResult<()> {
        CatalogStore::commit_database_primary(self, db, new_shard)?;
        Ok(())
    }
}
