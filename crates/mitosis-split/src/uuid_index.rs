//! Namespace → collection UUID index for the source shard's databases.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use mitosis_catalog::{CatalogResult, DatabaseEntry, MetadataClient, Namespace, ReadConcern};

/// Sharded collections of a set of databases, keyed by namespace.
///
/// Built once per run; anything listed here is sharded and therefore never
/// treated as an orphaned unsharded collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UuidIndex {
    by_nss: BTreeMap<Namespace, Uuid>,
}

impl UuidIndex {
    /// Load the sharded collections of every database in `databases`.
    pub async fn build<'a>(
        catalog: &dyn MetadataClient,
        databases: impl IntoIterator<Item = &'a DatabaseEntry>,
    ) -> CatalogResult<Self> {
        let mut index = Self::default();
        for db in databases {
            for coll in catalog
                .collections_of_database(&db.name, ReadConcern::Local)
                .await?
            {
                index.insert(coll.nss, coll.uuid);
            }
        }
        debug!(collections = index.len(), "built collection uuid index");
        Ok(index)
    }

    pub fn insert(&mut self, nss: Namespace, uuid: Uuid) {
        self.by_nss.insert(nss, uuid);
    }

    pub fn get(&self, nss: &Namespace) -> Option<Uuid> {
        self.by_nss.get(nss).copied()
    }

    pub fn contains(&self, nss: &Namespace) -> bool {
        self.by_nss.contains_key(nss)
    }

    pub fn len(&self) -> usize {
        self.by_nss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nss.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use mitosis_catalog::{CatalogStore, CollectionEntry};

    use super::*;

    fn collection(db: &str, coll: &str, dropped: bool) -> CollectionEntry {
        CollectionEntry {
            nss: Namespace::new(db, coll),
            uuid: Uuid::new_v4(),
            epoch: Uuid::new_v4(),
            key_pattern: json!({"_id": 1}),
            dropped,
        }
    }

    #[tokio::test]
    async fn indexes_live_collections_of_given_databases() {
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let live = collection("test1", "coll1", false);
        store.put_collection(&live).unwrap();
        store.put_collection(&collection("test1", "old", true)).unwrap();
        store.put_collection(&collection("other", "coll", false)).unwrap();

        let dbs = [DatabaseEntry::new("test1", "rs0")];
        let index = UuidIndex::build(store.as_ref(), &dbs).await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&live.nss), Some(live.uuid));
        assert!(!index.contains(&Namespace::new("test1", "old")));
        assert!(!index.contains(&Namespace::new("other", "coll")));
    }
}
