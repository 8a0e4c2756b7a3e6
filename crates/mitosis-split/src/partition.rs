//! Ownership partitioner: decides what moves to the new shard.
//!
//! Pure and deterministic: each list is cut at its midpoint in the order
//! the catalog returned it. The first `ceil(N/2)` entries stay with the
//! source shard and the last `floor(N/2)` move.

use mitosis_catalog::{Chunk, DatabaseEntry};

/// In-memory result of partitioning one shard's holdings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnershipSplitPlan {
    pub staying_chunks: Vec<Chunk>,
    pub moving_chunks: Vec<Chunk>,
    pub staying_databases: Vec<DatabaseEntry>,
    pub moving_databases: Vec<DatabaseEntry>,
}

impl OwnershipSplitPlan {
    /// True when nothing changes owner.
    pub fn is_empty(&self) -> bool {
        self.moving_chunks.is_empty() && self.moving_databases.is_empty()
    }

    /// Whether database `name` is among the moving ones.
    pub fn database_moves(&self, name: &str) -> bool {
        self.moving_databases.iter().any(|db| db.name == name)
    }

    /// Every chunk the source owned before the split, in original order.
    pub fn all_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.staying_chunks.iter().chain(&self.moving_chunks)
    }

    /// Every database the source owned before the split, in original order.
    pub fn all_databases(&self) -> impl Iterator<Item = &DatabaseEntry> {
        self.staying_databases.iter().chain(&self.moving_databases)
    }
}

/// Split the source shard's databases and chunks into staying and moving halves.
pub fn partition(databases: Vec<DatabaseEntry>, chunks: Vec<Chunk>) -> OwnershipSplitPlan {
    let (staying_databases, moving_databases) = split_half(databases);
    let (staying_chunks, moving_chunks) = split_half(chunks);
    OwnershipSplitPlan {
        staying_chunks,
        moving_chunks,
        staying_databases,
        moving_databases,
    }
}

fn split_half<T>(mut items: Vec<T>) -> (Vec<T>, Vec<T>) {
    let keep = items.len().div_ceil(2);
    let moving = items.split_off(keep);
    (items, moving)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use mitosis_catalog::{ChunkVersion, ClusterTimestamp, Namespace};

    use super::*;

    fn chunks(n: usize) -> Vec<Chunk> {
        let epoch = Uuid::new_v4();
        (0..n)
            .map(|i| Chunk {
                nss: Namespace::new("test1", "coll1"),
                min: json!({"_id": i * 10}),
                max: json!({"_id": (i + 1) * 10}),
                shard: "rs0".to_string(),
                version: ChunkVersion::new(epoch, 1, i as u32),
                last_modified: ClusterTimestamp::default(),
            })
            .collect()
    }

    fn dbs(names: &[&str]) -> Vec<DatabaseEntry> {
        names.iter().map(|n| DatabaseEntry::new(n, "rs0")).collect()
    }

    #[test]
    fn even_lists_split_in_half() {
        let input = chunks(4);
        let plan = partition(dbs(&["test1", "test2"]), input.clone());

        assert_eq!(plan.staying_chunks, input[..2]);
        assert_eq!(plan.moving_chunks, input[2..]);
        assert_eq!(plan.staying_databases[0].name, "test1");
        assert_eq!(plan.moving_databases[0].name, "test2");
        assert!(plan.database_moves("test2"));
        assert!(!plan.database_moves("test1"));
    }

    #[test]
    fn odd_lists_keep_the_larger_half() {
        let plan = partition(dbs(&["a", "b", "c"]), chunks(5));
        assert_eq!(plan.staying_chunks.len(), 3);
        assert_eq!(plan.moving_chunks.len(), 2);
        assert_eq!(plan.staying_databases.len(), 2);
        assert_eq!(plan.moving_databases.len(), 1);
        assert!(plan.database_moves("c"));
    }

    #[test]
    fn single_item_stays() {
        let plan = partition(dbs(&["only"]), chunks(1));
        assert!(plan.is_empty());
        assert_eq!(plan.staying_chunks.len(), 1);
    }

    #[test]
    fn empty_input_is_empty_plan() {
        let plan = partition(Vec::new(), Vec::new());
        assert!(plan.is_empty());
        assert_eq!(plan, OwnershipSplitPlan::default());
    }

    #[test]
    fn halves_are_disjoint_and_cover_input() {
        for n in 0..9 {
            let input = chunks(n);
            let plan = partition(Vec::new(), input.clone());
            assert_eq!(plan.moving_chunks.len(), n / 2);
            assert_eq!(plan.staying_chunks.len(), n.div_ceil(2));

            let rejoined: Vec<Chunk> = plan.all_chunks().cloned().collect();
            assert_eq!(rejoined, input);
        }
    }

    #[test]
    fn partition_is_deterministic() {
        let input = chunks(6);
        let names = dbs(&["x", "y", "z"]);
        assert_eq!(
            partition(names.clone(), input.clone()),
            partition(names, input)
        );
    }
}
