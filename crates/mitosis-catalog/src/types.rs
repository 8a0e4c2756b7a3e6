//! Domain types for the cluster catalog.
//!
//! These records describe who owns what: database primaries, chunk ranges
//! of sharded collections, collection identities and the shard registry.
//! All types are serializable to/from JSON for storage in redb tables and
//! for transport to shards.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a shard in the cluster.
pub type ShardId = String;

/// Name of the metadata authority's internal database.
pub const CONFIG_DB: &str = "config";

// ── Namespace ─────────────────────────────────────────────────────

/// Fully-qualified collection name, `{db}.{collection}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Build a namespace from its database and collection parts.
    pub fn new(db: &str, collection: &str) -> Self {
        Self(format!("{db}.{collection}"))
    }

    /// Parse a `{db}.{collection}` string. Both parts must be non-empty.
    pub fn parse(full: &str) -> Option<Self> {
        let (db, coll) = full.split_once('.')?;
        if db.is_empty() || coll.is_empty() {
            return None;
        }
        Some(Self(full.to_string()))
    }

    /// Database part.
    pub fn db(&self) -> &str {
        self.0.split_once('.').map(|(db, _)| db).unwrap_or(&self.0)
    }

    /// Collection part.
    pub fn collection(&self) -> &str {
        self.0.split_once('.').map(|(_, coll)| coll).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Cluster time ──────────────────────────────────────────────────

/// Logical cluster timestamp: wall-clock seconds plus an increment that
/// orders events within the same second.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClusterTimestamp {
    pub secs: u32,
    pub inc: u32,
}

impl ClusterTimestamp {
    pub fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }
}

impl fmt::Display for ClusterTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

/// Read concern used for catalog reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadConcern {
    Local,
    Majority,
}

// ── Chunks ────────────────────────────────────────────────────────

/// Version stamp of a chunk. `epoch` identifies the incarnation of the
/// collection; `(major, minor)` grows with every ownership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkVersion {
    pub epoch: Uuid,
    pub major: u32,
    pub minor: u32,
}

impl ChunkVersion {
    pub fn new(epoch: Uuid, major: u32, minor: u32) -> Self {
        Self {
            epoch,
            major,
            minor,
        }
    }
}

impl fmt::Display for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}||{}", self.major, self.minor, self.epoch)
    }
}

/// Half-open shard-key range `[min, max)`.
///
/// Bounds are shard-key documents, e.g. `{"_id": 5}`. The global bounds are
/// written as `{"_id": "$minKey"}` and `{"_id": "$maxKey"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub min: Value,
    pub max: Value,
}

/// A contiguous range of a sharded collection owned by one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub nss: Namespace,
    pub min: Value,
    pub max: Value,
    pub shard: ShardId,
    pub version: ChunkVersion,
    /// Cluster time of the last ownership change.
    pub last_modified: ClusterTimestamp,
}

impl Chunk {
    /// Build the composite key for the chunks table.
    pub fn table_key(&self) -> String {
        chunk_key(&self.nss, &self.min)
    }

    pub fn range(&self) -> ChunkRange {
        ChunkRange {
            min: self.min.clone(),
            max: self.max.clone(),
        }
    }
}

/// Composite chunks-table key for a namespace and lower bound.
///
/// Unique per chunk but not order-preserving: the bound is JSON text, so
/// scans sort with [`compare_chunks`] instead of relying on key order.
pub fn chunk_key(nss: &Namespace, min: &Value) -> String {
    format!("{nss}|{min}")
}

/// Lower sentinel of the shard-key space.
pub const MIN_KEY: &str = "$minKey";
/// Upper sentinel of the shard-key space.
pub const MAX_KEY: &str = "$maxKey";

/// Order chunks by namespace, then by lower bound in shard-key order.
pub fn compare_chunks(a: &Chunk, b: &Chunk) -> Ordering {
    a.nss
        .cmp(&b.nss)
        .then_with(|| compare_shard_keys(&a.min, &b.min))
}

/// Total order over shard-key values.
///
/// Types rank MinKey < null < numbers < strings < documents < arrays <
/// booleans < MaxKey; values of the same type compare naturally, documents
/// field by field.
pub fn compare_shard_keys(a: &Value, b: &Value) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| match (a, b) {
            (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => match (x.as_u64(), y.as_u64()) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => {
                        let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                        x.total_cmp(&y)
                    }
                },
            },
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => x
                .iter()
                .zip(y)
                .map(|(x, y)| compare_shard_keys(x, y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| x.len().cmp(&y.len())),
            (Value::Object(x), Value::Object(y)) => x
                .iter()
                .zip(y)
                .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| compare_shard_keys(vx, vy)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| x.len().cmp(&y.len())),
            _ => Ordering::Equal,
        })
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::String(s) if s == MIN_KEY => 0,
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(s) if s == MAX_KEY => 7,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 6,
    }
}

// ── Databases ─────────────────────────────────────────────────────

/// Version of a database entry. `last_mod` increments on every primary change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseVersion {
    pub uuid: Uuid,
    pub last_mod: u32,
}

/// Ownership record for a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub name: String,
    pub primary: ShardId,
    pub partitioned: bool,
    pub version: DatabaseVersion,
}

impl DatabaseEntry {
    /// A fresh entry with a new version uuid and `last_mod = 1`.
    pub fn new(name: &str, primary: &str) -> Self {
        Self {
            name: name.to_string(),
            primary: primary.to_string(),
            partitioned: false,
            version: DatabaseVersion {
                uuid: Uuid::new_v4(),
                last_mod: 1,
            },
        }
    }
}

// ── Collections ───────────────────────────────────────────────────

/// Catalog record of a sharded collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub nss: Namespace,
    pub uuid: Uuid,
    pub epoch: Uuid,
    pub key_pattern: Value,
    pub dropped: bool,
}

impl CollectionEntry {
    pub fn identity(&self) -> CollectionIdentity {
        CollectionIdentity {
            nss: self.nss.clone(),
            uuid: self.uuid,
        }
    }
}

/// Namespace plus the UUID it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionIdentity {
    pub nss: Namespace,
    pub uuid: Uuid,
}

// ── Shards ────────────────────────────────────────────────────────

/// Shard registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub id: ShardId,
    /// Connection string, e.g. `rs0/host1:27018,host2:27018`.
    pub host: String,
}

// ── Range deletion ────────────────────────────────────────────────

/// When the range deleter may start removing documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanWhen {
    /// Wait for in-flight queries against the range to drain.
    Delayed,
}

/// Durable instruction for a shard to discard documents in `range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDeletionTask {
    pub id: Uuid,
    pub nss: Namespace,
    pub collection_uuid: Uuid,
    /// Shard that owns the range after the ownership change.
    pub donor_shard: ShardId,
    pub range: ChunkRange,
    pub when_to_clean: CleanWhen,
}

impl RangeDeletionTask {
    /// A delayed-cleanup task with a fresh id.
    pub fn delayed(
        nss: Namespace,
        collection_uuid: Uuid,
        donor_shard: &str,
        range: ChunkRange,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            nss,
            collection_uuid,
            donor_shard: donor_shard.to_string(),
            range,
            when_to_clean: CleanWhen::Delayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespace_parts() {
        let nss = Namespace::new("test5", "coll5");
        assert_eq!(nss.db(), "test5");
        assert_eq!(nss.collection(), "coll5");
        assert_eq!(nss.to_string(), "test5.coll5");
    }

    #[test]
    fn namespace_parse_keeps_dots_in_collection() {
        let nss = Namespace::parse("config.cache.chunks.test4.coll4").unwrap();
        assert_eq!(nss.db(), "config");
        assert_eq!(nss.collection(), "cache.chunks.test4.coll4");
        assert!(Namespace::parse("nodot").is_none());
        assert!(Namespace::parse(".coll").is_none());
    }

    #[test]
    fn timestamps_order_by_secs_then_inc() {
        assert!(ClusterTimestamp::new(10, 5) < ClusterTimestamp::new(11, 0));
        assert!(ClusterTimestamp::new(10, 1) < ClusterTimestamp::new(10, 2));
    }

    #[test]
    fn chunk_key_includes_min_bound() {
        let chunk = Chunk {
            nss: Namespace::new("db", "c"),
            min: json!({"_id": 3}),
            max: json!({"_id": 7}),
            shard: "rs0".to_string(),
            version: ChunkVersion::new(Uuid::nil(), 1, 0),
            last_modified: ClusterTimestamp::default(),
        };
        assert_eq!(chunk.table_key(), r#"db.c|{"_id":3}"#);
        assert_eq!(chunk.range().max, json!({"_id": 7}));
    }

    #[test]
    fn shard_keys_compare_numerically_with_sentinels_at_the_ends() {
        let min = json!({"_id": MIN_KEY});
        let max = json!({"_id": MAX_KEY});
        let fifty = json!({"_id": 50});
        let hundred = json!({"_id": 100});

        assert_eq!(compare_shard_keys(&fifty, &hundred), Ordering::Less);
        assert_eq!(compare_shard_keys(&min, &fifty), Ordering::Less);
        assert_eq!(compare_shard_keys(&hundred, &max), Ordering::Less);
        assert_eq!(compare_shard_keys(&json!({"_id": "a"}), &max), Ordering::Less);
        assert_eq!(compare_shard_keys(&json!({"_id": -1.5}), &json!({"_id": 0})), Ordering::Less);
        assert_eq!(compare_shard_keys(&fifty, &json!({"_id": 50})), Ordering::Equal);
        // The table key alone would put 100 before 50.
        assert!(chunk_key(&Namespace::new("db", "c"), &hundred) < chunk_key(&Namespace::new("db", "c"), &fifty));
    }

    #[test]
    fn range_deletion_task_serializes_snake_case() {
        let task = RangeDeletionTask::delayed(
            Namespace::new("db", "c"),
            Uuid::nil(),
            "newShard",
            ChunkRange {
                min: json!({"_id": "$minKey"}),
                max: json!({"_id": 0}),
            },
        );
        let doc = serde_json::to_value(&task).unwrap();
        assert_eq!(doc["when_to_clean"], "delayed");
        assert_eq!(doc["nss"], "db.c");
        assert_eq!(doc["donor_shard"], "newShard");
    }
}
