//! redb table definitions for the catalog.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Shape shared by every catalog table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Database entries keyed by database name.
pub const DATABASES: JsonTable = TableDefinition::new("databases");

/// Chunks keyed by `{namespace}|{min}` where `min` is the JSON lower bound.
pub const CHUNKS: JsonTable = TableDefinition::new("chunks");

/// Sharded collections keyed by namespace.
pub const COLLECTIONS: JsonTable = TableDefinition::new("collections");

/// Shard registry keyed by shard id.
pub const SHARDS: JsonTable = TableDefinition::new("shards");
