//! mitosis-shard: the shard side of a split.
//!
//! - **`store`**: shard-local redb state (physical collections, routing
//!   cache and range deletion tasks)
//! - **`command`**: serde command/reply types exchanged with shards
//! - **`transport`**: one-shot delivery seam plus the in-process transport
//! - **`proxy`**: typed commands with retry policy and per-call timeouts
//!
//! ```text
//! ShardProxy ──(retry, timeout)──▶ dyn ShardTransport ──▶ ShardStore::execute
//! ```

pub mod command;
pub mod error;
pub mod proxy;
pub mod store;
pub mod transport;

pub use command::{CommandError, DropOutcome, ErrorCode, ShardCommand, ShardReply};
pub use error::{ShardError, ShardResult};
pub use proxy::{ProxyConfig, RetryPolicy, ShardProxy};
pub use store::{CachedRoutingTable, PhysicalCollection, ShardStore};
pub use transport::{LocalTransport, ShardTransport};
