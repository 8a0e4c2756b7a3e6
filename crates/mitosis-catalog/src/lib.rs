//! mitosis-catalog: cluster ownership metadata for Mitosis.
//!
//! Backed by [redb](https://docs.rs/redb), holds the authoritative records of
//! which shard owns which database and which chunk ranges, the identities of
//! sharded collections, and the shard registry.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Chunks are keyed by `{namespace}|{min}` so that a collection's chunks sit
//! next to each other. Ownership changes (`commit_chunk_ownership`,
//! `commit_database_primary`) each run in one write transaction.
//!
//! The `CatalogStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is exposed to the rest of the system through the async
//! [`MetadataClient`] trait.

pub mod client;
pub mod clock;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use client::MetadataClient;
pub use clock::LogicalClock;
pub use error::{CatalogError, CatalogResult};
pub use store::CatalogStore;
pub use types::*;
