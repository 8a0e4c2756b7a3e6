//! ShardProxy: typed shard commands with retry policy and deadlines.
//!
//! Every call makes up to `max_attempts` delivery attempts, each bounded by
//! a fixed timeout. Whether a failed attempt may be retried depends on the
//! command's [`RetryPolicy`]: idempotent commands retry anything transient,
//! non-idempotent ones only retry attempts that provably never reached the
//! shard, so a slow-but-successful insert is never repeated.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use mitosis_catalog::{Namespace, RangeDeletionTask, ShardEntry};

use crate::command::{DropOutcome, ShardCommand, ShardReply};
use crate::error::{ShardError, ShardResult};
use crate::transport::ShardTransport;

/// Retry semantics of a shard command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Safe to re-run: retry unreachable and timed-out attempts.
    Idempotent,
    /// Must not be duplicated: retry only when the shard was never reached.
    NotIdempotent,
}

impl RetryPolicy {
    /// Whether `err` from one attempt may be followed by another attempt.
    pub fn allows_retry(self, err: &ShardError) -> bool {
        match err {
            ShardError::Unreachable { .. } => true,
            ShardError::Timeout { .. } => self == RetryPolicy::Idempotent,
            _ => false,
        }
    }
}

/// Attempt and deadline settings for the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Delivery attempts per call, including the first.
    pub max_attempts: u32,
    /// Per-attempt timeout for routing cache refreshes.
    pub refresh_timeout: Duration,
    /// Per-attempt timeout for every other command.
    pub command_timeout: Duration,
    /// Base pause between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            refresh_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Sends typed commands to shards over a [`ShardTransport`].
#[derive(Clone)]
pub struct ShardProxy {
    transport: Arc<dyn ShardTransport>,
    config: ProxyConfig,
}

impl ShardProxy {
    pub fn new(transport: Arc<dyn ShardTransport>, config: ProxyConfig) -> Self {
        Self { transport, config }
    }

    /// Run `command` on `shard` under `policy`, at most `max_attempts` times.
    pub async fn run_command(
        &self,
        shard: &ShardEntry,
        command: ShardCommand,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> ShardResult<ShardReply> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let sent = tokio::time::timeout(timeout, self.transport.send(&shard.host, command.clone()));
            let result = match sent.await {
                Ok(result) => result,
                Err(_) => Err(ShardError::Timeout {
                    host: shard.host.clone(),
                    after: timeout,
                }),
            };

            match result {
                Ok(reply) => {
                    debug!(shard = %shard.id, command = command.name(), attempt, "shard command succeeded");
                    return Ok(reply);
                }
                Err(e) if attempt < attempts && policy.allows_retry(&e) => {
                    warn!(
                        shard = %shard.id,
                        command = command.name(),
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "shard command failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Make `shard` reload its routing table for `nss` from the catalog.
    pub async fn refresh_routing_cache(&self, shard: &ShardEntry, nss: &Namespace) -> ShardResult<()> {
        let command = ShardCommand::FlushRoutingTableCacheUpdates {
            nss: nss.clone(),
            sync_from_config: true,
        };
        match self
            .run_command(shard, command, self.config.refresh_timeout, RetryPolicy::Idempotent)
            .await?
        {
            ShardReply::Ok => Ok(()),
            other => Err(unexpected(shard, &other)),
        }
    }

    /// Names of the physical collections of `db` on `shard`.
    pub async fn list_collections(&self, shard: &ShardEntry, db: &str) -> ShardResult<Vec<String>> {
        let command = ShardCommand::ListCollections { db: db.to_string() };
        match self
            .run_command(shard, command, self.config.command_timeout, RetryPolicy::Idempotent)
            .await?
        {
            ShardReply::Collections { names } => Ok(names),
            other => Err(unexpected(shard, &other)),
        }
    }

    /// Drop `db.collection` on `shard`, returning both error channels.
    pub async fn drop_collection(
        &self,
        shard: &ShardEntry,
        db: &str,
        collection: &str,
    ) -> ShardResult<DropOutcome> {
        let command = ShardCommand::Drop {
            db: db.to_string(),
            collection: collection.to_string(),
        };
        match self
            .run_command(shard, command, self.config.command_timeout, RetryPolicy::Idempotent)
            .await?
        {
            ShardReply::Dropped(outcome) => Ok(outcome),
            other => Err(unexpected(shard, &other)),
        }
    }

    /// Insert one batch of range deletion tasks on `shard`.
    pub async fn insert_range_deletion_tasks(
        &self,
        shard: &ShardEntry,
        tasks: Vec<RangeDeletionTask>,
    ) -> ShardResult<usize> {
        let command = ShardCommand::InsertRangeDeletions { tasks };
        match self
            .run_command(shard, command, self.config.command_timeout, RetryPolicy::NotIdempotent)
            .await?
        {
            ShardReply::Inserted { count } => Ok(count),
            other => Err(unexpected(shard, &other)),
        }
    }
}

fn unexpected(shard: &ShardEntry, reply: &ShardReply) -> ShardError {
    ShardError::Protocol {
        host: shard.host.clone(),
        detail: format!("{reply:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Plays back scripted failures, then answers `ShardReply::Inserted`.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    enum Step {
        Unreachable,
        Hang,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ShardTransport for ScriptedTransport {
        async fn send(&self, host: &str, command: ShardCommand) -> ShardResult<ShardReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Unreachable) => Err(ShardError::Unreachable {
                    host: host.to_string(),
                    reason: "connection refused".to_string(),
                }),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ShardReply::Ok)
                }
                None => match command {
                    ShardCommand::InsertRangeDeletions { tasks } => {
                        Ok(ShardReply::Inserted { count: tasks.len() })
                    }
                    _ => Ok(ShardReply::Ok),
                },
            }
        }
    }

    fn shard() -> ShardEntry {
        ShardEntry {
            id: "rs0".to_string(),
            host: "rs0/localhost:27018".to_string(),
        }
    }

    fn proxy(transport: Arc<ScriptedTransport>) -> ShardProxy {
        ShardProxy::new(
            transport,
            ProxyConfig {
                max_attempts: 3,
                refresh_timeout: Duration::from_millis(20),
                command_timeout: Duration::from_millis(20),
                retry_backoff: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn retry_policy_matrix() {
        let unreachable = ShardError::Unreachable {
            host: "h".to_string(),
            reason: "r".to_string(),
        };
        let timeout = ShardError::Timeout {
            host: "h".to_string(),
            after: Duration::from_secs(1),
        };
        let command = ShardError::Command("boom".to_string());

        assert!(RetryPolicy::Idempotent.allows_retry(&unreachable));
        assert!(RetryPolicy::Idempotent.allows_retry(&timeout));
        assert!(!RetryPolicy::Idempotent.allows_retry(&command));
        assert!(RetryPolicy::NotIdempotent.allows_retry(&unreachable));
        assert!(!RetryPolicy::NotIdempotent.allows_retry(&timeout));
        assert!(!RetryPolicy::NotIdempotent.allows_retry(&command));
    }

    #[tokio::test]
    async fn idempotent_refresh_retries_through_timeout() {
        let transport = ScriptedTransport::new(vec![Step::Hang, Step::Unreachable]);
        let proxy = proxy(transport.clone());

        proxy
            .refresh_routing_cache(&shard(), &Namespace::new("test4", "coll4"))
            .await
            .unwrap();
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn idempotent_refresh_gives_up_after_max_attempts() {
        let transport =
            ScriptedTransport::new(vec![Step::Unreachable, Step::Unreachable, Step::Unreachable]);
        let proxy = proxy(transport.clone());

        let err = proxy
            .refresh_routing_cache(&shard(), &Namespace::new("test4", "coll4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::Unreachable { .. }));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn insert_is_not_retried_after_timeout() {
        let transport = ScriptedTransport::new(vec![Step::Hang]);
        let proxy = proxy(transport.clone());

        let err = proxy
            .insert_range_deletion_tasks(&shard(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::Timeout { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn insert_is_retried_when_shard_was_never_reached() {
        let transport = ScriptedTransport::new(vec![Step::Unreachable]);
        let proxy = proxy(transport.clone());

        let count = proxy
            .insert_range_deletion_tasks(&shard(), Vec::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn mismatched_reply_is_protocol_error() {
        // The scripted transport answers `Ok` to a list command.
        let transport = ScriptedTransport::new(vec![]);
        let proxy = proxy(transport);

        let err = proxy.list_collections(&shard(), "test1").await.unwrap_err();
        assert!(matches!(err, ShardError::Protocol { .. }));
    }
}
