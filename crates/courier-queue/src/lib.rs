//! PriorityQueue — the Redis-backed, per-channel, priority- and
//! rate-limited outbound queue that feeds the Sender worker pool.
//!
//! Every multi-step keyspace update (push, pop, mark-complete, dethrottle
//! sweep) is a single `redis::Script` invocation, the same way leader
//! election uses Lua for atomic check-and-extend/check-and-delete. No
//! client ever holds a multi-command transaction across a suspension point.

mod error;
mod keys;
mod scripts;
mod watchdog;

pub use error::{QueueError, Result};
pub use keys::QueueKey;

use std::time::{SystemTime, UNIX_EPOCH};

use courier_common::Priority;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use watchdog::Watchdog;

/// One `{"id": <msgID>}` element of a `QueueEntry`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItem {
    pub id: u64,
}

/// Opaque handle identifying one in-flight dequeue. Must be returned to
/// `mark_complete` so worker accounting balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueToken {
    pub queue_type: String,
    pub member: String,
}

impl QueueToken {
    fn new(queue_type: impl Into<String>, member: impl Into<String>) -> Self {
        Self { queue_type: queue_type.into(), member: member.into() }
    }
}

/// Outcome of a `dequeue` attempt.
#[derive(Debug)]
pub enum Dequeued {
    /// An entry was popped; return the token to `mark_complete` once the
    /// send attempt finishes.
    Item(QueueToken, QueueItem),
    /// The channel at the head of `T:active` is rate-limited this second;
    /// the caller should retry immediately (may land on a different
    /// channel).
    Retry,
    /// Nothing to pop right now; the caller should sleep briefly.
    Empty,
}

fn now_micros() -> i64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch");
    d.as_micros() as i64
}

fn now_unix_secs() -> i64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch");
    d.as_secs() as i64
}

/// Handle onto one queue-type's keyspace (`"msgs"`, typically). Cloned
/// freely; wraps a shared `ConnectionManager`.
#[derive(Clone)]
pub struct PriorityQueue {
    conn: ConnectionManager,
    queue_type: String,
    rate_counter_ttl_secs: u64,
}

impl PriorityQueue {
    pub fn new(conn: ConnectionManager, queue_type: impl Into<String>, rate_counter_ttl_secs: u64) -> Self {
        Self { conn, queue_type: queue_type.into(), rate_counter_ttl_secs }
    }

    /// Push `items` atomically onto the channel's sorted-set queue. Only the
    /// first item is eligible for immediate dequeue; remaining items are
    /// scheduled `n * per_msg_delay` seconds out (`per_msg_delay = 1/tps`)
    /// into `{channel}:future`, where a background mover transfers them into
    /// the live queue as they come due.
    pub async fn enqueue(
        &self,
        channel_uuid: Uuid,
        tps: u32,
        items: &[QueueItem],
        priority: Priority,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let key = QueueKey::new(&self.queue_type, channel_uuid, tps);
        let base_score = now_micros() + priority.offset_micros();
        let per_msg_delay_micros: i64 = if tps > 0 { 1_000_000 / tps as i64 } else { 0 };

        let head = serde_json::to_string(&[items[0]])?;
        let rest: Vec<(String, f64)> = items[1..]
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let entry = serde_json::to_string(&[*item]).expect("QueueItem always serializes");
                let score = base_score + per_msg_delay_micros * (i as i64 + 1);
                (entry, score as f64)
            })
            .collect();

        let mut conn = self.conn.clone();
        scripts::enqueue_script()
            .key(key.member())
            .key(key.active_key())
            .key(key.future_key())
            .arg(&head)
            .arg(base_score as f64)
            .arg(rest.len() as i64)
            .arg(
                rest.iter()
                    .flat_map(|(entry, score)| vec![entry.clone(), score.to_string()])
                    .collect::<Vec<_>>(),
            )
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        debug!(channel = %channel_uuid, tps, pushed = items.len(), "enqueued to priority queue");
        Ok(())
    }

    /// Pop the next entry across all channels in `{T}:active`, applying
    /// per-second TPS throttling and the overall/bulk rate-limit markers.
    /// A head entry scheduled more than 12h out (the Low/Bulk band) honors
    /// both `rate_limit:<channel>` and `rate_limit_bulk:<channel>` markers;
    /// other entries are unaffected.
    pub async fn dequeue(&self) -> Result<Dequeued> {
        let key = QueueKey::new(&self.queue_type, Uuid::nil(), 0);
        let unix_second = now_unix_secs();
        let mut conn = self.conn.clone();

        let result: Vec<String> = scripts::dequeue_script()
            .key(key.active_key())
            .key(key.throttled_key())
            .arg(unix_second)
            .arg(self.rate_counter_ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        match result.first().map(String::as_str) {
            None | Some("EMPTY") => Ok(Dequeued::Empty),
            Some("RETRY") => Ok(Dequeued::Retry),
            Some("OK") => {
                let member = result.get(1).cloned().ok_or_else(|| {
                    QueueError::InvalidToken("dequeue script returned OK without a member".into())
                })?;
                let entry_json = result.get(2).cloned().unwrap_or_default();
                let items: Vec<QueueItem> = serde_json::from_str(&entry_json)?;
                let item = *items.first().ok_or_else(|| {
                    QueueError::InvalidToken("dequeued entry was an empty array".into())
                })?;
                Ok(Dequeued::Item(QueueToken::new(&self.queue_type, member), item))
            }
            Some(other) => Err(QueueError::InvalidToken(format!("unexpected dequeue sentinel: {other}"))),
        }
    }

    /// Balance worker accounting for a completed send. First tries to
    /// decrement `T:throttled` (the channel was being throttle-accounted);
    /// otherwise decrements `T:active`, clamped at zero.
    pub async fn mark_complete(&self, token: &QueueToken) -> Result<()> {
        let mut conn = self.conn.clone();
        let active_key = format!("{}:active", token.queue_type);
        let throttled_key = format!("{}:throttled", token.queue_type);

        scripts::mark_complete_script()
            .key(active_key)
            .key(throttled_key)
            .arg(&token.member)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Engage the overall or bulk-only rate-limit marker for `channel_uuid`
    /// for `ttl_secs`. While engaged, low-priority work is held back
    /// (overall marker also holds back high-priority work).
    pub async fn set_rate_limit(&self, channel_uuid: Uuid, bulk_only: bool, ttl_secs: u64) -> Result<()> {
        let key = QueueKey::new(&self.queue_type, channel_uuid, 0);
        let marker = if bulk_only { key.rate_limit_bulk_marker_key() } else { key.rate_limit_marker_key() };
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(&marker)
            .arg(1)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Run one dethrottler sweep: atomically move every member of
    /// `T:throttled` back into `T:active`, summing scores where a channel
    /// carries both active workers and throttle deferrals. Aligned callers
    /// should invoke this on second boundaries so per-second TPS counters
    /// roll over first (see `Watchdog`/`spawn_dethrottler`).
    pub async fn dethrottle_sweep(&self) -> Result<u64> {
        let key = QueueKey::new(&self.queue_type, Uuid::nil(), 0);
        let mut conn = self.conn.clone();
        let moved: i64 = scripts::dethrottle_script()
            .key(key.throttled_key())
            .key(key.active_key())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        if moved > 0 {
            debug!(moved, queue_type = %self.queue_type, "dethrottler moved channels back to active");
        }
        Ok(moved as u64)
    }

    /// Move due elements of a channel's future-staging set (populated by a
    /// multi-element push) into its live queue, and drop the channel from
    /// the `T:future` coordinator set once drained. Spawned by
    /// `spawn_dethrottler` alongside the dethrottle sweep, since both are
    /// keyed to the same 1Hz cadence.
    pub async fn promote_due_future(&self, channel_uuid: Uuid, tps: u32) -> Result<u64> {
        let key = QueueKey::new(&self.queue_type, channel_uuid, tps);
        let mut conn = self.conn.clone();
        let promoted: i64 = scripts::promote_future_script()
            .key(key.pending_future_key())
            .key(key.member())
            .key(key.future_key())
            .arg(now_micros())
            .arg(key.member())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(promoted as u64)
    }

    /// Channels currently tracked in the `T:future` coordinator set, i.e.
    /// those with at least one not-yet-due staged entry. Used by the
    /// background promoter loop to know which channels to sweep.
    pub async fn channels_with_future_entries(&self) -> Result<Vec<(Uuid, u32)>> {
        let key = QueueKey::new(&self.queue_type, Uuid::nil(), 0);
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(key.future_key())
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(members
            .iter()
            .filter_map(|m| Some((QueueKey::parse_channel_uuid(m)?, QueueKey::parse_tps(m)?)))
            .collect())
    }

    pub fn queue_type(&self) -> &str {
        &self.queue_type
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Spawns the 1Hz dethrottler loop: moves `T:throttled` back to `T:active`
/// on second boundaries and promotes due future entries. Runs until
/// `shutdown` fires.
pub fn spawn_dethrottler(
    queue: PriorityQueue,
    interval: std::time::Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = queue.dethrottle_sweep().await {
                        warn!(error = %e, "dethrottle sweep failed");
                    }
                    match queue.channels_with_future_entries().await {
                        Ok(channels) => {
                            for (channel_uuid, tps) in channels {
                                if let Err(e) = queue.promote_due_future(channel_uuid, tps).await {
                                    warn!(error = %e, channel = %channel_uuid, "future promotion failed");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to list channels with future entries"),
                    }
                }
                _ = shutdown.recv() => {
                    info!(queue_type = %queue.queue_type, "dethrottler shutting down");
                    break;
                }
            }
        }
    })
}
