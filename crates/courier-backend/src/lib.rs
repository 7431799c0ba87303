//! Backend — the opaque, concurrency-safe store every other component
//! depends on: it issues message IDs, resolves channels, persists
//! msgs/statuses/events/logs, and answers the inbound dedup question.
//! Persistence itself is out of scope for this crate; it ships only the
//! contract plus an in-memory reference implementation for tests and the
//! dev-mode binary, the same way repository traits ship alongside
//! in-memory fakes for the same purpose.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use courier_common::{Channel, ChannelEvent, ChannelLog, MsgIn, MsgOut, MsgRef, MsgStatus, StatusUpdate};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("channel not found: type={channel_type} uuid={uuid}")]
    ChannelNotFound { channel_type: String, uuid: Uuid },

    #[error("message not found: id={0}")]
    MsgNotFound(u64),

    #[error("backend io error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// The contract the core requires of the backend. Opaque and
/// concurrent-safe: callers never hold a lock across an await point on an
/// implementation of this trait.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolve a channel by its type tag and UUID. Returns
    /// `ChannelNotFound` if unknown or if `channel_type` doesn't match the
    /// channel actually registered under `uuid` (webhook router uses this
    /// to reject with 400 on type mismatch).
    async fn resolve_channel(&self, channel_type: &str, uuid: Uuid) -> Result<Channel>;

    /// Hydrate a queued message ID into the full `MsgOut` the Sender needs
    /// to invoke an adapter's `Send`.
    async fn hydrate_msg(&self, msg_id: u64) -> Result<MsgOut>;

    /// Write an inbound message. Called by the incoming pipeline
    /// after dedup and (for multipart providers) reassembly.
    async fn write_msg_in(&self, msg: MsgIn) -> Result<()>;

    /// Write a status update. Enforces the ordering invariant: a status may
    /// only refine the previous one, except `Failed` which may always be
    /// set. A regression is accepted without error (logged and dropped)
    /// since the sender has nothing useful to do with a rejected write.
    async fn write_status_update(&self, update: StatusUpdate) -> Result<()>;

    /// Write a channel-level event (stop_contact, new_conversation, ...).
    async fn write_channel_event(&self, event: ChannelEvent) -> Result<()>;

    /// Persist a completed `ChannelLog` diagnostic record.
    async fn write_channel_log(&self, log: ChannelLog) -> Result<()>;

    /// True if `external_id` has already been observed for `channel_uuid`
    /// within the dedup window (`seen:<channelUUID>:<externalID>`, 24h
    /// TTL). Does not itself mark the id as seen.
    async fn is_duplicate(&self, channel_uuid: Uuid, external_id: &str) -> Result<bool>;

    /// Mark `external_id` as seen for `channel_uuid`, starting its dedup
    /// TTL window.
    async fn mark_seen(&self, channel_uuid: Uuid, external_id: &str) -> Result<()>;
}

/// In-memory reference `Backend`, used by `dev_mode` and integration tests.
/// Channels and messages are seeded directly; production deployments plug
/// in a real implementation talking to the upstream platform's store.
pub struct InMemoryBackend {
    channels: DashMap<Uuid, Channel>,
    msgs: DashMap<u64, MsgOut>,
    statuses: DashMap<u64, MsgStatus>,
    msgs_in: DashMap<Uuid, Vec<MsgIn>>,
    events: DashMap<Uuid, Vec<ChannelEvent>>,
    logs: DashMap<Uuid, Vec<ChannelLog>>,
    seen: DashMap<(Uuid, String), Instant>,
    dedup_ttl: Duration,
    next_id: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            msgs: DashMap::new(),
            statuses: DashMap::new(),
            msgs_in: DashMap::new(),
            events: DashMap::new(),
            logs: DashMap::new(),
            seen: DashMap::new(),
            dedup_ttl,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register (or replace) a channel. Re-registering models a channel
    /// config reload: the old `Channel` value is simply replaced, never
    /// mutated in place.
    pub fn register_channel(&self, channel: Channel) {
        self.channels.insert(channel.uuid, channel);
    }

    /// Enqueue a new outbound message, returning the monotonic id the
    /// priority queue entry should carry.
    pub fn create_msg(&self, mut msg: MsgOut) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        msg.id = id;
        self.statuses.insert(id, MsgStatus::Errored);
        self.msgs.insert(id, msg);
        id
    }

    pub fn status_of(&self, msg_id: u64) -> Option<MsgStatus> {
        self.statuses.get(&msg_id).map(|s| *s)
    }

    pub fn msgs_in_for(&self, channel_uuid: Uuid) -> Vec<MsgIn> {
        self.msgs_in.get(&channel_uuid).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, channel_uuid: Uuid) -> Vec<ChannelEvent> {
        self.events.get(&channel_uuid).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn logs_for(&self, channel_uuid: Uuid) -> Vec<ChannelLog> {
        self.logs.get(&channel_uuid).map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600))
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn resolve_channel(&self, channel_type: &str, uuid: Uuid) -> Result<Channel> {
        let channel = self
            .channels
            .get(&uuid)
            .ok_or(BackendError::ChannelNotFound { channel_type: channel_type.to_string(), uuid })?;
        if channel.channel_type != channel_type {
            return Err(BackendError::ChannelNotFound { channel_type: channel_type.to_string(), uuid });
        }
        Ok(channel.clone())
    }

    async fn hydrate_msg(&self, msg_id: u64) -> Result<MsgOut> {
        self.msgs.get(&msg_id).map(|m| m.clone()).ok_or(BackendError::MsgNotFound(msg_id))
    }

    async fn write_msg_in(&self, msg: MsgIn) -> Result<()> {
        self.msgs_in.entry(msg.channel_uuid).or_default().push(msg);
        Ok(())
    }

    async fn write_status_update(&self, update: StatusUpdate) -> Result<()> {
        let msg_id = match &update.msg_ref {
            MsgRef::BackendId(id) => *id,
            MsgRef::ExternalId(ext) => {
                // Reference backends correlate external IDs to backend ids
                // via the recorded send result; this demo store has no such
                // index and simply logs the attempt.
                debug!(external_id = %ext, "status update by external id has no in-memory index, dropping");
                return Ok(());
            }
        };

        let mut entry = self.statuses.entry(msg_id).or_insert(MsgStatus::Errored);
        if update.status.may_transition_from(*entry) {
            *entry = update.status;
        } else {
            warn!(
                msg_id,
                from = ?*entry,
                to = ?update.status,
                "rejected status regression"
            );
        }
        Ok(())
    }

    async fn write_channel_event(&self, event: ChannelEvent) -> Result<()> {
        self.events.entry(event.channel_uuid).or_default().push(event);
        Ok(())
    }

    async fn write_channel_log(&self, log: ChannelLog) -> Result<()> {
        self.logs.entry(log.channel_uuid).or_default().push(log);
        Ok(())
    }

    async fn is_duplicate(&self, channel_uuid: Uuid, external_id: &str) -> Result<bool> {
        if let Some(seen_at) = self.seen.get(&(channel_uuid, external_id.to_string())) {
            if seen_at.elapsed() < self.dedup_ttl {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn mark_seen(&self, channel_uuid: Uuid, external_id: &str) -> Result<()> {
        self.seen.insert((channel_uuid, external_id.to_string()), Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_channel() -> Channel {
        Channel::new("AC", "1234", "RW")
    }

    #[tokio::test]
    async fn resolves_registered_channel_by_type_and_uuid() {
        let backend = InMemoryBackend::default();
        let channel = sample_channel();
        let uuid = channel.uuid;
        backend.register_channel(channel);

        let resolved = backend.resolve_channel("AC", uuid).await.unwrap();
        assert_eq!(resolved.uuid, uuid);

        let err = backend.resolve_channel("D3C", uuid).await.unwrap_err();
        assert!(matches!(err, BackendError::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn status_update_never_regresses_except_failed() {
        let backend = InMemoryBackend::default();
        let channel = sample_channel();
        let msg_id = backend.create_msg(MsgOut {
            id: 0,
            channel,
            urn: courier_common::Urn::tel("+250788383383"),
            text: "hi".into(),
            attachments: vec![],
            quick_replies: vec![],
            locale: None,
            template: None,
            created_at: chrono::Utc::now(),
        });

        backend
            .write_status_update(StatusUpdate { channel_uuid: Uuid::nil(), msg_ref: MsgRef::BackendId(msg_id), status: MsgStatus::Wired, error: None })
            .await
            .unwrap();
        backend
            .write_status_update(StatusUpdate { channel_uuid: Uuid::nil(), msg_ref: MsgRef::BackendId(msg_id), status: MsgStatus::Sent, error: None })
            .await
            .unwrap();
        assert_eq!(backend.status_of(msg_id), Some(MsgStatus::Sent));

        // Regression is rejected.
        backend
            .write_status_update(StatusUpdate { channel_uuid: Uuid::nil(), msg_ref: MsgRef::BackendId(msg_id), status: MsgStatus::Wired, error: None })
            .await
            .unwrap();
        assert_eq!(backend.status_of(msg_id), Some(MsgStatus::Sent));

        // Failed always wins.
        backend
            .write_status_update(StatusUpdate { channel_uuid: Uuid::nil(), msg_ref: MsgRef::BackendId(msg_id), status: MsgStatus::Failed, error: None })
            .await
            .unwrap();
        assert_eq!(backend.status_of(msg_id), Some(MsgStatus::Failed));
    }

    #[tokio::test]
    async fn dedup_honors_ttl() {
        let backend = InMemoryBackend::new(Duration::from_millis(10));
        let channel_uuid = Uuid::new_v4();
        assert!(!backend.is_duplicate(channel_uuid, "ext1").await.unwrap());
        backend.mark_seen(channel_uuid, "ext1").await.unwrap();
        assert!(backend.is_duplicate(channel_uuid, "ext1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!backend.is_duplicate(channel_uuid, "ext1").await.unwrap());
    }
}
