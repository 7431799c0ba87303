//! Keyspace construction for the priority queue.
//!
//! Three coordinator sets per queue-type `T`: `{T}:active`, `{T}:throttled`,
//! `{T}:future`. Per channel-queue, the message store `Q` is named
//! `{T}:<channel_uuid>|<tps>` and doubles as the member string stored in the
//! coordinator sets. A sibling key `{Q}:future` buffers not-yet-due elements
//! of a multi-element push.

use uuid::Uuid;

/// Identifies one channel's queue within a queue-type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKey {
    pub queue_type: String,
    pub channel_uuid: Uuid,
    pub tps: u32,
}

impl QueueKey {
    pub fn new(queue_type: impl Into<String>, channel_uuid: Uuid, tps: u32) -> Self {
        Self { queue_type: queue_type.into(), channel_uuid, tps }
    }

    /// The member string used in `{T}:active` / `{T}:throttled` / `{T}:future`,
    /// and the redis key of the per-channel message sorted set itself.
    pub fn member(&self) -> String {
        format!("{}:{}|{}", self.queue_type, self.channel_uuid, self.tps)
    }

    pub fn active_key(&self) -> String {
        format!("{}:active", self.queue_type)
    }

    pub fn throttled_key(&self) -> String {
        format!("{}:throttled", self.queue_type)
    }

    pub fn future_key(&self) -> String {
        format!("{}:future", self.queue_type)
    }

    /// Per-channel sorted set holding not-yet-due elements of a
    /// multi-element push, keyed off this channel's member string.
    pub fn pending_future_key(&self) -> String {
        format!("{}:future", self.member())
    }

    pub fn rate_counter_key(&self, unix_second: i64) -> String {
        format!("{}:tps:{}", self.member(), unix_second)
    }

    pub fn rate_limit_marker_key(&self) -> String {
        format!("rate_limit:{}", self.channel_uuid)
    }

    pub fn rate_limit_bulk_marker_key(&self) -> String {
        format!("rate_limit_bulk:{}", self.channel_uuid)
    }

    /// Parses `tps` back out of a `{T}:<uuid>|<tps>` member string.
    pub fn parse_tps(member: &str) -> Option<u32> {
        member.rsplit_once('|').and_then(|(_, tps)| tps.parse().ok())
    }

    pub fn parse_channel_uuid(member: &str) -> Option<Uuid> {
        let without_prefix = member.split_once(':')?.1;
        let uuid_part = without_prefix.rsplit_once('|')?.0;
        Uuid::parse_str(uuid_part).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_round_trips_tps_and_uuid() {
        let channel_uuid = Uuid::new_v4();
        let key = QueueKey::new("msgs", channel_uuid, 10);
        let member = key.member();
        assert_eq!(member, format!("msgs:{channel_uuid}|10"));
        assert_eq!(QueueKey::parse_tps(&member), Some(10));
        assert_eq!(QueueKey::parse_channel_uuid(&member), Some(channel_uuid));
    }
}
