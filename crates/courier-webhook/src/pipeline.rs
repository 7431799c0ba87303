//! The incoming pipeline: everything a decoded `InboundRecord` goes
//! through on its way to the backend, shared by every channel type so no
//! adapter re-implements dedup, reassembly, or spool fallback.

use std::sync::Arc;

use chrono::Utc;
use courier_adapter::InboundRecord;
use courier_backend::Backend;
use courier_common::{Attachment, Channel, ChannelEvent, ChannelEventType, MsgIn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::urn::parse_sender_urn;

const MULTIPART_TTL_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid sender address: {0}")]
    InvalidSender(&'static str),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("spool error: {0}")]
    Spool(#[from] courier_spool::SpoolError),
}

/// Outcome of feeding one `InboundRecord` through the pipeline; the
/// webhook router turns this into the adapter's declared success body
/// regardless of which arm fired, per the "core always 200s a validated,
/// decodable request" contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Written,
    Duplicate,
    BufferedPart,
    Ignored,
}

#[derive(Debug, Serialize, Deserialize)]
struct MultipartChunkRecord {
    text: String,
    address_raw: String,
    external_id: Option<String>,
}

/// Joins buffered chunks in ascending part-index order, regardless of
/// whether the adapter's numbering starts at 0 or 1. Text is concatenated
/// directly (no extra separator: the adapter is responsible for any
/// trailing whitespace it wants preserved between parts, per the spec's
/// `"hello "` + `"world"` example).
fn join_parts_in_index_order(fields: &std::collections::HashMap<u32, String>) -> Result<(String, String, Option<String>), PipelineError> {
    let mut indices: Vec<u32> = fields.keys().copied().collect();
    indices.sort_unstable();

    let parts: Vec<MultipartChunkRecord> =
        indices.iter().map(|idx| serde_json::from_str::<MultipartChunkRecord>(&fields[idx])).collect::<serde_json::Result<_>>()?;

    let full_text = parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("");
    let address_raw = parts[0].address_raw.clone();
    let external_id = parts.iter().find_map(|p| p.external_id.clone());
    Ok((full_text, address_raw, external_id))
}

/// Shared, cloneable handle to the dedup/reassembly/write machinery. One
/// instance is built at startup and handed to every webhook request.
#[derive(Clone)]
pub struct IncomingPipeline {
    backend: Arc<dyn Backend>,
    spool: courier_spool::Spool,
    redis: ConnectionManager,
}

impl IncomingPipeline {
    pub fn new(backend: Arc<dyn Backend>, spool: courier_spool::Spool, redis: ConnectionManager) -> Self {
        Self { backend, spool, redis }
    }

    pub async fn process(&self, channel: &Channel, record: InboundRecord) -> Result<PipelineOutcome, PipelineError> {
        match record {
            InboundRecord::Ignored => Ok(PipelineOutcome::Ignored),
            InboundRecord::Event { address_raw, event_type, extra } => {
                let urn = parse_sender_urn(&channel.schemes, &channel.country, &address_raw).map_err(PipelineError::InvalidSender)?;
                self.write_event(channel, urn, event_type, extra).await?;
                Ok(PipelineOutcome::Written)
            }
            InboundRecord::Status { external_id, status, error } => {
                self.write_status(channel, external_id, status, error).await?;
                Ok(PipelineOutcome::Written)
            }
            InboundRecord::Message { address_raw, text, external_id, attachments } => {
                if let Some(ref id) = external_id {
                    if self.check_and_mark_duplicate(channel.uuid, id).await? {
                        return Ok(PipelineOutcome::Duplicate);
                    }
                }
                let urn = parse_sender_urn(&channel.schemes, &channel.country, &address_raw).map_err(PipelineError::InvalidSender)?;
                self.write_message(channel, urn, text, external_id, attachments).await?;
                Ok(PipelineOutcome::Written)
            }
            InboundRecord::MultipartChunk { long_id, part_index, part_count, text, address_raw, external_id } => {
                match self.reassemble(channel.uuid, &long_id, part_index, part_count, text, address_raw, external_id).await? {
                    Some((full_text, address_raw, external_id)) => {
                        if let Some(ref id) = external_id {
                            if self.check_and_mark_duplicate(channel.uuid, id).await? {
                                return Ok(PipelineOutcome::Duplicate);
                            }
                        }
                        let urn = parse_sender_urn(&channel.schemes, &channel.country, &address_raw).map_err(PipelineError::InvalidSender)?;
                        self.write_message(channel, urn, full_text, external_id, Vec::new()).await?;
                        Ok(PipelineOutcome::Written)
                    }
                    None => Ok(PipelineOutcome::BufferedPart),
                }
            }
        }
    }

    async fn check_and_mark_duplicate(&self, channel_uuid: Uuid, external_id: &str) -> Result<bool, PipelineError> {
        match self.backend.is_duplicate(channel_uuid, external_id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "dedup lookup failed, proceeding without dedup guarantee");
                return Ok(false);
            }
        }
        if let Err(e) = self.backend.mark_seen(channel_uuid, external_id).await {
            warn!(error = %e, "failed to mark external id as seen");
        }
        Ok(false)
    }

    /// Buffers one multipart chunk in a Redis hash keyed
    /// `<channel_uuid>:<long_id>`, field `part_index`, refreshed to a
    /// `MULTIPART_TTL_SECS` TTL on every chunk. Returns the joined text once
    /// `part_count` parts have arrived, ordered by index ascending (adapters
    /// number parts from 0 or from 1; both are honored).
    async fn reassemble(
        &self,
        channel_uuid: Uuid,
        long_id: &str,
        part_index: u32,
        part_count: u32,
        text: String,
        address_raw: String,
        external_id: Option<String>,
    ) -> Result<Option<(String, String, Option<String>)>, PipelineError> {
        let key = format!("multipart:{channel_uuid}:{long_id}");
        let record = MultipartChunkRecord { text, address_raw, external_id };
        let payload = serde_json::to_string(&record)?;

        let mut conn = self.redis.clone();
        let _: () = conn.hset(&key, part_index, payload).await?;
        let _: () = conn.expire(&key, MULTIPART_TTL_SECS as i64).await?;

        let fields: std::collections::HashMap<u32, String> = conn.hgetall(&key).await?;
        if fields.len() < part_count as usize {
            return Ok(None);
        }

        let joined = join_parts_in_index_order(&fields)?;
        let _: () = conn.del(&key).await?;
        Ok(Some(joined))
    }

    async fn write_message(
        &self,
        channel: &Channel,
        urn: courier_common::Urn,
        text: String,
        external_id: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<(), PipelineError> {
        let msg = MsgIn { channel_uuid: channel.uuid, sender: urn, text, external_id, attachments, received_at: Some(Utc::now()), contact_name: None };
        if let Err(e) = self.backend.write_msg_in(msg.clone()).await {
            warn!(error = %e, channel_uuid = %channel.uuid, "backend write_msg_in failed, spooling");
            self.spool.write(courier_spool::RecordKind::Msgs, &msg).await?;
        }
        Ok(())
    }

    async fn write_event(&self, channel: &Channel, urn: courier_common::Urn, event_type: ChannelEventType, extra: std::collections::HashMap<String, String>) -> Result<(), PipelineError> {
        let event = ChannelEvent { channel_uuid: channel.uuid, urn, event_type, extra };
        if let Err(e) = self.backend.write_channel_event(event.clone()).await {
            warn!(error = %e, channel_uuid = %channel.uuid, "backend write_channel_event failed, spooling");
            self.spool.write(courier_spool::RecordKind::Events, &event).await?;
        }
        Ok(())
    }

    async fn write_status(&self, channel: &Channel, external_id: String, status: courier_common::MsgStatus, error: Option<courier_common::ErrorTaxonomyEntry>) -> Result<(), PipelineError> {
        let update = courier_common::StatusUpdate { channel_uuid: channel.uuid, msg_ref: courier_common::MsgRef::ExternalId(external_id), status, error };
        if let Err(e) = self.backend.write_status_update(update.clone()).await {
            warn!(error = %e, channel_uuid = %channel.uuid, "backend write_status_update failed, spooling");
            self.spool.write(courier_spool::RecordKind::Statuses, &update).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> String {
        serde_json::to_string(&MultipartChunkRecord { text: text.to_string(), address_raw: "+923161909799".into(), external_id: None })
            .unwrap()
    }

    #[test]
    fn joins_one_based_indices_in_order() {
        // Mirrors the spec's two-POST example: msgref=2 arrives first,
        // msgref=1 arrives second; order must follow the index, not arrival.
        let mut fields = std::collections::HashMap::new();
        fields.insert(2u32, chunk("world"));
        fields.insert(1u32, chunk("hello "));

        let (text, address, _) = join_parts_in_index_order(&fields).unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(address, "+923161909799");
    }

    #[test]
    fn joins_zero_based_indices_in_order() {
        let mut fields = std::collections::HashMap::new();
        fields.insert(0u32, chunk("foo"));
        fields.insert(1u32, chunk("bar"));

        let (text, _, _) = join_parts_in_index_order(&fields).unwrap();
        assert_eq!(text, "foobar");
    }

    #[test]
    fn external_id_is_taken_from_whichever_part_carries_it() {
        let mut fields = std::collections::HashMap::new();
        fields.insert(
            1u32,
            serde_json::to_string(&MultipartChunkRecord { text: "a".into(), address_raw: "x".into(), external_id: Some("ext-1".into()) }).unwrap(),
        );
        fields.insert(2u32, chunk("b"));

        let (_, _, external_id) = join_parts_in_index_order(&fields).unwrap();
        assert_eq!(external_id.as_deref(), Some("ext-1"));
    }
}
