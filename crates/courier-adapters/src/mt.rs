//! MT-style inbound SMS adapter: form-urlencoded webhooks carrying either a
//! plain/multipart message or a keyword command. Channel type tag `"MT"`.

use std::collections::HashMap;

use async_trait::async_trait;
use courier_adapter::{Handler, HttpMethod, InboundRecord, RouteSpec, SendContext, SendResult};
use courier_common::{AdapterError, Channel, ChannelEventType, ChannelLog, ChannelLogType, MsgOut};

pub struct MtHandler;

impl MtHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MtHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for MtHandler {
    fn channel_type(&self) -> &'static str {
        "MT"
    }

    fn name(&self) -> &'static str {
        "MT keyword/multipart SMS"
    }

    fn routes(&self) -> Vec<RouteSpec> {
        vec![RouteSpec { method: HttpMethod::Post, sub_path: "receive", log_type: ChannelLogType::MsgReceive }]
    }

    async fn send(&self, _ctx: &SendContext, _msg: &MsgOut, _result: &mut SendResult, _log: &mut ChannelLog) -> Result<(), AdapterError> {
        // This channel type only receives; outbound delivery is not part of
        // the scenario this adapter demonstrates.
        Err(AdapterError::ChannelConfig("MT handler does not support outbound send".into()))
    }

    fn decode_inbound(&self, _channel: &Channel, _route: &RouteSpec, _content_type: Option<&str>, body: &[u8]) -> Result<InboundRecord, AdapterError> {
        let fields: HashMap<String, String> =
            serde_urlencoded::from_bytes(body).map_err(|e| AdapterError::ResponseUnparseable(format!("MT form body: {e}")))?;

        let msisdn = fields.get("Msisdn").cloned().unwrap_or_default();

        if let Some(keyword) = fields.get("Keyword") {
            if keyword.eq_ignore_ascii_case("stop") {
                return Ok(InboundRecord::Event { address_raw: msisdn, event_type: ChannelEventType::StopContact, extra: HashMap::new() });
            }
        }

        if let Some(long_id) = fields.get("msglong.id") {
            let part_index: u32 = fields.get("msglong.msgref").and_then(|v| v.parse().ok()).unwrap_or(1);
            let part_count: u32 = fields.get("msglong.msgcount").and_then(|v| v.parse().ok()).unwrap_or(1);
            let text = fields.get("Content").cloned().unwrap_or_default();
            return Ok(InboundRecord::MultipartChunk {
                long_id: long_id.clone(),
                part_index,
                part_count,
                text,
                address_raw: msisdn,
                external_id: fields.get("MessageId").cloned(),
            });
        }

        let text = fields.get("Content").cloned().unwrap_or_default();
        Ok(InboundRecord::Message { address_raw: msisdn, text, external_id: fields.get("MessageId").cloned(), attachments: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel {
        Channel::new("MT", "mt-shortcode", "PK")
    }

    fn route() -> RouteSpec {
        RouteSpec { method: HttpMethod::Post, sub_path: "receive", log_type: ChannelLogType::MsgReceive }
    }

    #[test]
    fn stop_keyword_decodes_to_stop_contact_event() {
        let handler = MtHandler::new();
        let body = b"Keyword=Stop&Msisdn=%2B923161909799";
        let record = handler.decode_inbound(&channel(), &route(), None, body).unwrap();
        match record {
            InboundRecord::Event { address_raw, event_type, .. } => {
                assert_eq!(address_raw, "+923161909799");
                assert_eq!(event_type, ChannelEventType::StopContact);
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn multipart_chunk_decodes_long_id_and_part_fields() {
        let handler = MtHandler::new();
        let body = b"msglong.id=L&msglong.msgref=2&msglong.msgcount=2&Content=world&Msisdn=%2B250788383383";
        let record = handler.decode_inbound(&channel(), &route(), None, body).unwrap();
        match record {
            InboundRecord::MultipartChunk { long_id, part_index, part_count, text, .. } => {
                assert_eq!(long_id, "L");
                assert_eq!(part_index, 2);
                assert_eq!(part_count, 2);
                assert_eq!(text, "world");
            }
            other => panic!("expected MultipartChunk, got {other:?}"),
        }
    }

    #[test]
    fn plain_message_decodes_to_message_record() {
        let handler = MtHandler::new();
        let body = b"Content=hello&Msisdn=%2B250788383383";
        let record = handler.decode_inbound(&channel(), &route(), None, body).unwrap();
        match record {
            InboundRecord::Message { text, address_raw, .. } => {
                assert_eq!(text, "hello");
                assert_eq!(address_raw, "+250788383383");
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }
}
