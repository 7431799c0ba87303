//! JWT-signed webhook adapter, modeled on Messagebird-style inbound SMS.
//! Declares a JWT-HS256 signature contract so the webhook router validates
//! the `Messagebird-Signature-Jwt` header before `decode_inbound` ever
//! runs. Channel type tag `"mbd"`.

use async_trait::async_trait;
use courier_adapter::{Handler, HttpMethod, InboundRecord, RouteSpec, SendContext, SendResult, SignatureAlgorithm, SignatureSpec};
use courier_common::{AdapterError, Channel, ChannelLog, ChannelLogType, MsgOut};
use serde::Deserialize;

pub struct MessagebirdHandler;

impl MessagebirdHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MessagebirdHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MbdPayload {
    originator: String,
    body: String,
    id: Option<String>,
}

#[async_trait]
impl Handler for MessagebirdHandler {
    fn channel_type(&self) -> &'static str {
        "mbd"
    }

    fn name(&self) -> &'static str {
        "Messagebird"
    }

    fn routes(&self) -> Vec<RouteSpec> {
        vec![RouteSpec { method: HttpMethod::Post, sub_path: "receive", log_type: ChannelLogType::MsgReceive }]
    }

    async fn send(&self, _ctx: &SendContext, _msg: &MsgOut, _result: &mut SendResult, _log: &mut ChannelLog) -> Result<(), AdapterError> {
        Err(AdapterError::ChannelConfig("Messagebird handler does not support outbound send in this demo".into()))
    }

    fn decode_inbound(&self, _channel: &Channel, _route: &RouteSpec, _content_type: Option<&str>, body: &[u8]) -> Result<InboundRecord, AdapterError> {
        let payload: MbdPayload = serde_json::from_slice(body).map_err(|e| AdapterError::ResponseUnparseable(format!("messagebird json: {e}")))?;
        Ok(InboundRecord::Message { address_raw: payload.originator, text: payload.body, external_id: payload.id, attachments: Vec::new() })
    }

    fn signature_spec(&self, _channel: &Channel) -> Option<SignatureSpec> {
        Some(SignatureSpec { header_name: "Messagebird-Signature-Jwt", algorithm: SignatureAlgorithm::JwtHs256, secret_config_key: "secret" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::Channel as CourierChannel;

    #[test]
    fn declares_jwt_signature_spec() {
        let handler = MessagebirdHandler::new();
        let channel = CourierChannel::new("mbd", "acct1", "NL");
        let spec = handler.signature_spec(&channel).unwrap();
        assert_eq!(spec.header_name, "Messagebird-Signature-Jwt");
        assert_eq!(spec.algorithm, SignatureAlgorithm::JwtHs256);
    }

    #[test]
    fn decodes_inbound_message_json() {
        let handler = MessagebirdHandler::new();
        let channel = CourierChannel::new("mbd", "acct1", "NL");
        let route = RouteSpec { method: HttpMethod::Post, sub_path: "receive", log_type: ChannelLogType::MsgReceive };
        let body = br#"{"originator":"+31612345678","body":"hi there","id":"msg1"}"#;
        let record = handler.decode_inbound(&channel, &route, Some("application/json"), body).unwrap();
        match record {
            InboundRecord::Message { address_raw, text, external_id, .. } => {
                assert_eq!(address_raw, "+31612345678");
                assert_eq!(text, "hi there");
                assert_eq!(external_id.as_deref(), Some("msg1"));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }
}
