//! Arabiacell-style SMS adapter: form-urlencoded outbound POST, XML
//! response. Channel type tag `"AC"`.

use async_trait::async_trait;
use courier_adapter::{build_send_intents, send_logged, Handler, RouteSpec, SendContext, SendIntent, SendResult, SplitterConfig};
use courier_common::{AdapterError, Channel, ChannelLog, MsgOut};
use serde::{Deserialize, Serialize};

const ENDPOINT: &str = "https://acsdp.arabiacell.net";

pub struct ArabiacellHandler;

impl ArabiacellHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArabiacellHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct SendForm<'a> {
    #[serde(rename = "userName")]
    user_name: &'a str,
    password: &'a str,
    #[serde(rename = "serviceId")]
    service_id: &'a str,
    msisdn: &'a str,
    #[serde(rename = "messageBody")]
    message_body: &'a str,
    #[serde(rename = "chargingLevel")]
    charging_level: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "response")]
struct SendXmlResponse {
    code: u16,
    #[serde(rename = "message_id")]
    message_id: Option<String>,
    text: Option<String>,
}

#[async_trait]
impl Handler for ArabiacellHandler {
    fn channel_type(&self) -> &'static str {
        "AC"
    }

    fn name(&self) -> &'static str {
        "Arabiacell SMS"
    }

    fn routes(&self) -> Vec<RouteSpec> {
        Vec::new()
    }

    async fn send(&self, ctx: &SendContext, msg: &MsgOut, result: &mut SendResult, log: &mut ChannelLog) -> Result<(), AdapterError> {
        // Resolved open question: require all four keys, never substitute
        // `password` for a missing `service_id`.
        let username = msg.channel.require_config("username")?;
        let password = msg.channel.require_config("password")?;
        let service_id = msg.channel.require_config("service_id")?;
        let charging_level = msg.channel.require_config("charging_level")?;
        let send_url = msg.channel.config.get("send_url").map(String::as_str).unwrap_or(ENDPOINT);

        let intents = build_send_intents(msg, &SplitterConfig { max_msg_length: 160, ..Default::default() });
        for intent in intents {
            let text = match intent {
                SendIntent::TextPart(t) => t,
                SendIntent::MediaPart(a) => a.as_wire_string(),
                SendIntent::CaptionedAttachment { attachment, caption } => format!("{caption} {}", attachment.as_wire_string()),
                SendIntent::InteractiveButtons { text, .. } | SendIntent::InteractiveList { text, .. } => text,
                SendIntent::Template(template) => template.name,
            };

            let form = SendForm {
                user_name: username,
                password,
                service_id,
                msisdn: &msg.urn.path,
                message_body: &text,
                charging_level,
            };

            let request = ctx.http.post(send_url).timeout(ctx.send_timeout).form(&form);
            let response = send_logged(request, log).await?;

            let parsed: SendXmlResponse = quick_xml::de::from_str(&response.body)
                .map_err(|e| AdapterError::ResponseUnparseable(format!("arabiacell xml: {e}")))?;

            if parsed.code == 204 {
                if let Some(id) = parsed.message_id {
                    result.push_external_id(id);
                }
            } else {
                let reason = parsed.text.unwrap_or_else(|| format!("response code {}", parsed.code));
                return Err(AdapterError::ResponseContent(reason));
            }
        }
        Ok(())
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        channel.config.get("password").cloned().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::{ChannelLogType, Urn};

    fn channel() -> Channel {
        Channel::new("AC", "short-code", "RW")
            .with_config("username", "u1")
            .with_config("password", "p1")
            .with_config("service_id", "s1")
            .with_config("charging_level", "0")
    }

    fn msg(channel: Channel) -> MsgOut {
        MsgOut {
            id: 1,
            channel,
            urn: Urn::tel("+250788383383"),
            text: "Hi".into(),
            attachments: vec![],
            quick_replies: vec![],
            locale: None,
            template: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_service_id_is_channel_config_error_not_password_bug() {
        let handler = ArabiacellHandler::new();
        let mut channel = channel();
        channel.config.remove("service_id");
        let msg = msg(channel);
        let ctx = SendContext { http: reqwest::Client::new(), send_timeout: std::time::Duration::from_secs(5) };
        let mut result = SendResult::new();
        let mut log = ChannelLog::new(msg.channel.uuid, ChannelLogType::MsgSend);
        let err = handler.send(&ctx, &msg, &mut result, &mut log).await.unwrap_err();
        assert!(matches!(err, AdapterError::ChannelConfig(_)));
    }

    #[test]
    fn success_xml_parses_code_and_message_id() {
        let parsed: SendXmlResponse = quick_xml::de::from_str("<response><code>204</code><message_id>ext1</message_id></response>").unwrap();
        assert_eq!(parsed.code, 204);
        assert_eq!(parsed.message_id.as_deref(), Some("ext1"));
    }

    #[test]
    fn failure_xml_parses_code_and_text() {
        let parsed: SendXmlResponse = quick_xml::de::from_str("<response><code>501</code><text>failure</text></response>").unwrap();
        assert_eq!(parsed.code, 501);
        assert_eq!(parsed.text.as_deref(), Some("failure"));
    }

    #[tokio::test]
    async fn send_success_against_mock_server_wires_external_id() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<response><code>204</code><message_id>ext1</message_id></response>"))
            .mount(&server)
            .await;

        let mut channel = channel();
        channel.config.insert("send_url".into(), server.uri());
        let msg_data = msg(channel);
        let handler = ArabiacellHandler::new();
        let ctx = SendContext { http: reqwest::Client::new(), send_timeout: std::time::Duration::from_secs(5) };
        let mut result = SendResult::new();
        let mut log = ChannelLog::new(msg_data.channel.uuid, ChannelLogType::MsgSend);

        handler.send(&ctx, &msg_data, &mut result, &mut log).await.unwrap();
        assert_eq!(result.external_ids, vec!["ext1".to_string()]);
    }

    #[tokio::test]
    async fn send_failure_response_is_response_content_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<response><code>501</code><text>failure</text></response>"))
            .mount(&server)
            .await;

        let mut channel = channel();
        channel.config.insert("send_url".into(), server.uri());
        let msg_data = msg(channel);
        let handler = ArabiacellHandler::new();
        let ctx = SendContext { http: reqwest::Client::new(), send_timeout: std::time::Duration::from_secs(5) };
        let mut result = SendResult::new();
        let mut log = ChannelLog::new(msg_data.channel.uuid, ChannelLogType::MsgSend);

        let err = handler.send(&ctx, &msg_data, &mut result, &mut log).await.unwrap_err();
        assert!(matches!(err, AdapterError::ResponseContent(_)));
    }
}
