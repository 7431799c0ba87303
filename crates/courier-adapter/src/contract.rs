//! AdapterContract — the small required surface every provider adapter
//! satisfies, plus optional capability traits probed at registration time.
//! Expressed as `async_trait`s the way a mediator trait is, rather than a
//! tagged-variant enum; either is equivalent, this one reads more
//! naturally for a trait-object registry.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AdapterError, Channel, ChannelEventType, ChannelLog, MsgOut};
use std::collections::HashMap;

/// Accumulates outcomes of a `Send` invocation: zero or more external IDs,
/// one per message part the provider actually accepted.
#[derive(Debug, Default, Clone)]
pub struct SendResult {
    pub external_ids: Vec<String>,
}

impl SendResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_external_id(&mut self, id: impl Into<String>) {
        self.external_ids.push(id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.external_ids.is_empty()
    }
}

/// The required surface every channel-type handler implements.
///
/// `send` performs an at-most-once delivery attempt: the adapter MUST NOT
/// retry internally on a connection error, and MAY loop internally across
/// message parts, short-circuiting on the first failure. Retrying a failed
/// attempt is always the Sender's job, never the adapter's.
#[async_trait]
pub trait Handler: Send + Sync {
    /// 2-4 ASCII channel-type tag this handler answers for, e.g. `"AC"`.
    fn channel_type(&self) -> &'static str;

    /// Human-readable name for logs and the monitoring surface.
    fn name(&self) -> &'static str;

    /// Route tuples this handler wants mounted under
    /// `/c/<type>/<uuid>/<action>`. `courier-webhook` calls this once at
    /// process init and never again — registration is process-init only;
    /// the registry is read-only thereafter.
    fn routes(&self) -> Vec<RouteSpec>;

    /// Perform one delivery attempt for `msg`, recording every outbound
    /// HTTP exchange into `log`. Returns `Ok(())` with `result` populated
    /// with external ids on success, or the sentinel `AdapterError` the
    /// the retry classifier classifies into a `MsgStatus`.
    async fn send(&self, ctx: &SendContext, msg: &MsgOut, result: &mut SendResult, log: &mut ChannelLog) -> Result<(), AdapterError>;

    /// Secrets to elide from stored `ChannelLog` request/response bodies
    /// and headers. Default: no secrets declared (handlers that hold
    /// credentials must override).
    fn redact_values(&self, _channel: &Channel) -> Vec<String> {
        Vec::new()
    }

    /// Decode one inbound webhook body for `route` into a normalized
    /// record. The incoming pipeline owns everything generic that follows
    /// (URN parsing with the channel's country code, dedup, multipart
    /// reassembly, backend write, spool fallback); this method only
    /// translates the provider's wire shape. Default: every route is
    /// ignored (adapters with no inbound routes never need to override
    /// this).
    fn decode_inbound(&self, _channel: &Channel, _route: &RouteSpec, _content_type: Option<&str>, _body: &[u8]) -> Result<InboundRecord, AdapterError> {
        Ok(InboundRecord::Ignored)
    }

    /// The success body to write for a `receive`-class route, unless
    /// `AckWriter` is registered for a literal-body provider.
    fn success_body(&self) -> serde_json::Value {
        serde_json::json!({ "message": "accepted", "data": [] })
    }

    /// Declares the signature contract for this handler's webhooks, if
    /// any. The webhook router validates before calling `decode_inbound`.
    /// Default: unsigned.
    fn signature_spec(&self, _channel: &Channel) -> Option<SignatureSpec> {
        None
    }
}

/// How a provider signs its webhook requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// HMAC-SHA256 over the raw request body.
    HmacSha256,
    /// HS256 JWT whose claims are `{payload_hash, url_hash}`.
    JwtHs256,
}

/// One adapter's declared signature requirement: which header carries the
/// signature, which algorithm validates it, and which channel config key
/// holds the shared secret.
#[derive(Debug, Clone)]
pub struct SignatureSpec {
    pub header_name: &'static str,
    pub algorithm: SignatureAlgorithm,
    pub secret_config_key: &'static str,
}

/// What an adapter's `decode_inbound` extracted from one webhook request,
/// before the incoming pipeline's generic dedup/reassembly/backend-write
/// steps run.
#[derive(Debug, Clone)]
pub enum InboundRecord {
    /// A complete, single-part inbound message.
    Message { address_raw: String, text: String, external_id: Option<String>, attachments: Vec<courier_common::Attachment> },
    /// One part of a provider-side multipart-SMS reassembly, keyed by a
    /// provider-assigned long-message id shared across parts.
    MultipartChunk { long_id: String, part_index: u32, part_count: u32, text: String, address_raw: String, external_id: Option<String> },
    /// A channel-level event with no message content.
    Event { address_raw: String, event_type: ChannelEventType, extra: HashMap<String, String> },
    /// A delivery-status callback correlated by external id.
    Status { external_id: String, status: courier_common::MsgStatus, error: Option<courier_common::ErrorTaxonomyEntry> },
    /// Well-formed but not actionable (e.g. a provider health check).
    Ignored,
}

/// Declares one HTTP route a handler wants mounted, plus the diagnostic log
/// type it should be recorded under.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub method: HttpMethod,
    /// Sub-path under `/c/<type>/<uuid>/`, e.g. `"receive"`, `"status"`.
    pub sub_path: &'static str,
    pub log_type: courier_common::ChannelLogType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Per-`send` context threaded through an adapter invocation: the shared
/// HTTP client and a cancellation-aware send timeout. Adapters never
/// construct their own `reqwest::Client` — one per process, shared via
/// this context.
pub struct SendContext {
    pub http: reqwest::Client,
    pub send_timeout: std::time::Duration,
}

/// Optional capability: how to build an authenticated request for
/// provider-hosted inbound media.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn build_attachment_request(&self, channel: &Channel, url: &str) -> Result<reqwest::RequestBuilder, AdapterError>;
}

/// Optional capability: a provider that requires a specific literal ack
/// body (e.g. `"000"`, `"ACK/Jasmin"`) instead of the default JSON
/// envelope.
pub trait AckWriter: Send + Sync {
    fn write_msg_success(&self) -> (http::StatusCode, String);
    fn write_status_success(&self) -> (http::StatusCode, String) {
        self.write_msg_success()
    }
    fn write_request_ignored(&self) -> (http::StatusCode, String) {
        (http::StatusCode::OK, "ignored".to_string())
    }
}

/// A registered handler bundled with whichever optional capabilities it
/// implements, resolved once at registration time rather than probed via
/// downcasting on every request.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn Handler>,
    pub attachment_fetcher: Option<Arc<dyn AttachmentFetcher>>,
    pub ack_writer: Option<Arc<dyn AckWriter>>,
}

impl RegisteredHandler {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler, attachment_fetcher: None, ack_writer: None }
    }

    pub fn with_attachment_fetcher(mut self, fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        self.attachment_fetcher = Some(fetcher);
        self
    }

    pub fn with_ack_writer(mut self, writer: Arc<dyn AckWriter>) -> Self {
        self.ack_writer = Some(writer);
        self
    }
}
