//! Core domain types shared by every Courier crate: channels, in/outbound
//! messages, status updates, channel events, request diagnostics, and the
//! closed error taxonomy adapters are allowed to surface.

pub mod logging;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Channel
// ============================================================================

/// A configured provider binding: type + uuid + address + config.
///
/// Identity is `(channel_type, uuid)`. Configuration is immutable for the
/// lifetime of this in-memory value; a config change is observed by
/// constructing a fresh `Channel` and re-registering it with the backend,
/// never by mutating one in place.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Channel {
    pub uuid: Uuid,
    /// 2-4 ASCII characters, e.g. "AC", "D3C".
    pub channel_type: String,
    /// Provider-side identifier: short-code, phone number, account id.
    pub address: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    /// URN scheme prefixes this channel accepts, e.g. ["tel"], ["whatsapp"].
    pub schemes: Vec<String>,
    /// Recognized keys are adapter-specific; see each adapter's contract.
    pub config: HashMap<String, String>,
}

impl Channel {
    pub fn new(channel_type: impl Into<String>, address: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            channel_type: channel_type.into(),
            address: address.into(),
            country: country.into(),
            schemes: Vec::new(),
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Returns a required config value, or `AdapterError::ChannelConfig` naming the key.
    pub fn require_config(&self, key: &str) -> Result<&str, AdapterError> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AdapterError::ChannelConfig(format!("missing required config key '{key}'")))
    }

    pub fn max_length_override(&self) -> Option<usize> {
        self.config.get("max_length").and_then(|v| v.parse().ok())
    }
}

// ============================================================================
// URN
// ============================================================================

/// A typed address, e.g. `tel:+1234567890`, `whatsapp:12345`, `ext:abc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Urn {
    pub scheme: String,
    pub path: String,
}

impl Urn {
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Self { scheme: scheme.into(), path: path.into() }
    }

    pub fn tel(number: impl Into<String>) -> Self {
        Self::new("tel", number)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)
    }
}

impl std::str::FromStr for Urn {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (scheme, path) = s.split_once(':').ok_or_else(|| format!("not a urn: {s}"))?;
        if scheme.is_empty() || path.is_empty() {
            return Err(format!("not a urn: {s}"));
        }
        Ok(Self::new(scheme, path))
    }
}

// ============================================================================
// Attachments, quick replies, templating
// ============================================================================

/// A `mimetype:url` attachment reference. The core never fetches or
/// transcodes attachment bytes; it only forwards the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attachment {
    pub content_type: String,
    pub url: String,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self { content_type: content_type.into(), url: url.into() }
    }

    pub fn as_wire_string(&self) -> String {
        format!("{}:{}", self.content_type, self.url)
    }

    /// An attachment is captionable if its mimetype is image/video/audio;
    /// adapters consult this when deciding `attachments_as_caption` policy.
    pub fn is_captionable(&self) -> bool {
        let top_level = self.content_type.split('/').next().unwrap_or("");
        matches!(top_level, "image" | "video" | "audio")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuickReply {
    pub label: String,
    pub extra: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TemplateRef {
    /// Template name or UUID, adapter-specific.
    pub name: String,
    pub variables: Vec<String>,
}

// ============================================================================
// MsgOut / MsgIn
// ============================================================================

/// Outbound message, created by the backend and consumed exactly once
/// (successfully, or marked Failed/Errored).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MsgOut {
    /// Monotonic per-backend identifier.
    pub id: u64,
    pub channel: Channel,
    pub urn: Urn,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub quick_replies: Vec<QuickReply>,
    pub locale: Option<String>,
    pub template: Option<TemplateRef>,
    pub created_at: DateTime<Utc>,
}

impl MsgOut {
    /// Invariant: at least one of {text non-empty, attachments non-empty}.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.text.trim().is_empty() && self.attachments.is_empty() {
            return Err("MsgOut must have non-empty text or at least one attachment".to_string());
        }
        Ok(())
    }
}

/// Inbound message, created by the incoming pipeline from a validated
/// provider payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MsgIn {
    pub channel_uuid: Uuid,
    pub sender: Urn,
    pub text: String,
    /// Provider's own message identifier, used for 24h dedup.
    pub external_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub received_at: Option<DateTime<Utc>>,
    pub contact_name: Option<String>,
}

// ============================================================================
// StatusUpdate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum MsgStatus {
    /// Ordering used by the backend: Errored < Wired < Sent < Delivered.
    Errored,
    Wired,
    Sent,
    Delivered,
    /// Terminal; may always be set regardless of current status.
    Failed,
}

impl MsgStatus {
    /// A status may only refine (never regress) the previous state, except
    /// that `Failed` may always be set.
    pub fn may_transition_from(self, previous: MsgStatus) -> bool {
        if self == MsgStatus::Failed {
            return true;
        }
        if previous == MsgStatus::Failed {
            return false;
        }
        self >= previous
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub enum MsgRef {
    BackendId(u64),
    ExternalId(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub channel_uuid: Uuid,
    pub msg_ref: MsgRef,
    pub status: MsgStatus,
    pub error: Option<ErrorTaxonomyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorTaxonomyEntry {
    pub kind: String,
    pub code: Option<String>,
    pub reason: Option<String>,
}

// ============================================================================
// ChannelEvent
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEventType {
    StopContact,
    NewConversation,
    Referral,
    WelcomeMessage,
    OptIn,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChannelEvent {
    pub channel_uuid: Uuid,
    pub urn: Urn,
    pub event_type: ChannelEventType,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

// ============================================================================
// ChannelLog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLogType {
    MsgReceive,
    MsgStatus,
    MsgSend,
    MultiReceive,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: String,
    pub status_code: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_body: String,
    pub elapsed_ms: u64,
}

/// Per-request diagnostic record. Created at request/send entry, persisted
/// at exit. Secrets named by an adapter's redaction list are replaced with
/// `****` in stored request/response bodies and headers before persistence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChannelLog {
    pub channel_uuid: Uuid,
    pub log_type: ChannelLogType,
    pub exchanges: Vec<HttpExchange>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChannelLog {
    pub fn new(channel_uuid: Uuid, log_type: ChannelLogType) -> Self {
        Self {
            channel_uuid,
            log_type,
            exchanges: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn record_exchange(&mut self, exchange: HttpExchange) {
        self.exchanges.push(exchange);
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn close(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Replace occurrences of `secrets` with `****` in every stored body and
    /// header value. Called once before the log is handed to the backend.
    pub fn redact(&mut self, secrets: &[String]) {
        for exchange in &mut self.exchanges {
            for secret in secrets {
                if secret.is_empty() {
                    continue;
                }
                exchange.request_body = exchange.request_body.replace(secret.as_str(), "****");
                exchange.response_body = exchange.response_body.replace(secret.as_str(), "****");
                for value in exchange.request_headers.values_mut() {
                    *value = value.replace(secret.as_str(), "****");
                }
                for value in exchange.response_headers.values_mut() {
                    *value = value.replace(secret.as_str(), "****");
                }
            }
        }
    }
}

// ============================================================================
// Priority bands
// ============================================================================

/// Priority band expressed as a signed microsecond offset added to the
/// current time when scoring a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Priority {
    /// Order ahead of normal: -48h offset.
    High,
    Default,
    /// Low/Bulk: +24h offset.
    Low,
}

impl Priority {
    pub const HIGH_OFFSET_MICROS: i64 = -48 * 3600 * 1_000_000;
    pub const DEFAULT_OFFSET_MICROS: i64 = 0;
    pub const LOW_OFFSET_MICROS: i64 = 24 * 3600 * 1_000_000;

    pub fn offset_micros(self) -> i64 {
        match self {
            Priority::High => Self::HIGH_OFFSET_MICROS,
            Priority::Default => Self::DEFAULT_OFFSET_MICROS,
            Priority::Low => Self::LOW_OFFSET_MICROS,
        }
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// The closed set of sentinel errors an adapter's `send` may surface. The
/// Sender, not the adapter, owns classification into a `MsgStatus`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unexpected response status {0}")]
    ResponseStatus(u16),

    #[error("response body unparseable: {0}")]
    ResponseUnparseable(String),

    #[error("response content indicates failure: {0}")]
    ResponseContent(String),

    #[error("channel configuration error: {0}")]
    ChannelConfig(String),

    #[error("provider reported failure [{code}]: {text}")]
    FailedWithReason { code: String, text: String },

    #[error("unexpected adapter error: {0}")]
    Other(String),
}

impl AdapterError {
    /// Whether the backend should retry a message that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::ConnectionFailed(_)
                | AdapterError::ResponseStatus(_)
                | AdapterError::ResponseUnparseable(_)
                | AdapterError::Other(_)
        )
    }

    pub fn taxonomy_entry(&self) -> ErrorTaxonomyEntry {
        match self {
            AdapterError::ConnectionFailed(m) => ErrorTaxonomyEntry {
                kind: "transport".into(),
                code: None,
                reason: Some(m.clone()),
            },
            AdapterError::ResponseStatus(code) => ErrorTaxonomyEntry {
                kind: "response_status".into(),
                code: Some(code.to_string()),
                reason: None,
            },
            AdapterError::ResponseUnparseable(m) => ErrorTaxonomyEntry {
                kind: "response_unparseable".into(),
                code: None,
                reason: Some(m.clone()),
            },
            AdapterError::ResponseContent(m) => ErrorTaxonomyEntry {
                kind: "response_content".into(),
                code: None,
                reason: Some(m.clone()),
            },
            AdapterError::ChannelConfig(m) => ErrorTaxonomyEntry {
                kind: "configuration".into(),
                code: None,
                reason: Some(m.clone()),
            },
            AdapterError::FailedWithReason { code, text } => ErrorTaxonomyEntry {
                kind: "external_failure".into(),
                code: Some(code.clone()),
                reason: Some(text.clone()),
            },
            AdapterError::Other(m) => ErrorTaxonomyEntry {
                kind: "internal".into(),
                code: None,
                reason: Some(m.clone()),
            },
        }
    }
}

/// Infrastructure-level errors (not surfaced by adapters): Redis, I/O,
/// configuration, serialization.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, CourierError>;

// ============================================================================
// Health types (ambient monitoring surface)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub channels_active: u32,
    pub channels_throttled: u32,
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_refines_but_never_regresses() {
        assert!(MsgStatus::Sent.may_transition_from(MsgStatus::Wired));
        assert!(!MsgStatus::Wired.may_transition_from(MsgStatus::Sent));
        assert!(MsgStatus::Failed.may_transition_from(MsgStatus::Delivered));
        assert!(!MsgStatus::Sent.may_transition_from(MsgStatus::Failed));
    }

    #[test]
    fn msg_out_requires_text_or_attachment() {
        let channel = Channel::new("AC", "1234", "RW");
        let msg = MsgOut {
            id: 1,
            channel,
            urn: Urn::tel("+250788383383"),
            text: String::new(),
            attachments: Vec::new(),
            quick_replies: Vec::new(),
            locale: None,
            template: None,
            created_at: Utc::now(),
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn urn_parses_scheme_and_path() {
        let urn: Urn = "whatsapp:12345".parse().unwrap();
        assert_eq!(urn.scheme, "whatsapp");
        assert_eq!(urn.path, "12345");
    }

    #[test]
    fn channel_log_redacts_secrets_in_bodies_and_headers() {
        let mut log = ChannelLog::new(Uuid::new_v4(), ChannelLogType::MsgSend);
        log.record_exchange(HttpExchange {
            method: "POST".into(),
            url: "https://example.com".into(),
            request_headers: HashMap::from([("Authorization".to_string(), "Bearer supersecret".to_string())]),
            request_body: "password=supersecret".into(),
            status_code: Some(200),
            response_headers: HashMap::new(),
            response_body: String::new(),
            elapsed_ms: 10,
        });
        log.redact(&["supersecret".to_string()]);
        assert!(!log.exchanges[0].request_body.contains("supersecret"));
        assert!(!log.exchanges[0].request_headers["Authorization"].contains("supersecret"));
    }
}
