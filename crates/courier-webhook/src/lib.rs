//! WebhookRouter — the HTTP surface `/c/<type>/<uuid>/<action>` every
//! provider's inbound callbacks land on. Resolves the channel, validates
//! any declared signature, decodes the body through the adapter's own
//! `decode_inbound`, and hands the result to the `IncomingPipeline`. One
//! dynamic route dispatches to whichever handler is registered for the
//! path's channel type, the same way the teacher's API layer resolves a
//! single `AppState` across many handler functions instead of one closure
//! per endpoint.

pub mod pipeline;
pub mod signature;
pub mod urn;

pub use pipeline::{IncomingPipeline, PipelineError, PipelineOutcome};

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use courier_adapter::{ChannelLogType, HandlerRegistry, HttpMethod, InboundRecord, RouteSpec};
use courier_backend::Backend;
use courier_common::ChannelLog;
use tracing::warn;
use uuid::Uuid;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub registry: HandlerRegistry,
    pub pipeline: IncomingPipeline,
}

/// Builds the webhook router: one catch-all route under `/c` plus the 1
/// MiB body size limit the spec mandates.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/c/{channel_type}/{uuid}/{action}", any(handle_webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn method_matches(route_method: HttpMethod, method: &Method) -> bool {
    match route_method {
        HttpMethod::Get => method == Method::GET,
        HttpMethod::Post => method == Method::POST,
    }
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "message": message.into(), "data": [] })
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path((channel_type, uuid, action)): Path<(String, Uuid, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let channel = match state.backend.resolve_channel(&channel_type, uuid).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(channel_type, %uuid, error = %e, "webhook for unknown or mismatched channel");
            return (StatusCode::BAD_REQUEST, Json(error_body("unknown channel"))).into_response();
        }
    };

    let registered = match state.registry.lookup(&channel_type) {
        Ok(h) => h,
        Err(e) => {
            warn!(channel_type, error = %e, "webhook for unregistered channel type");
            return (StatusCode::NOT_FOUND, Json(error_body(e.to_string()))).into_response();
        }
    };
    let handler = registered.handler.as_ref();

    let route = match handler.routes().into_iter().find(|r| r.sub_path == action && method_matches(r.method, &method)) {
        Some(r) => r,
        None => return (StatusCode::NOT_FOUND, Json(error_body("no such route"))).into_response(),
    };

    let mut log = ChannelLog::new(channel.uuid, route.log_type);

    if let Some(spec) = handler.signature_spec(&channel) {
        let header_value = headers.get(spec.header_name).and_then(|v| v.to_str().ok());
        let secret = match channel.require_config(spec.secret_config_key) {
            Ok(s) => s,
            Err(e) => {
                warn!(channel_type, %uuid, error = %e, "signature spec declared but secret config key missing");
                return (StatusCode::BAD_REQUEST, Json(error_body("token signature is invalid"))).into_response();
            }
        };
        let url = format!("/c/{channel_type}/{uuid}/{action}");
        if let Err(e) = signature::validate(&spec, header_value, secret, &body, &url) {
            warn!(channel_type, %uuid, error = %e, "webhook signature validation failed");
            log.record_error(e.to_string());
            log.close();
            let _ = state.backend.write_channel_log(log).await;
            return (StatusCode::BAD_REQUEST, Json(error_body("token signature is invalid"))).into_response();
        }
    }

    let content_type = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let record = match handler.decode_inbound(&channel, &route, content_type, &body) {
        Ok(record) => record,
        Err(e) => {
            warn!(channel_type, %uuid, error = %e, "adapter failed to decode inbound webhook body");
            log.record_error(e.to_string());
            log.close();
            let _ = state.backend.write_channel_log(log).await;
            return (StatusCode::BAD_REQUEST, Json(error_body(e.to_string()))).into_response();
        }
    };

    log.close();
    let _ = state.backend.write_channel_log(log).await;

    respond(handler, &registered, &route, &channel, &state, record).await
}

async fn respond(
    handler: &dyn courier_adapter::Handler,
    registered: &courier_adapter::RegisteredHandler,
    route: &RouteSpec,
    channel: &courier_common::Channel,
    state: &AppState,
    record: InboundRecord,
) -> Response {
    let outcome = match state.pipeline.process(channel, record).await {
        Ok(outcome) => outcome,
        Err(PipelineError::InvalidSender(reason)) => {
            return (StatusCode::BAD_REQUEST, Json(error_body(reason))).into_response();
        }
        Err(e) => {
            warn!(channel_uuid = %channel.uuid, error = %e, "incoming pipeline failed");
            return (StatusCode::BAD_REQUEST, Json(error_body(e.to_string()))).into_response();
        }
    };

    match outcome {
        PipelineOutcome::BufferedPart => {
            (StatusCode::OK, Json(serde_json::json!({ "message": "Message part received", "data": [] }))).into_response()
        }
        PipelineOutcome::Duplicate | PipelineOutcome::Ignored => match &registered.ack_writer {
            Some(writer) => {
                let (status, body) = writer.write_request_ignored();
                (status, body).into_response()
            }
            None => (StatusCode::OK, Json(serde_json::json!({ "message": "accepted", "data": [{"type": "ignored"}] }))).into_response(),
        },
        PipelineOutcome::Written => match &registered.ack_writer {
            Some(writer) => {
                let (status, body) = if route.log_type == ChannelLogType::MsgStatus { writer.write_status_success() } else { writer.write_msg_success() };
                (status, body).into_response()
            }
            None => (StatusCode::OK, Json(handler.success_body())).into_response(),
        },
    }
}
