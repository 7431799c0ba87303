//! Thin wrapper around the shared `reqwest::Client` that every adapter
//! sends through. Records each request/response as an `HttpExchange` on
//! the caller's `ChannelLog`, so adapters get diagnostic logging for free
//! instead of each hand-rolling it around its own HTTP calls.

use std::time::Instant;

use courier_common::{AdapterError, ChannelLog, HttpExchange};
use reqwest::RequestBuilder;
use tracing::warn;

/// Sends `request`, appending one `HttpExchange` to `log` regardless of
/// outcome, and classifies the result into the adapter sentinel set:
/// transport failures and 5xx responses both become `ConnectionFailed`
/// (the provider's connection/transport is the failure, not the request
/// content), 3xx/4xx become `ResponseStatus`, everything else is handed
/// back as the raw body text for the caller to parse and classify further
/// (e.g. `ResponseContent`).
pub async fn send_logged(request: RequestBuilder, log: &mut ChannelLog) -> Result<LoggedResponse, AdapterError> {
    let (client, req) = request.build_split();
    let req = req.map_err(|e| AdapterError::Other(format!("failed to build request: {e}")))?;

    let method = req.method().to_string();
    let url = req.url().to_string();
    let request_headers = header_map_to_strings(req.headers());
    let request_body = req
        .body()
        .and_then(|b| b.as_bytes())
        .map(|b| String::from_utf8_lossy(b).to_string())
        .unwrap_or_default();

    let started = Instant::now();
    let result = client.execute(req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let response_headers = header_map_to_strings(response.headers());
            let response_body = response.text().await.unwrap_or_default();

            log.record_exchange(HttpExchange {
                method,
                url,
                request_headers,
                request_body,
                status_code: Some(status_code),
                response_headers,
                response_body: response_body.clone(),
                elapsed_ms,
            });

            if (500..600).contains(&status_code) {
                return Err(AdapterError::ConnectionFailed(format!("server error: {status_code}")));
            }
            if !(200..300).contains(&status_code) {
                return Err(AdapterError::ResponseStatus(status_code));
            }

            Ok(LoggedResponse { status_code, body: response_body })
        }
        Err(err) => {
            log.record_exchange(HttpExchange {
                method,
                url,
                request_headers,
                request_body,
                status_code: None,
                response_headers: Default::default(),
                response_body: String::new(),
                elapsed_ms,
            });
            let message = err.to_string();
            log.record_error(&message);
            warn!(error = %message, "adapter http request failed");
            Err(AdapterError::ConnectionFailed(message))
        }
    }
}

pub struct LoggedResponse {
    pub status_code: u16,
    pub body: String,
}

fn header_map_to_strings(headers: &reqwest::header::HeaderMap) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("<binary>").to_string()))
        .collect()
}
