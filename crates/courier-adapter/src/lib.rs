//! The adapter contract, handler registry, retry classification, circuit
//! breaker, message splitter, and logged-HTTP helper every provider
//! integration in `courier-adapters` builds on.

mod circuit_breaker;
mod contract;
mod http;
mod registry;
mod retry;
mod split;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use contract::{
    AckWriter, AttachmentFetcher, Handler, HttpMethod, InboundRecord, RegisteredHandler, RouteSpec, SendContext, SendResult, SignatureAlgorithm,
    SignatureSpec,
};
pub use http::{send_logged, LoggedResponse};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, RegistryError};
pub use retry::{classify_error, classify_success, Classification};
pub use split::{build_send_intents, split_text, AttachmentPolicy, SendIntent, SplitterConfig};
