//! Sender — the fixed-size worker pool that drains the priority queue,
//! invokes the registered adapter's `Send`, classifies the outcome, and
//! writes the result back to the backend. Mirrors the teacher's
//! `ProcessPool` worker-loop shape (bounded concurrency, graceful shutdown
//! via a stop signal, no internal retry), generalized from a per-message-group
//! mpsc worker pool to the single shared priority queue this system reads
//! from.

use std::sync::Arc;
use std::time::Duration;

use courier_adapter::{classify_error, classify_success, CircuitBreakerRegistry, HandlerRegistry, SendContext, SendResult};
use courier_backend::Backend;
use courier_common::{ChannelLog, ChannelLogType, MsgRef, StatusUpdate};
use courier_queue::{Dequeued, PriorityQueue};
use tracing::{debug, error, info, warn};

mod metrics;

const EMPTY_POLL_DELAY: Duration = Duration::from_millis(100);

/// Fixed configuration for one Sender worker pool instance.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub worker_count: usize,
    pub send_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self { worker_count: 4, send_timeout: Duration::from_secs(30) }
    }
}

/// Owns the shared services every worker needs and spawns/joins the pool.
pub struct Sender {
    queue: PriorityQueue,
    backend: Arc<dyn Backend>,
    registry: HandlerRegistry,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    http: reqwest::Client,
    config: SenderConfig,
}

impl Sender {
    pub fn new(
        queue: PriorityQueue,
        backend: Arc<dyn Backend>,
        registry: HandlerRegistry,
        circuit_breakers: Arc<CircuitBreakerRegistry>,
        http: reqwest::Client,
        config: SenderConfig,
    ) -> Self {
        Self { queue, backend, registry, circuit_breakers, http, config }
    }

    /// Spawns `worker_count` independent worker tasks, each looping until
    /// `shutdown` fires. Returns their join handles so the caller can await
    /// them during graceful shutdown.
    pub fn spawn(self, shutdown: tokio::sync::broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>> {
        let worker_count = self.config.worker_count;
        info!(worker_count, "starting sender worker pool");

        let queue = self.queue;
        let backend = self.backend;
        let registry = self.registry;
        let circuit_breakers = self.circuit_breakers;
        let http = self.http;
        let send_timeout = self.config.send_timeout;

        (0..worker_count)
            .map(|worker_id| {
                let queue = queue.clone();
                let backend = backend.clone();
                let registry = registry.clone();
                let circuit_breakers = circuit_breakers.clone();
                let http = http.clone();
                let mut shutdown_rx = shutdown.subscribe();

                tokio::spawn(async move {
                    run_worker(worker_id, queue, backend, registry, circuit_breakers, http, send_timeout, &mut shutdown_rx).await;
                })
            })
            .collect()
    }
}

async fn run_worker(
    worker_id: usize,
    queue: PriorityQueue,
    backend: Arc<dyn Backend>,
    registry: HandlerRegistry,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    http: reqwest::Client,
    send_timeout: Duration,
    shutdown: &mut tokio::sync::broadcast::Receiver<()>,
) {
    debug!(worker_id, "sender worker started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(worker_id, "sender worker received shutdown signal, exiting after current iteration");
                break;
            }
            dequeued = queue.dequeue() => {
                match dequeued {
                    Ok(Dequeued::Empty) => {
                        tokio::time::sleep(EMPTY_POLL_DELAY).await;
                    }
                    Ok(Dequeued::Retry) => {}
                    Ok(Dequeued::Item(token, item)) => {
                        process_one(&backend, &registry, &circuit_breakers, &http, send_timeout, item.id).await;
                        if let Err(e) = queue.mark_complete(&token).await {
                            error!(worker_id, error = %e, "failed to mark queue token complete");
                        }
                    }
                    Err(e) => {
                        warn!(worker_id, error = %e, "dequeue failed, backing off");
                        tokio::time::sleep(EMPTY_POLL_DELAY).await;
                    }
                }
            }
        }
    }
    debug!(worker_id, "sender worker exited");
}

/// One full send attempt for a hydrated message: resolve the adapter,
/// consult the circuit breaker, invoke `Send`, classify the outcome, and
/// persist the status update and channel log. Never retries internally —
/// that is the backend's job per the adapter contract.
async fn process_one(
    backend: &Arc<dyn Backend>,
    registry: &HandlerRegistry,
    circuit_breakers: &Arc<CircuitBreakerRegistry>,
    http: &reqwest::Client,
    send_timeout: Duration,
    msg_id: u64,
) {
    let msg = match backend.hydrate_msg(msg_id).await {
        Ok(msg) => msg,
        Err(e) => {
            error!(msg_id, error = %e, "failed to hydrate message, dropping from queue");
            return;
        }
    };

    let mut log = ChannelLog::new(msg.channel.uuid, ChannelLogType::MsgSend);

    let handler = match registry.lookup(&msg.channel.channel_type) {
        Ok(h) => h,
        Err(e) => {
            warn!(msg_id, channel_uuid = %msg.channel.uuid, error = %e, "no handler registered for channel type");
            log.record_error(e.to_string());
            log.close();
            finish(backend, &msg, None, None, &mut log).await;
            return;
        }
    };

    if !circuit_breakers.allow_request(msg.channel.uuid) {
        debug!(msg_id, channel_uuid = %msg.channel.uuid, "circuit breaker open, skipping send attempt");
        metrics::record_circuit_open_skip(&msg.channel.channel_type);
        log.record_error("circuit breaker open for this channel".to_string());
        log.close();
        let classification = classify_error(&courier_common::AdapterError::ConnectionFailed("circuit breaker open".into()));
        finish(backend, &msg, Some(classification.status), classification.error, &mut log).await;
        return;
    }

    let ctx = SendContext { http: http.clone(), send_timeout };
    let mut result = SendResult::new();

    let attempt_started = std::time::Instant::now();
    let classification = match handler.handler.send(&ctx, &msg, &mut result, &mut log).await {
        Ok(()) => {
            let classification = classify_success(&result);
            if classification.retryable {
                circuit_breakers.record_failure(msg.channel.uuid);
            } else {
                circuit_breakers.record_success(msg.channel.uuid);
            }
            classification
        }
        Err(e) => {
            let classification = classify_error(&e);
            log.record_error(e.to_string());
            if classification.retryable {
                circuit_breakers.record_failure(msg.channel.uuid);
            } else {
                circuit_breakers.record_success(msg.channel.uuid);
            }
            classification
        }
    };
    metrics::record_send_latency(&msg.channel.channel_type, attempt_started.elapsed());
    metrics::record_send_attempt(&msg.channel.channel_type, !classification.retryable, &format!("{:?}", classification.status));

    log.close();
    finish(backend, &msg, Some(classification.status), classification.error, &mut log).await;
}

async fn finish(
    backend: &Arc<dyn Backend>,
    msg: &courier_common::MsgOut,
    status: Option<courier_common::MsgStatus>,
    error: Option<courier_common::ErrorTaxonomyEntry>,
    log: &mut ChannelLog,
) {
    if let Some(status) = status {
        let update = StatusUpdate { channel_uuid: msg.channel.uuid, msg_ref: MsgRef::BackendId(msg.id), status, error };
        if let Err(e) = backend.write_status_update(update).await {
            error!(msg_id = msg.id, error = %e, "failed to write status update");
        }
    }
    if let Err(e) = backend.write_channel_log(log.clone()).await {
        error!(msg_id = msg.id, error = %e, "failed to write channel log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_adapter::{Handler, HandlerRegistryBuilder, HttpMethod, RegisteredHandler, RouteSpec};
    use courier_backend::InMemoryBackend;
    use courier_common::{AdapterError, ChannelLogType, MsgStatus, Urn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockHandler {
        calls: AtomicUsize,
        outcome: MockOutcome,
    }

    enum MockOutcome {
        Succeed,
        Fail(fn() -> AdapterError),
    }

    impl MockHandler {
        fn succeeding() -> Self {
            Self { calls: AtomicUsize::new(0), outcome: MockOutcome::Succeed }
        }

        fn failing(err: fn() -> AdapterError) -> Self {
            Self { calls: AtomicUsize::new(0), outcome: MockOutcome::Fail(err) }
        }
    }

    #[async_trait]
    impl Handler for MockHandler {
        fn channel_type(&self) -> &'static str {
            "MK"
        }

        fn name(&self) -> &'static str {
            "Mock"
        }

        fn routes(&self) -> Vec<RouteSpec> {
            vec![RouteSpec { method: HttpMethod::Post, sub_path: "receive", log_type: ChannelLogType::MsgReceive }]
        }

        async fn send(
            &self,
            _ctx: &SendContext,
            _msg: &courier_common::MsgOut,
            result: &mut SendResult,
            _log: &mut ChannelLog,
        ) -> Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                MockOutcome::Succeed => {
                    result.push_external_id("ext-1");
                    Ok(())
                }
                MockOutcome::Fail(make_err) => Err(make_err()),
            }
        }
    }

    fn sample_msg(backend: &InMemoryBackend) -> u64 {
        let channel = courier_common::Channel::new("MK", "1234", "RW");
        backend.create_msg(courier_common::MsgOut {
            id: 0,
            channel,
            urn: Urn::tel("+250788383383"),
            text: "hi".into(),
            attachments: vec![],
            quick_replies: vec![],
            locale: None,
            template: None,
            created_at: chrono::Utc::now(),
        })
    }

    #[tokio::test]
    async fn successful_send_writes_wired_status() {
        let backend_impl = Arc::new(InMemoryBackend::default());
        let msg_id = sample_msg(&backend_impl);
        let backend: Arc<dyn Backend> = backend_impl.clone();
        let handler = Arc::new(MockHandler::succeeding());
        let registry = HandlerRegistryBuilder::new().register(RegisteredHandler::new(handler.clone())).unwrap().build();
        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let http = reqwest::Client::new();

        process_one(&backend, &registry, &breakers, &http, Duration::from_secs(5), msg_id).await;

        assert_eq!(backend_impl.status_of(msg_id), Some(MsgStatus::Wired));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_writes_failed_status() {
        let backend_impl = Arc::new(InMemoryBackend::default());
        let msg_id = sample_msg(&backend_impl);
        let backend: Arc<dyn Backend> = backend_impl.clone();
        let registry = HandlerRegistryBuilder::new()
            .register(RegisteredHandler::new(Arc::new(MockHandler::failing(|| {
                AdapterError::ResponseContent("provider rejected".into())
            }))))
            .unwrap()
            .build();
        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let http = reqwest::Client::new();

        process_one(&backend, &registry, &breakers, &http, Duration::from_secs(5), msg_id).await;

        assert_eq!(backend_impl.status_of(msg_id), Some(MsgStatus::Failed));
    }

    #[tokio::test]
    async fn unknown_channel_type_is_handled_without_panicking() {
        let backend_impl = Arc::new(InMemoryBackend::default());
        let msg_id = sample_msg(&backend_impl);
        let backend: Arc<dyn Backend> = backend_impl.clone();
        let registry = HandlerRegistryBuilder::new().build();
        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let http = reqwest::Client::new();

        process_one(&backend, &registry, &breakers, &http, Duration::from_secs(5), msg_id).await;

        // No handler means no status write; the message stays at its
        // initial pre-send state rather than panicking the worker.
        assert_eq!(backend_impl.status_of(msg_id), Some(MsgStatus::Errored));
    }
}
