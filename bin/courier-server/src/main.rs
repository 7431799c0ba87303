//! Courier Server
//!
//! Boots the priority queue dethrottler, the filesystem spool sweeper, the
//! Sender worker pool, and the webhook HTTP surface against a single
//! `Backend` implementation. Set `COURIER_DEV_MODE=true` to run against the
//! built-in in-memory backend instead of a real integration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use courier_adapter::{CircuitBreakerRegistry, HandlerRegistryBuilder, RegisteredHandler};
use courier_adapters::{ArabiacellHandler, MessagebirdHandler, MtHandler};
use courier_backend::{Backend, InMemoryBackend};
use courier_config::AppConfig;
use courier_dispatch::{Sender, SenderConfig};
use courier_queue::{spawn_dethrottler, PriorityQueue, Watchdog};
use courier_spool::{Flusher, RecordKind, Spool, SpoolFlushers};
use courier_webhook::pipeline::IncomingPipeline;
use courier_webhook::{build_router, AppState};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod monitoring;
use monitoring::MonitoringState;

const QUEUE_TYPE: &str = "sms";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    courier_common::logging::init_logging("courier-server");

    info!("starting courier-server");

    let config = AppConfig::load().context("failed to load configuration")?;

    let backend: Arc<dyn Backend> = if config.dev_mode {
        info!("dev mode enabled: using in-memory backend");
        Arc::new(InMemoryBackend::new(Duration::from_secs(config.webhook.dedup_ttl_secs)))
    } else {
        anyhow::bail!("no production Backend implementation configured; set dev_mode = true or wire one in");
    };

    let prometheus_handle = Arc::new(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder().context("failed to install prometheus recorder")?);

    let redis_conn = courier_redis::connect(&config.redis.url).await.context("failed to connect to redis")?;

    let queue = PriorityQueue::new(redis_conn.clone(), QUEUE_TYPE, config.queue.rate_counter_ttl_secs);

    let spool = Spool::new(spool_dir(&config), config.spool.file_mode);
    let flusher: Arc<dyn Flusher> = Arc::new(BackendFlusher { backend: backend.clone() });
    let flushers = SpoolFlushers { msgs: flusher.clone(), statuses: flusher.clone(), events: flusher };

    let registry = HandlerRegistryBuilder::new()
        .register(RegisteredHandler::new(Arc::new(ArabiacellHandler::new())))
        .context("failed to register arabiacell handler")?
        .register(RegisteredHandler::new(Arc::new(MessagebirdHandler::new())))
        .context("failed to register messagebird handler")?
        .register(RegisteredHandler::new(Arc::new(MtHandler::new())))
        .context("failed to register mt handler")?
        .build();
    info!(channel_types = ?registry.channel_types(), "handler registry built");

    let circuit_breakers = Arc::new(CircuitBreakerRegistry::new(
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.success_threshold,
        Duration::from_secs(config.circuit_breaker.reset_timeout_secs),
    ));

    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(config.dispatch.send_timeout_secs)).build()?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let dethrottler = spawn_dethrottler(queue.clone(), Duration::from_millis(config.queue.dethrottle_interval_ms), shutdown_tx.subscribe());

    let watchdog = Watchdog::new(redis_conn.clone(), QUEUE_TYPE, config.queue.watchdog_interval_secs as i64 * 10)
        .spawn(Duration::from_secs(config.queue.watchdog_interval_secs), shutdown_tx.subscribe());

    let sweeper = spool.clone().spawn_sweeper(flushers, Duration::from_secs(config.spool.sweep_interval_secs), shutdown_tx.subscribe());

    let sender = Sender::new(
        queue.clone(),
        backend.clone(),
        registry.clone(),
        circuit_breakers,
        http_client,
        SenderConfig { worker_count: config.dispatch.default_concurrency as usize, send_timeout: Duration::from_secs(config.dispatch.send_timeout_secs) },
    );
    let sender_handles = sender.spawn(shutdown_tx.clone());

    let pipeline = IncomingPipeline::new(backend.clone(), spool.clone(), redis_conn);
    let webhook_state = AppState { backend: backend.clone(), registry, pipeline };

    let monitoring_state = MonitoringState { redis: queue.connection(), queue_type: QUEUE_TYPE, prometheus_handle };

    let app: Router = build_router(webhook_state)
        .route("/healthz", axum::routing::get(healthz))
        .merge(monitoring::router(monitoring_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "webhook server listening");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "http server exited with error");
        }
    });

    info!("courier-server started, press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received, draining workers");

    let _ = shutdown_tx.send(());
    server_task.abort();

    for handle in sender_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "sender worker task did not join cleanly");
        }
    }
    let _ = dethrottler.await;
    let _ = watchdog.await;
    let _ = sweeper.await;

    info!("courier-server shutdown complete");
    Ok(())
}

async fn healthz() -> axum::Json<monitoring::SimpleHealthResponse> {
    axum::Json(monitoring::SimpleHealthResponse { status: "UP".into(), version: env!("CARGO_PKG_VERSION").to_string() })
}

fn spool_dir(config: &AppConfig) -> String {
    let dir = std::path::Path::new(&config.spool.dir);
    if dir.is_absolute() {
        dir.to_string_lossy().into_owned()
    } else {
        std::path::Path::new(&config.data_dir).join(dir).to_string_lossy().into_owned()
    }
}

/// Bridges the spool's kind-tagged flush callback to the three typed
/// `Backend` write methods, so a record that failed to write once gets
/// retried through the exact same path on the next sweep.
struct BackendFlusher {
    backend: Arc<dyn Backend>,
}

#[async_trait::async_trait]
impl Flusher for BackendFlusher {
    async fn flush(&self, kind: RecordKind, payload: &[u8]) -> Result<(), String> {
        match kind {
            RecordKind::Msgs => {
                let msg: courier_common::MsgIn = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
                self.backend.write_msg_in(msg).await.map_err(|e| e.to_string())
            }
            RecordKind::Statuses => {
                let update: courier_common::StatusUpdate = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
                self.backend.write_status_update(update).await.map_err(|e| e.to_string())
            }
            RecordKind::Events => {
                let event: courier_common::ChannelEvent = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
                self.backend.write_channel_event(event).await.map_err(|e| e.to_string())
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install signal handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
