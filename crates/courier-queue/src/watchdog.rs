//! The 60s watchdog: self-heals `T:active` accounting drift left behind by
//! a worker that crashed mid-`Send` without reaching `MarkComplete`. Runs
//! alongside the 1Hz dethrottler but on its own, coarser cadence, each as
//! an independent background task spawned off its own interval loop.

use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{info, warn};

use crate::keys::QueueKey;
use crate::scripts;
use crate::{QueueError, Result};

/// Scans `T:active` for entries with no recorded `Pop` within
/// `max_idle_secs` and clamps their score to zero.
pub struct Watchdog {
    conn: ConnectionManager,
    queue_type: String,
    max_idle_secs: i64,
}

impl Watchdog {
    pub fn new(conn: ConnectionManager, queue_type: impl Into<String>, max_idle_secs: i64) -> Self {
        Self { conn, queue_type: queue_type.into(), max_idle_secs }
    }

    /// Run one sweep, returning the number of channels healed.
    pub async fn sweep(&self) -> Result<u64> {
        let key = QueueKey::new(&self.queue_type, uuid::Uuid::nil(), 0);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs() as i64;

        let mut conn = self.conn.clone();
        let healed: i64 = scripts::watchdog_script()
            .key(key.active_key())
            .arg(now)
            .arg(self.max_idle_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        if healed > 0 {
            warn!(healed, queue_type = %self.queue_type, "watchdog healed stale active-set accounting");
        }
        Ok(healed as u64)
    }

    /// Spawn the 60s watchdog loop. Runs until `shutdown` fires.
    pub fn spawn(self, interval: Duration, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "watchdog sweep failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!(queue_type = %self.queue_type, "watchdog shutting down");
                        break;
                    }
                }
            }
        })
    }
}
