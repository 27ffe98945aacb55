//! Periodic beat driven by the shared clock.
//!
//! The ticker task lives from `activate()` to `deactivate()`. Health fails
//! once beats stop arriving for three intervals.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use modhost::{Module, ModuleCtx};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;

pub const MODULE_NAME: &str = "heartbeat";
pub const FEATURE_LOG_BEATS: &str = "log_beats";

const STALL_FACTOR: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl HeartbeatConfig {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Default)]
struct Beats {
    count: AtomicU64,
    last: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BeatsDto {
    count: u64,
    last_beat: Option<DateTime<Utc>>,
}

#[allow(clippy::unused_async)]
async fn list_beats(State(beats): State<Arc<Beats>>) -> Json<BeatsDto> {
    Json(BeatsDto {
        count: beats.count.load(Ordering::Relaxed),
        last_beat: *beats.last.read(),
    })
}

struct Ticker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct HeartbeatModule {
    beats: Arc<Beats>,
    config: RwLock<HeartbeatConfig>,
    clock: RwLock<Option<Arc<dyn Clock>>>,
    ticker: Mutex<Option<Ticker>>,
}

impl HeartbeatModule {
    fn clock(&self) -> anyhow::Result<Arc<dyn Clock>> {
        self.clock
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("heartbeat is not initialized"))
    }
}

#[async_trait]
impl Module for HeartbeatModule {
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: HeartbeatConfig = ctx.config()?;
        if cfg.interval_ms == 0 {
            anyhow::bail!("interval_ms must be greater than zero");
        }
        let clock = ctx.services().resolve::<dyn Clock>()?;

        tracing::info!(interval_ms = cfg.interval_ms, "Heartbeat configured");
        *self.config.write() = cfg;
        *self.clock.write() = Some(clock);
        Ok(())
    }

    fn register_routes(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        Ok(router.merge(
            Router::new()
                .route("/beats", get(list_beats))
                .with_state(Arc::clone(&self.beats)),
        ))
    }

    async fn activate(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let clock = self.clock()?;
        let interval = self.config.read().interval();
        let log_beats = ctx.feature_enabled(FEATURE_LOG_BEATS);
        let token = ctx.cancellation_token().child_token();
        let beats = Arc::clone(&self.beats);

        let task = tokio::spawn({
            let token = token.clone();
            async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        _ = tick.tick() => {
                            let n = beats.count.fetch_add(1, Ordering::Relaxed) + 1;
                            *beats.last.write() = Some(clock.now());
                            if log_beats {
                                tracing::info!(beat = n, "Heartbeat");
                            }
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.ticker.lock().replace(Ticker { token, task }) {
            previous.token.cancel();
        }
        Ok(())
    }

    async fn deactivate(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        let ticker = self.ticker.lock().take();
        if let Some(Ticker { token, task }) = ticker {
            token.cancel();
            task.await?;
        }
        Ok(())
    }

    async fn cleanup(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.clock.write().take();
        Ok(())
    }

    async fn perform_health_check(&self) -> anyhow::Result<()> {
        let running = self.ticker.lock().is_some();
        if !running {
            return Ok(());
        }
        let Some(last) = *self.beats.last.read() else {
            return Ok(());
        };
        let stall = self.config.read().interval() * STALL_FACTOR;
        let age = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
        if age > stall {
            anyhow::bail!("no beat for {age:?}, expected one every {:?}", stall / STALL_FACTOR);
        }
        Ok(())
    }

    fn supported_features(&self) -> &[&'static str] {
        &[FEATURE_LOG_BEATS]
    }

    fn custom_metrics(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            (
                "beats".to_owned(),
                serde_json::json!(self.beats.count.load(Ordering::Relaxed)),
            ),
            (
                "intervalMs".to_owned(),
                serde_json::json!(self.config.read().interval_ms),
            ),
        ])
    }
}
