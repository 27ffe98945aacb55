use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use modhost::{Module, ModuleCtx};
use parking_lot::RwLock;
use serde::Serialize;

pub const MODULE_NAME: &str = "clock";

/// Time source published in the service hub.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn started_at(&self) -> DateTime<Utc>;
}

struct SystemClock {
    started_at: DateTime<Utc>,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NowDto {
    now: DateTime<Utc>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ClockModule {
    clock: RwLock<Option<Arc<SystemClock>>>,
}

impl ClockModule {
    fn clock(&self) -> anyhow::Result<Arc<SystemClock>> {
        self.clock
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("clock is not initialized"))
    }
}

#[async_trait]
impl Module for ClockModule {
    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        *self.clock.write() = Some(Arc::new(SystemClock {
            started_at: Utc::now(),
        }));
        Ok(())
    }

    fn register_services(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let clock: Arc<dyn Clock> = self.clock()?;
        ctx.services().publish::<dyn Clock>(clock);
        Ok(())
    }

    fn register_routes(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        let clock = self.clock()?;
        Ok(router.route(
            "/now",
            get(move || {
                let clock = Arc::clone(&clock);
                async move {
                    Json(NowDto {
                        now: clock.now(),
                        started_at: clock.started_at(),
                    })
                }
            }),
        ))
    }

    async fn cleanup(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        ctx.services().withdraw::<dyn Clock>();
        self.clock.write().take();
        Ok(())
    }

    async fn perform_health_check(&self) -> anyhow::Result<()> {
        self.clock().map(|_| ())
    }
}
