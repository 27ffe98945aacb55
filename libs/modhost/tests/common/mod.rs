#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use modhost::{LifecycleConfig, Module, ModuleCtx, ModuleDescriptor, ModuleRegistry, async_trait};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared journal of `"<module>.<hook>"` entries across scripted modules.
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(events: &Events) -> Vec<String> {
    events.lock().clone()
}

/// Entries for one hook, with the hook suffix stripped.
pub fn calls(events: &Events, hook: &str) -> Vec<String> {
    let suffix = format!(".{hook}");
    events
        .lock()
        .iter()
        .filter_map(|e| e.strip_suffix(&suffix).map(str::to_owned))
        .collect()
}

/// Configurable test module that journals every hook it sees.
pub struct Scripted {
    name: String,
    events: Events,
    fail_on: Option<&'static str>,
    hang_on: Option<&'static str>,
    healthy: AtomicBool,
    routes: bool,
}

impl Scripted {
    pub fn new(name: &str, events: &Events) -> Self {
        Self {
            name: name.to_owned(),
            events: Arc::clone(events),
            fail_on: None,
            hang_on: None,
            healthy: AtomicBool::new(true),
            routes: false,
        }
    }

    #[must_use]
    pub fn failing_on(mut self, hook: &'static str) -> Self {
        self.fail_on = Some(hook);
        self
    }

    /// Block in `hook` until the call's token is cancelled.
    #[must_use]
    pub fn hanging_on(mut self, hook: &'static str) -> Self {
        self.hang_on = Some(hook);
        self
    }

    #[must_use]
    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    /// Serve `GET /ok` and `GET /boom` (500) under the module prefix.
    #[must_use]
    pub fn with_routes(mut self) -> Self {
        self.routes = true;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    async fn hook(&self, hook: &'static str, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.events.lock().push(format!("{}.{hook}", self.name));
        if self.hang_on == Some(hook) {
            ctx.cancellation_token().cancelled().await;
        }
        if self.fail_on == Some(hook) {
            anyhow::bail!("{} refused to {hook}", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl Module for Scripted {
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.hook("initialize", ctx).await
    }

    fn register_routes(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        if !self.routes {
            return Ok(router);
        }
        Ok(router
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/boom",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            ))
    }

    async fn activate(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.hook("activate", ctx).await
    }

    async fn deactivate(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.hook("deactivate", ctx).await
    }

    async fn cleanup(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.hook("cleanup", ctx).await
    }

    async fn perform_health_check(&self) -> anyhow::Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("{} self-check failed", self.name)
        }
    }

    fn supported_features(&self) -> &[&'static str] {
        &["fast_path"]
    }

    fn custom_metrics(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("scripted".to_owned(), serde_json::json!(true))])
    }
}

pub fn descriptor(name: &str, deps: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor::builder(name, "1.0.0")
        .description(format!("{name} test module"))
        .dependencies(deps.iter().copied())
        .build()
        .unwrap()
}

pub fn disabled(name: &str, deps: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor::builder(name, "1.0.0")
        .dependencies(deps.iter().copied())
        .enabled(false)
        .build()
        .unwrap()
}

pub fn registry() -> ModuleRegistry {
    ModuleRegistry::default()
}

pub fn registry_with_timeouts(ms: u64) -> ModuleRegistry {
    ModuleRegistry::new(
        Arc::new(modhost::config::EmptyConfigProvider),
        LifecycleConfig {
            initialize_timeout_ms: ms,
            activate_timeout_ms: ms,
            shutdown_timeout_ms: ms,
        },
        CancellationToken::new(),
    )
}

/// Register a plain scripted module.
pub fn add(reg: &ModuleRegistry, events: &Events, name: &str, deps: &[&str]) {
    reg.register(descriptor(name, deps), Arc::new(Scripted::new(name, events)))
        .unwrap();
}
