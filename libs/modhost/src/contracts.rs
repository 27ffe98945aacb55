use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::Router;

use crate::context::ModuleCtx;

/// Capability set every module implements.
///
/// Only [`initialize`](Module::initialize) and
/// [`perform_health_check`](Module::perform_health_check) are required.
/// The remaining hooks default to no-ops and exist for domain behavior only:
/// status flags, timestamps, uptime and counter resets are handled by the
/// lifecycle skeleton around each call, so an override cannot leave
/// [`ModuleStatus`](crate::ModuleStatus) inconsistent.
///
/// Call order for one module, driven by the registry:
/// `initialize` → `register_services` → `register_routes` → `activate` →
/// … → `deactivate` → `cleanup`.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// One-time setup. Declared dependencies are already initialized and
    /// have published their services.
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    /// Publish this module's APIs into the service hub. Runs right after a
    /// successful `initialize()`.
    fn register_services(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Attach domain HTTP handlers. Paths are relative to the module's route
    /// prefix. Called once, after `initialize()` and before `activate()`.
    fn register_routes(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        Ok(router)
    }

    /// Start active behavior such as background tasks. Dependencies are
    /// already active.
    async fn activate(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stop active behavior; must cancel anything started in `activate()`.
    /// Errors are logged and never prevent `cleanup()`.
    async fn deactivate(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources. The module counts as torn down afterwards even if
    /// this fails.
    async fn cleanup(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Module-specific self-check. A failure marks the module's own service
    /// check as failed and degrades its health.
    async fn perform_health_check(&self) -> anyhow::Result<()>;

    /// Feature flags this module understands. Any other name in the
    /// descriptor is rejected at registration.
    fn supported_features(&self) -> &[&'static str] {
        &[]
    }

    /// Extra values merged into `customMetrics`.
    fn custom_metrics(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }
}
