//! Lifecycle skeleton wrapped around every registered module.
//!
//! [`ModuleHandle`] pairs a module with its descriptor and owns the
//! bookkeeping the contract promises: the lifecycle state machine, the
//! [`ModuleStatus`] flags, activation uptime, request counters, per-call
//! timeouts, and the recursive health aggregation over dependencies.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;

use crate::contracts::Module;
use crate::context::ModuleCtx;
use crate::descriptor::ModuleDescriptor;
use crate::health::{CachedStatus, HealthCache, HealthStatus, MODULE_SERVICE, ModuleHealth};
use crate::metrics::{ModuleMetrics, RequestCounters, process_memory_bytes};

/// Per-module lifecycle state.
///
/// Forward path: `Registered → Initializing → Initialized → Activating →
/// Active → Deactivating → Deactivated → CleanedUp`. A hook that fails or
/// times out during startup leaves the module in `Failed`. Teardown may
/// begin from `Initialized`, `Active` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Registered,
    Initializing,
    Initialized,
    Activating,
    Active,
    Deactivating,
    Deactivated,
    CleanedUp,
    Failed,
}

impl LifecycleState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState as S;
        matches!(
            (self, next),
            (S::Registered, S::Initializing)
                | (S::Initializing | S::Activating, S::Failed)
                | (S::Initializing, S::Initialized)
                | (S::Initialized, S::Activating)
                | (S::Activating, S::Active)
                | (S::Initialized | S::Active | S::Failed, S::Deactivating)
                | (S::Deactivating, S::Deactivated)
                | (S::Deactivated, S::CleanedUp)
        )
    }

    /// Whether `stop()` has anything to tear down.
    #[must_use]
    pub fn needs_teardown(self) -> bool {
        matches!(self, Self::Initialized | Self::Active | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registered => "registered",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
            Self::Deactivated => "deactivated",
            Self::CleanedUp => "cleaned_up",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a module's lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub enabled: bool,
    pub active: bool,
    pub initialized: bool,
    pub state: LifecycleState,
    pub dependencies: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// Which hook a [`HookError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Initialize,
    RegisterServices,
    RegisterRoutes,
    Activate,
    Deactivate,
    Cleanup,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialize => "initialize",
            Self::RegisterServices => "register_services",
            Self::RegisterRoutes => "register_routes",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{hook} failed")]
    Failed {
        hook: Hook,
        #[source]
        source: anyhow::Error,
    },

    #[error("{hook} timed out after {timeout:?}")]
    TimedOut { hook: Hook, timeout: Duration },

    #[error("cannot {hook} while {state}")]
    InvalidState { hook: Hook, state: LifecycleState },
}

/// Resolves registered modules by name; used by the health walk.
pub trait ModuleLookup: Send + Sync {
    fn find_module(&self, name: &str) -> Option<Arc<ModuleHandle>>;
}

#[derive(Debug)]
struct Tracker {
    state: LifecycleState,
    initialized: bool,
    active: bool,
    activated_at: Option<Instant>,
    last_updated: DateTime<Utc>,
}

impl Tracker {
    fn stamp(&mut self) {
        let now = Utc::now();
        if now > self.last_updated {
            self.last_updated = now;
        }
    }
}

/// A registered module plus its lifecycle bookkeeping.
pub struct ModuleHandle {
    descriptor: Arc<ModuleDescriptor>,
    module: Arc<dyn Module>,
    counters: Arc<RequestCounters>,
    tracker: RwLock<Tracker>,
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.descriptor.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ModuleHandle {
    #[must_use]
    pub fn new(descriptor: ModuleDescriptor, module: Arc<dyn Module>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            module,
            counters: Arc::new(RequestCounters::new()),
            tracker: RwLock::new(Tracker {
                state: LifecycleState::Registered,
                initialized: false,
                active: false,
                activated_at: None,
                last_updated: Utc::now(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    #[must_use]
    pub fn counters(&self) -> &Arc<RequestCounters> {
        &self.counters
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.tracker.read().state
    }

    /// Current status flags. Pure read; repeated calls without a lifecycle
    /// transition in between return equal values.
    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        let t = self.tracker.read();
        ModuleStatus {
            enabled: self.descriptor.is_enabled(),
            active: t.active,
            initialized: t.initialized,
            state: t.state,
            dependencies: self.descriptor.dependencies().to_vec(),
            last_updated: t.last_updated,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> ModuleMetrics {
        let uptime = {
            let t = self.tracker.read();
            match t.activated_at {
                Some(at) if t.active => at.elapsed(),
                _ => Duration::ZERO,
            }
        };
        ModuleMetrics {
            name: self.name().to_owned(),
            uptime,
            request_count: self.counters.requests(),
            error_count: self.counters.errors(),
            response_time: self.counters.mean_response_ms(),
            memory_usage: process_memory_bytes(),
            custom_metrics: self.module.custom_metrics(),
        }
    }

    fn transition(&self, hook: Hook, next: LifecycleState) -> Result<(), HookError> {
        let mut t = self.tracker.write();
        if !t.state.can_transition_to(next) {
            return Err(HookError::InvalidState {
                hook,
                state: t.state,
            });
        }
        tracing::trace!(module = self.name(), from = %t.state, to = %next, "Lifecycle transition");
        t.state = next;
        t.stamp();
        Ok(())
    }

    fn settle(&self, next: LifecycleState, apply: impl FnOnce(&mut Tracker)) {
        let mut t = self.tracker.write();
        t.state = next;
        apply(&mut t);
        t.stamp();
    }

    /// Run one hook under `timeout`; on expiry the call's token is cancelled.
    async fn bounded<F>(
        hook: Hook,
        ctx: &ModuleCtx,
        timeout: Duration,
        fut: F,
    ) -> Result<(), HookError>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(|source| HookError::Failed { hook, source }),
            Err(_) => {
                ctx.cancellation_token().cancel();
                Err(HookError::TimedOut { hook, timeout })
            }
        }
    }

    /// `initialize()` followed by `register_services()`.
    pub(crate) async fn initialize(
        &self,
        ctx: &ModuleCtx,
        timeout: Duration,
    ) -> Result<(), HookError> {
        self.transition(Hook::Initialize, LifecycleState::Initializing)?;

        let result = Self::bounded(Hook::Initialize, ctx, timeout, self.module.initialize(ctx))
            .await
            .and_then(|()| {
                self.module
                    .register_services(ctx)
                    .map_err(|source| HookError::Failed {
                        hook: Hook::RegisterServices,
                        source,
                    })
            });

        match result {
            Ok(()) => {
                self.settle(LifecycleState::Initialized, |t| t.initialized = true);
                Ok(())
            }
            Err(e) => {
                self.settle(LifecycleState::Failed, |_| {});
                Err(e)
            }
        }
    }

    /// Domain routes from the module, wrapped with request counting.
    pub(crate) fn register_routes(&self, ctx: &ModuleCtx) -> Result<Router, HookError> {
        let state = self.state();
        if state != LifecycleState::Initialized {
            return Err(HookError::InvalidState {
                hook: Hook::RegisterRoutes,
                state,
            });
        }
        let router = self
            .module
            .register_routes(ctx, Router::new())
            .map_err(|source| HookError::Failed {
                hook: Hook::RegisterRoutes,
                source,
            })?;
        Ok(crate::api::with_request_tracking(
            router,
            Arc::clone(&self.counters),
        ))
    }

    pub(crate) async fn activate(
        &self,
        ctx: &ModuleCtx,
        timeout: Duration,
    ) -> Result<(), HookError> {
        self.transition(Hook::Activate, LifecycleState::Activating)?;
        self.counters.reset();

        match Self::bounded(Hook::Activate, ctx, timeout, self.module.activate(ctx)).await {
            Ok(()) => {
                self.settle(LifecycleState::Active, |t| {
                    t.active = true;
                    t.activated_at = Some(Instant::now());
                });
                Ok(())
            }
            Err(e) => {
                self.settle(LifecycleState::Failed, |_| {});
                Err(e)
            }
        }
    }

    /// The module is inactive afterwards whatever the hook returns.
    pub(crate) async fn deactivate(
        &self,
        ctx: &ModuleCtx,
        timeout: Duration,
    ) -> Result<(), HookError> {
        self.transition(Hook::Deactivate, LifecycleState::Deactivating)?;
        let result =
            Self::bounded(Hook::Deactivate, ctx, timeout, self.module.deactivate(ctx)).await;
        self.settle(LifecycleState::Deactivated, |t| {
            t.active = false;
            t.activated_at = None;
        });
        result
    }

    /// The module is torn down afterwards whatever the hook returns.
    pub(crate) async fn cleanup(
        &self,
        ctx: &ModuleCtx,
        timeout: Duration,
    ) -> Result<(), HookError> {
        let state = self.state();
        if state != LifecycleState::Deactivated {
            return Err(HookError::InvalidState {
                hook: Hook::Cleanup,
                state,
            });
        }
        let result = Self::bounded(Hook::Cleanup, ctx, timeout, self.module.cleanup(ctx)).await;
        self.settle(LifecycleState::CleanedUp, |t| {
            t.initialized = false;
            t.active = false;
        });
        result
    }

    /// Health of this module and, recursively, of its dependencies.
    pub async fn health(&self, lookup: &dyn ModuleLookup) -> ModuleHealth {
        let mut cache = HealthCache::new();
        self.health_check(lookup, &mut cache).await
    }

    /// Health walk sharing `cache` with other checks in the same query.
    ///
    /// Own check goes under `services["module"]`. Each dependency maps to
    /// `true` unless it is missing, unhealthy, or lies on a dependency cycle.
    pub fn health_check<'a>(
        &'a self,
        lookup: &'a dyn ModuleLookup,
        cache: &'a mut HealthCache,
    ) -> BoxFuture<'a, ModuleHealth> {
        Box::pin(async move {
            cache.enter(self.name());
            let mut health = ModuleHealth::new();

            match self.module.perform_health_check().await {
                Ok(()) => health.record_service(MODULE_SERVICE, true),
                Err(err) => {
                    health.record_service(MODULE_SERVICE, false);
                    health.push_error(format!("health check failed: {err:#}"));
                }
            }

            for dep in self.descriptor.dependencies() {
                let dep_status = match cache.lookup(dep) {
                    CachedStatus::Done(status) => Some(status),
                    CachedStatus::InProgress => {
                        cache.close_cycle(dep);
                        None
                    }
                    CachedStatus::Unvisited => match lookup.find_module(dep) {
                        Some(handle) => Some(handle.health_check(lookup, cache).await.status),
                        None => {
                            health.push_error(format!("dependency not found: {dep}"));
                            None
                        }
                    },
                };

                let ok = if cache.on_cycle(self.name(), dep) {
                    health.push_error(format!("dependency cycle through: {dep}"));
                    false
                } else {
                    match dep_status {
                        Some(HealthStatus::Unhealthy) => {
                            health.push_error(format!("dependency unhealthy: {dep}"));
                            false
                        }
                        Some(_) => true,
                        None => false,
                    }
                };
                health.record_dependency(dep.clone(), ok);
            }

            let health = health.finish();
            cache.complete(self.name(), health.status);
            health
        })
    }
}
