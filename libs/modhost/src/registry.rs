//! Module registry: registration, ordered startup and reverse-order shutdown.
//!
//! `start()` runs three phases over the enabled modules in load order:
//! - **initialize**: `initialize()` then `register_services()` per module
//! - **routes**: domain routes plus the standard `/health`, `/info`, `/metrics`
//! - **activate**: `activate()` per module
//!
//! The first failure aborts startup; the host is expected to call `stop()`
//! to tear down whatever already came up.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigProvider, EmptyConfigProvider, HostConfig, LifecycleConfig};
use crate::context::ModuleContextBuilder;
use crate::contracts::Module;
use crate::descriptor::ModuleDescriptor;
use crate::health::{HealthCache, HealthStatus, ModuleHealth, SystemHealth};
use crate::lifecycle::{Hook, HookError, LifecycleState, ModuleHandle, ModuleLookup};
use crate::resolver::{ResolveError, resolve_load_order};
use crate::services::ServiceHub;

/// Prefix owned by the host's own endpoints.
pub const SYSTEM_ROUTE_PREFIX: &str = "/system";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("module '{module}' declares unsupported feature '{feature}'")]
    UnknownFeature { module: String, feature: String },

    #[error("module '{module}' route prefix '{prefix}' is already taken by '{owner}'")]
    RoutePrefixConflict {
        module: String,
        prefix: String,
        owner: String,
    },

    #[error("registry already started")]
    AlreadyStarted,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("enabled module '{module}' depends on disabled module '{dependency}'")]
    DisabledDependency { module: String, dependency: String },

    #[error(
        "failed to initialize module '{module}' (step {position} of {total}, requires: {})",
        display_requires(.requires)
    )]
    Initialize {
        module: String,
        position: usize,
        total: usize,
        requires: Vec<String>,
        #[source]
        source: HookError,
    },

    #[error("failed to register routes for module '{module}'")]
    Routes {
        module: String,
        #[source]
        source: HookError,
    },

    #[error(
        "failed to activate module '{module}' (step {position} of {total}, requires: {})",
        display_requires(.requires)
    )]
    Activate {
        module: String,
        position: usize,
        total: usize,
        requires: Vec<String>,
        #[source]
        source: HookError,
    },
}

fn display_requires(requires: &[String]) -> String {
    if requires.is_empty() {
        "none".to_owned()
    } else {
        requires.join(", ")
    }
}

/// Counts and load order served at `/system/overview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemOverview {
    pub total_modules: usize,
    pub enabled_modules: usize,
    pub active_modules: usize,
    pub load_order: Vec<String>,
}

/// Registered handles in registration order, shared with the HTTP handlers.
#[derive(Default)]
pub(crate) struct ModuleTable {
    modules: RwLock<Vec<Arc<ModuleHandle>>>,
    load_order: RwLock<Vec<String>>,
}

impl ModuleTable {
    pub(crate) fn snapshot(&self) -> Vec<Arc<ModuleHandle>> {
        self.modules.read().clone()
    }

    fn insert(&self, handle: ModuleHandle) -> Result<(), RegistryError> {
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.name() == handle.name()) {
            return Err(RegistryError::DuplicateModule(handle.name().to_owned()));
        }

        let prefix = handle.descriptor().effective_route_prefix();
        if prefix == SYSTEM_ROUTE_PREFIX {
            return Err(RegistryError::RoutePrefixConflict {
                module: handle.name().to_owned(),
                prefix,
                owner: "host".to_owned(),
            });
        }
        if let Some(owner) = modules
            .iter()
            .find(|m| m.descriptor().effective_route_prefix() == prefix)
        {
            return Err(RegistryError::RoutePrefixConflict {
                module: handle.name().to_owned(),
                prefix,
                owner: owner.name().to_owned(),
            });
        }

        modules.push(Arc::new(handle));
        Ok(())
    }

    fn load_order(&self) -> Vec<String> {
        self.load_order.read().clone()
    }

    fn set_load_order(&self, order: Vec<String>) {
        *self.load_order.write() = order;
    }

    pub(crate) fn overview(&self) -> SystemOverview {
        let modules = self.modules.read();
        SystemOverview {
            total_modules: modules.len(),
            enabled_modules: modules
                .iter()
                .filter(|m| m.descriptor().is_enabled())
                .count(),
            active_modules: modules.iter().filter(|m| m.status().active).count(),
            load_order: self.load_order(),
        }
    }

    /// One health query over every enabled module, sharing a single memo.
    pub(crate) async fn system_health(&self) -> SystemHealth {
        let mut cache = HealthCache::new();
        let mut modules = BTreeMap::new();
        for handle in self.snapshot() {
            if !handle.descriptor().is_enabled() {
                continue;
            }
            let status = match cache.status_of(handle.name()) {
                Some(status) => status,
                None => handle.health_check(self, &mut cache).await.status,
            };
            modules.insert(handle.name().to_owned(), status);
        }
        SystemHealth {
            status: HealthStatus::combine(modules.values().copied()),
            modules,
        }
    }
}

impl ModuleLookup for ModuleTable {
    fn find_module(&self, name: &str) -> Option<Arc<ModuleHandle>> {
        self.modules
            .read()
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }
}

/// Owns every registered module and drives their lifecycle.
pub struct ModuleRegistry {
    table: Arc<ModuleTable>,
    services: Arc<ServiceHub>,
    ctx_builder: ModuleContextBuilder,
    lifecycle: LifecycleConfig,
    instance_id: Uuid,
    started: AtomicBool,
    router: Mutex<Option<Router>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(
            Arc::new(EmptyConfigProvider),
            LifecycleConfig::default(),
            CancellationToken::new(),
        )
    }
}

impl ModuleRegistry {
    /// `cancel` is the root token; every lifecycle call gets a child of it.
    #[must_use]
    pub fn new(
        config_provider: Arc<dyn ConfigProvider>,
        lifecycle: LifecycleConfig,
        cancel: CancellationToken,
    ) -> Self {
        let services = Arc::new(ServiceHub::new());
        Self {
            table: Arc::new(ModuleTable::default()),
            ctx_builder: ModuleContextBuilder::new(config_provider, Arc::clone(&services), cancel),
            services,
            lifecycle,
            instance_id: Uuid::now_v7(),
            started: AtomicBool::new(false),
            router: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn from_config(config: Arc<HostConfig>, cancel: CancellationToken) -> Self {
        let lifecycle = config.lifecycle.clone();
        Self::new(config, lifecycle, cancel)
    }

    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ServiceHub> {
        &self.services
    }

    /// Add a module. Only allowed before `start()`.
    ///
    /// # Errors
    /// Fails on a duplicate name, a taken route prefix, a feature the module
    /// does not support, or if the registry was already started.
    pub fn register(
        &self,
        descriptor: ModuleDescriptor,
        module: Arc<dyn Module>,
    ) -> Result<(), RegistryError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(RegistryError::AlreadyStarted);
        }

        let supported = module.supported_features();
        if let Some(feature) = descriptor
            .features()
            .keys()
            .find(|f| !supported.iter().any(|s| *s == f.as_str()))
        {
            return Err(RegistryError::UnknownFeature {
                module: descriptor.name().to_owned(),
                feature: feature.clone(),
            });
        }

        let handle = ModuleHandle::new(descriptor, module);
        tracing::debug!(
            module = handle.name(),
            version = handle.descriptor().version(),
            enabled = handle.descriptor().is_enabled(),
            dependencies = ?handle.descriptor().dependencies(),
            "Registered module"
        );
        self.table.insert(handle)
    }

    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<Arc<ModuleHandle>> {
        self.table.find_module(name)
    }

    /// All modules in registration order.
    #[must_use]
    pub fn modules(&self) -> Vec<Arc<ModuleHandle>> {
        self.table.snapshot()
    }

    /// Load order of everything registered so far, without side effects.
    ///
    /// # Errors
    /// Returns [`RegistryError::Resolve`] on an unknown dependency or a cycle.
    pub fn load_order(&self) -> Result<Vec<String>, RegistryError> {
        let modules = self.table.snapshot();
        let descriptors: Vec<&ModuleDescriptor> =
            modules.iter().map(|m| m.descriptor().as_ref()).collect();
        Ok(resolve_load_order(&descriptors)?)
    }

    #[must_use]
    pub fn system_overview(&self) -> SystemOverview {
        self.table.overview()
    }

    /// Health of one module, or `None` if no module has that name.
    pub async fn health_check(&self, name: &str) -> Option<ModuleHealth> {
        let handle = self.table.find_module(name)?;
        Some(handle.health(self.table.as_ref()).await)
    }

    pub async fn system_health(&self) -> SystemHealth {
        self.table.system_health().await
    }

    /// Routes of every started module plus the `/system` endpoints.
    #[must_use]
    pub fn router(&self) -> Router {
        let modules = self.router.lock().clone().unwrap_or_default();
        modules.merge(crate::api::system_router(Arc::clone(&self.table)))
    }

    /// Bring every enabled module up in load order.
    ///
    /// Nothing is initialized if resolution fails or an enabled module
    /// depends on a disabled one.
    ///
    /// # Errors
    /// Returns the first failure; later modules are not touched.
    pub async fn start(&self) -> Result<(), RegistryError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::AlreadyStarted);
        }

        let order = self.load_order()?;
        self.table.set_load_order(order.clone());

        let sequence: Vec<Arc<ModuleHandle>> = order
            .iter()
            .filter_map(|name| self.table.find_module(name))
            .filter(|h| {
                let enabled = h.descriptor().is_enabled();
                if !enabled {
                    tracing::info!(module = h.name(), "Skipping disabled module");
                }
                enabled
            })
            .collect();
        self.check_disabled_dependencies(&sequence)?;

        tracing::info!(
            instance_id = %self.instance_id,
            modules = sequence.len(),
            load_order = ?order,
            "Starting module registry"
        );

        self.run_initialize_phase(&sequence, &order).await?;
        self.run_routes_phase(&sequence)?;
        self.run_activate_phase(&sequence, &order).await?;

        tracing::info!(modules = sequence.len(), "All modules active");
        Ok(())
    }

    /// Deactivate then clean up every started module in reverse load order.
    ///
    /// Failures are logged and never stop the sweep. Each module sees each
    /// call at most once, so calling `stop()` again is a no-op.
    pub async fn stop(&self) {
        let order = self.table.load_order();
        let reversed: Vec<Arc<ModuleHandle>> = order
            .iter()
            .rev()
            .filter_map(|name| self.table.find_module(name))
            .collect();
        let timeout = self.lifecycle.shutdown_timeout();

        tracing::info!("Phase: deactivate");
        for handle in reversed.iter().filter(|h| h.state().needs_teardown()) {
            let ctx = self.ctx_builder.for_module(handle.descriptor(), handle.counters());
            match handle.deactivate(&ctx, timeout).await {
                Ok(()) => tracing::info!(module = handle.name(), "Deactivated module"),
                Err(err) => {
                    tracing::warn!(module = handle.name(), error = %err, "Failed to deactivate module");
                }
            }
        }

        tracing::info!("Phase: cleanup");
        for handle in reversed
            .iter()
            .filter(|h| h.state() == LifecycleState::Deactivated)
        {
            let ctx = self.ctx_builder.for_module(handle.descriptor(), handle.counters());
            match handle.cleanup(&ctx, timeout).await {
                Ok(()) => tracing::info!(module = handle.name(), "Cleaned up module"),
                Err(err) => {
                    tracing::warn!(module = handle.name(), error = %err, "Failed to clean up module");
                }
            }
        }
    }

    fn check_disabled_dependencies(&self, sequence: &[Arc<ModuleHandle>]) -> Result<(), RegistryError> {
        for handle in sequence {
            for dep in handle.descriptor().dependencies() {
                let disabled = self
                    .table
                    .find_module(dep)
                    .is_some_and(|d| !d.descriptor().is_enabled());
                if disabled {
                    return Err(RegistryError::DisabledDependency {
                        module: handle.name().to_owned(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Transitive dependencies of `module`, in load order.
    fn requires(&self, module: &str, order: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![module.to_owned()];
        while let Some(name) = stack.pop() {
            if let Some(handle) = self.table.find_module(&name) {
                for dep in handle.descriptor().dependencies() {
                    if seen.insert(dep.clone()) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        order.iter().filter(|n| seen.contains(*n)).cloned().collect()
    }

    async fn run_initialize_phase(
        &self,
        sequence: &[Arc<ModuleHandle>],
        order: &[String],
    ) -> Result<(), RegistryError> {
        tracing::info!("Phase: initialize");
        let total = sequence.len();
        let timeout = self.lifecycle.initialize_timeout();

        for (i, handle) in sequence.iter().enumerate() {
            tracing::debug!(module = handle.name(), position = i + 1, total, "Initializing module");
            let ctx = self.ctx_builder.for_module(handle.descriptor(), handle.counters());
            handle.initialize(&ctx, timeout).await.map_err(|source| {
                let err = RegistryError::Initialize {
                    module: handle.name().to_owned(),
                    position: i + 1,
                    total,
                    requires: self.requires(handle.name(), order),
                    source,
                };
                tracing::error!(error = %err, cause = %source_of(&err), "Startup aborted");
                err
            })?;
            tracing::info!(module = handle.name(), "Initialized module");
        }
        Ok(())
    }

    fn run_routes_phase(&self, sequence: &[Arc<ModuleHandle>]) -> Result<(), RegistryError> {
        tracing::info!("Phase: routes");
        let lookup: Arc<dyn ModuleLookup> = Arc::clone(&self.table) as Arc<dyn ModuleLookup>;
        let mut router = Router::new();

        for handle in sequence {
            let ctx = self.ctx_builder.for_module(handle.descriptor(), handle.counters());
            let domain = handle
                .register_routes(&ctx)
                .map_err(|source| RegistryError::Routes {
                    module: handle.name().to_owned(),
                    source,
                })?;
            router = crate::api::mount_module(
                router,
                Arc::clone(handle),
                Arc::clone(&lookup),
                domain,
            )
            .map_err(|source| {
                let err = RegistryError::Routes {
                    module: handle.name().to_owned(),
                    source: HookError::Failed {
                        hook: Hook::RegisterRoutes,
                        source,
                    },
                };
                tracing::error!(error = %err, cause = %source_of(&err), "Startup aborted");
                err
            })?;
            tracing::debug!(
                module = handle.name(),
                prefix = %handle.descriptor().effective_route_prefix(),
                "Mounted module routes"
            );
        }

        *self.router.lock() = Some(router);
        Ok(())
    }

    async fn run_activate_phase(
        &self,
        sequence: &[Arc<ModuleHandle>],
        order: &[String],
    ) -> Result<(), RegistryError> {
        tracing::info!("Phase: activate");
        let total = sequence.len();
        let timeout = self.lifecycle.activate_timeout();

        for (i, handle) in sequence.iter().enumerate() {
            let ctx = self.ctx_builder.for_module(handle.descriptor(), handle.counters());
            handle.activate(&ctx, timeout).await.map_err(|source| {
                let err = RegistryError::Activate {
                    module: handle.name().to_owned(),
                    position: i + 1,
                    total,
                    requires: self.requires(handle.name(), order),
                    source,
                };
                tracing::error!(error = %err, cause = %source_of(&err), "Startup aborted");
                err
            })?;
            tracing::info!(module = handle.name(), "Activated module");
        }
        Ok(())
    }
}

/// Every cause below `err`, outermost first, joined with `: `.
fn source_of(err: &RegistryError) -> String {
    let mut causes = Vec::new();
    let mut next = std::error::Error::source(err);
    while let Some(cause) = next {
        causes.push(cause.to_string());
        next = cause.source();
    }
    causes.join(": ")
}
