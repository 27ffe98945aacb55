use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ConfigProvider, module_config_or_default, module_config_required};
use crate::descriptor::ModuleDescriptor;
use crate::metrics::RequestCounters;
use crate::services::ServiceHub;

/// Execution context handed to every lifecycle hook.
///
/// This is the only way a module reaches shared runtime resources:
/// - **Configuration**: typed access to its own section via [`config`](Self::config)
/// - **Services**: the [`ServiceHub`] for publishing and resolving inter-module APIs
/// - **Counters**: its own [`RequestCounters`], for request handlers it installs
/// - **Cancellation**: a token scoped to the current lifecycle call
///
/// ```ignore
/// async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
///     let cfg: BillingConfig = ctx.config()?;
///     let rates = ctx.services().resolve::<dyn RatesApi>()?;
///     self.engine.set(BillingEngine::new(cfg, rates));
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ModuleCtx {
    descriptor: Arc<ModuleDescriptor>,
    config_provider: Arc<dyn ConfigProvider>,
    services: Arc<ServiceHub>,
    counters: Arc<RequestCounters>,
    cancellation_token: CancellationToken,
}

impl ModuleCtx {
    pub fn new(
        descriptor: Arc<ModuleDescriptor>,
        config_provider: Arc<dyn ConfigProvider>,
        services: Arc<ServiceHub>,
        counters: Arc<RequestCounters>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            descriptor,
            config_provider,
            services,
            counters,
            cancellation_token,
        }
    }

    #[inline]
    #[must_use]
    pub fn module_name(&self) -> &str {
        self.descriptor.name()
    }

    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Whether a declared feature flag is on for this module.
    #[inline]
    #[must_use]
    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.descriptor.feature_enabled(feature)
    }

    #[inline]
    #[must_use]
    pub fn services(&self) -> &ServiceHub {
        &self.services
    }

    /// Shared handle to this module's counters, for request handlers.
    #[inline]
    #[must_use]
    pub fn counters(&self) -> Arc<RequestCounters> {
        Arc::clone(&self.counters)
    }

    /// Token for the current lifecycle call.
    ///
    /// Cancelled when the call exceeds its timeout or the host shuts down.
    /// Background work started in `activate()` should derive its own child
    /// token from this one and cancel it in `deactivate()`.
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Typed module configuration, defaulting when the section is absent.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidConfig`] if the section exists but is invalid.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        module_config_or_default(self.config_provider.as_ref(), self.module_name())
    }

    /// Typed module configuration that must be present.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the section is missing or invalid.
    pub fn config_required<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        module_config_required(self.config_provider.as_ref(), self.module_name())
    }
}

/// Builds a fresh [`ModuleCtx`] for each lifecycle call.
///
/// Owned by the registry. Every context gets a new child of the root token,
/// so cancelling one timed-out call leaves the others alone.
pub(crate) struct ModuleContextBuilder {
    config_provider: Arc<dyn ConfigProvider>,
    services: Arc<ServiceHub>,
    root_token: CancellationToken,
}

impl ModuleContextBuilder {
    pub(crate) fn new(
        config_provider: Arc<dyn ConfigProvider>,
        services: Arc<ServiceHub>,
        root_token: CancellationToken,
    ) -> Self {
        Self {
            config_provider,
            services,
            root_token,
        }
    }

    pub(crate) fn for_module(
        &self,
        descriptor: &Arc<ModuleDescriptor>,
        counters: &Arc<RequestCounters>,
    ) -> ModuleCtx {
        ModuleCtx::new(
            Arc::clone(descriptor),
            Arc::clone(&self.config_provider),
            Arc::clone(&self.services),
            Arc::clone(counters),
            self.root_token.child_token(),
        )
    }
}
