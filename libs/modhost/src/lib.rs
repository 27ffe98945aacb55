//! In-process module host.
//!
//! Modules describe themselves with a [`ModuleDescriptor`], implement the
//! [`Module`] contract and are registered with a [`ModuleRegistry`]. The
//! registry orders them by declared dependencies, drives the lifecycle
//! (`initialize → activate → deactivate → cleanup`), aggregates health across
//! the dependency graph and serves the standard HTTP endpoints.
//!
//! ```ignore
//! let registry = ModuleRegistry::from_config(config, cancel.clone());
//! registry.register(
//!     ModuleDescriptor::builder("billing", "1.2.0").depends_on("accounts").build()?,
//!     Arc::new(Billing::default()),
//! )?;
//! registry.start().await?;
//! axum::serve(listener, registry.router()).await?;
//! registry.stop().await;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod config;
pub mod context;
pub mod contracts;
pub mod descriptor;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod services;
pub mod telemetry;

pub use config::{
    ConfigError, ConfigProvider, HostConfig, LifecycleConfig, LogFormat, LoggingConfig,
    ServerConfig,
};
pub use context::ModuleCtx;
pub use contracts::Module;
pub use descriptor::{DescriptorBuilder, DescriptorError, ModuleDescriptor};
pub use health::{HealthCache, HealthStatus, ModuleHealth, SystemHealth};
pub use lifecycle::{Hook, HookError, LifecycleState, ModuleHandle, ModuleLookup, ModuleStatus};
pub use metrics::{ModuleMetrics, RequestCounters};
pub use registry::{ModuleRegistry, RegistryError, SystemOverview};
pub use resolver::{ResolveError, resolve_load_order};
pub use services::{ServiceHub, ServiceHubError};

// Re-exported for module implementations.
pub use async_trait::async_trait;
