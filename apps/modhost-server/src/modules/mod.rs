//! Modules compiled into the server binary.

use std::sync::Arc;

use modhost::{ModuleDescriptor, ModuleRegistry};

pub mod clock;
pub mod heartbeat;

pub use clock::ClockModule;
pub use heartbeat::HeartbeatModule;

/// Register every built-in module.
///
/// `heartbeat` only turns on `log_beats` when asked; module sections in the
/// config file control everything else.
///
/// # Errors
/// Returns an error if a descriptor is invalid or registration is refused.
pub fn register_all(registry: &ModuleRegistry, log_beats: bool) -> anyhow::Result<()> {
    registry.register(
        ModuleDescriptor::builder(clock::MODULE_NAME, env!("CARGO_PKG_VERSION"))
            .description("Wall clock shared with other modules")
            .build()?,
        Arc::new(ClockModule::default()),
    )?;

    registry.register(
        ModuleDescriptor::builder(heartbeat::MODULE_NAME, env!("CARGO_PKG_VERSION"))
            .description("Periodic liveness beats")
            .depends_on(clock::MODULE_NAME)
            .feature(heartbeat::FEATURE_LOG_BEATS, log_beats)
            .build()?,
        Arc::new(HeartbeatModule::default()),
    )?;

    Ok(())
}
