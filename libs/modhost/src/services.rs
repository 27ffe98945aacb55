//! Typed service hub passed to modules instead of a process-wide global.
//!
//! A provider module publishes an implementation once, keyed by its interface
//! type (usually `dyn SomeApi`). Consumers resolve it by the same type and
//! keep the returned `Arc`. The hub is owned by the registry and reaches
//! modules only through their [`ModuleCtx`](crate::ModuleCtx).
//!
//! Publishing happens right after the provider's own `initialize()`, so a
//! module can resolve anything published by its declared dependencies.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ServiceHubError {
    #[error("no service published for type {type_name}")]
    NotFound { type_name: &'static str },

    #[error("service stored for type {type_name} has an unexpected concrete type")]
    TypeMismatch { type_name: &'static str },
}

type Stored = Box<dyn Any + Send + Sync>;

/// Registry of services keyed by interface type.
#[derive(Default)]
pub struct ServiceHub {
    services: RwLock<HashMap<&'static str, Stored>>,
}

impl ServiceHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `service` under interface type `T`, replacing any previous one.
    ///
    /// Handles already resolved by consumers stay valid.
    pub fn publish<T>(&self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = std::any::type_name::<T>();
        tracing::debug!(service = key, "Publishing service");
        self.services.write().insert(key, Box::new(service));
    }

    /// Resolve the service published under interface type `T`.
    ///
    /// # Errors
    /// Returns [`ServiceHubError::NotFound`] if nothing is published for `T`.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ServiceHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let services = self.services.read();
        let stored = services
            .get(type_name)
            .ok_or(ServiceHubError::NotFound { type_name })?;
        stored
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(ServiceHubError::TypeMismatch { type_name })
    }

    /// Remove and return the service published under `T`.
    pub fn withdraw<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let stored = self
            .services
            .write()
            .remove(std::any::type_name::<T>())?;
        stored.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .read()
            .contains_key(std::any::type_name::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl std::fmt::Debug for ServiceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services = self.services.read();
        f.debug_struct("ServiceHub")
            .field("services", &services.keys().collect::<Vec<_>>())
            .finish()
    }
}
