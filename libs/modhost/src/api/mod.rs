//! HTTP surface: standard per-module endpoints and the system routes.
//!
//! Every started module is served under its route prefix with
//! `/health`, `/info` and `/metrics` merged next to its own domain routes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::Response;
use axum::routing::get;

use crate::lifecycle::{ModuleHandle, ModuleLookup};
use crate::metrics::RequestCounters;
use crate::registry::ModuleTable;

pub mod dto;
mod handlers;
pub mod problem;

pub use dto::{ModuleInfoDto, ModuleSummaryDto};
pub use problem::{APPLICATION_PROBLEM_JSON, Problem};

use handlers::ModuleRouteState;

async fn track_request(
    State(counters): State<Arc<RequestCounters>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let resp = next.run(req).await;
    counters.record_request(started.elapsed());
    if resp.status().is_server_error() {
        counters.record_error();
    }
    resp
}

/// Count requests, latency and 5xx responses of a module's domain routes.
pub(crate) fn with_request_tracking(router: Router, counters: Arc<RequestCounters>) -> Router {
    router.layer(from_fn_with_state(counters, track_request))
}

/// Standard endpoints plus `domain`, nested under the module's route prefix.
pub(crate) fn module_router(
    handle: Arc<ModuleHandle>,
    lookup: Arc<dyn ModuleLookup>,
    domain: Router,
) -> Router {
    let prefix = handle.descriptor().effective_route_prefix();
    let standard = Router::new()
        .route("/health", get(handlers::module_health))
        .route("/info", get(handlers::module_info))
        .route("/metrics", get(handlers::module_metrics))
        .with_state(ModuleRouteState { handle, lookup });

    Router::new().nest(&prefix, standard.merge(domain))
}

/// Merge a module's router into `router`.
///
/// axum panics on overlapping routes, e.g. a domain route shadowing
/// `/health`. The panic is turned into an error naming the clash.
pub(crate) fn mount_module(
    router: Router,
    handle: Arc<ModuleHandle>,
    lookup: Arc<dyn ModuleLookup>,
    domain: Router,
) -> anyhow::Result<Router> {
    panic::catch_unwind(AssertUnwindSafe(move || {
        router.merge(module_router(handle, lookup, domain))
    }))
    .map_err(|payload| anyhow::anyhow!("conflicting routes: {}", panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("overlapping route")
}

pub(crate) fn system_router(table: Arc<ModuleTable>) -> Router {
    Router::new()
        .route("/system/overview", get(handlers::system_overview))
        .route("/system/health", get(handlers::system_health))
        .route("/system/modules", get(handlers::list_modules))
        .route("/system/modules/{name}", get(handlers::get_module))
        .with_state(table)
}
