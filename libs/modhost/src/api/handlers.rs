use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use super::dto::{ModuleInfoDto, ModuleSummaryDto};
use super::problem::not_found;
use crate::health::{ModuleHealth, SystemHealth};
use crate::lifecycle::{ModuleHandle, ModuleLookup};
use crate::metrics::ModuleMetrics;
use crate::registry::{ModuleTable, SystemOverview};

/// State behind one module's standard endpoints.
#[derive(Clone)]
pub(crate) struct ModuleRouteState {
    pub(crate) handle: Arc<ModuleHandle>,
    pub(crate) lookup: Arc<dyn ModuleLookup>,
}

pub(crate) async fn module_health(
    State(state): State<ModuleRouteState>,
) -> (StatusCode, Json<ModuleHealth>) {
    let health = state.handle.health(state.lookup.as_ref()).await;
    (health.status.http_status(), Json(health))
}

#[allow(clippy::unused_async)]
pub(crate) async fn module_info(State(state): State<ModuleRouteState>) -> Json<ModuleInfoDto> {
    Json(ModuleInfoDto::from(state.handle.as_ref()))
}

#[allow(clippy::unused_async)]
pub(crate) async fn module_metrics(State(state): State<ModuleRouteState>) -> Json<ModuleMetrics> {
    Json(state.handle.metrics())
}

#[allow(clippy::unused_async)]
pub(crate) async fn system_overview(State(table): State<Arc<ModuleTable>>) -> Json<SystemOverview> {
    Json(table.overview())
}

#[allow(clippy::unused_async)]
pub(crate) async fn list_modules(
    State(table): State<Arc<ModuleTable>>,
) -> Json<Vec<ModuleSummaryDto>> {
    let modules = table
        .snapshot()
        .iter()
        .map(|h| ModuleSummaryDto::from(h.as_ref()))
        .collect();
    Json(modules)
}

#[allow(clippy::unused_async)]
pub(crate) async fn get_module(
    State(table): State<Arc<ModuleTable>>,
    Path(name): Path<String>,
    uri: Uri,
) -> Response {
    match table.find_module(&name) {
        Some(handle) => Json(ModuleInfoDto::from(handle.as_ref())).into_response(),
        None => not_found(format!("module '{name}' is not registered"))
            .with_instance(uri.path())
            .into_response(),
    }
}

pub(crate) async fn system_health(
    State(table): State<Arc<ModuleTable>>,
) -> (StatusCode, Json<SystemHealth>) {
    let health = table.system_health().await;
    (health.status.http_status(), Json(health))
}
