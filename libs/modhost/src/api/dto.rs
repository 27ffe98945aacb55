use std::collections::BTreeMap;

use serde::Serialize;

use crate::lifecycle::{LifecycleState, ModuleHandle, ModuleStatus};

/// Body of `GET {prefix}/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfoDto {
    pub name: String,
    pub version: String,
    pub description: String,
    pub features: BTreeMap<String, bool>,
    pub status: ModuleStatus,
}

impl From<&ModuleHandle> for ModuleInfoDto {
    fn from(handle: &ModuleHandle) -> Self {
        let d = handle.descriptor();
        Self {
            name: d.name().to_owned(),
            version: d.version().to_owned(),
            description: d.description().to_owned(),
            features: d.features().clone(),
            status: handle.status(),
        }
    }
}

/// One entry of `GET /system/modules`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummaryDto {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub state: LifecycleState,
    pub dependencies: Vec<String>,
    pub route_prefix: String,
}

impl From<&ModuleHandle> for ModuleSummaryDto {
    fn from(handle: &ModuleHandle) -> Self {
        let d = handle.descriptor();
        Self {
            name: d.name().to_owned(),
            version: d.version().to_owned(),
            enabled: d.is_enabled(),
            state: handle.state(),
            dependencies: d.dependencies().to_vec(),
            route_prefix: d.effective_route_prefix(),
        }
    }
}
