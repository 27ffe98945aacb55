//! Tri-state module health and the per-query memo used while walking the dependency graph.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Serialize;

/// Key under which a module's own self-check is recorded in [`ModuleHealth::services`].
pub const MODULE_SERVICE: &str = "module";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Fold individual check results into a status.
    ///
    /// All passing is healthy, all failing is unhealthy, anything mixed is
    /// degraded. No checks at all counts as healthy.
    #[must_use]
    pub fn from_checks<I>(checks: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        let (mut passed, mut failed) = (0usize, 0usize);
        for ok in checks {
            if ok {
                passed += 1;
            } else {
                failed += 1;
            }
        }
        match (passed, failed) {
            (_, 0) => Self::Healthy,
            (0, _) => Self::Unhealthy,
            _ => Self::Degraded,
        }
    }

    /// Combine module statuses: healthy only if all are healthy, unhealthy only if all are.
    #[must_use]
    pub fn combine<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let (mut healthy, mut unhealthy, mut total) = (0usize, 0usize, 0usize);
        for s in statuses {
            total += 1;
            match s {
                Self::Healthy => healthy += 1,
                Self::Unhealthy => unhealthy += 1,
                Self::Degraded => {}
            }
        }
        if healthy == total {
            Self::Healthy
        } else if unhealthy == total {
            Self::Unhealthy
        } else {
            Self::Degraded
        }
    }

    /// HTTP status used by the `/health` endpoints.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy => StatusCode::OK,
            Self::Degraded => StatusCode::PARTIAL_CONTENT,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Health report for one module, recomputed on every query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleHealth {
    pub status: HealthStatus,
    pub services: BTreeMap<String, bool>,
    pub dependencies: BTreeMap<String, bool>,
    pub last_check: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl ModuleHealth {
    pub(crate) fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            services: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            last_check: Utc::now(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn record_service(&mut self, name: impl Into<String>, ok: bool) {
        self.services.insert(name.into(), ok);
    }

    pub(crate) fn record_dependency(&mut self, name: impl Into<String>, ok: bool) {
        self.dependencies.insert(name.into(), ok);
    }

    pub(crate) fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Derive `status` from the recorded checks.
    pub(crate) fn finish(mut self) -> Self {
        self.status = HealthStatus::from_checks(
            self.services
                .values()
                .chain(self.dependencies.values())
                .copied(),
        );
        self
    }
}

/// Aggregate health over every enabled module, served at `/system/health`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub modules: BTreeMap<String, HealthStatus>,
}

#[derive(Debug, Clone, Copy)]
enum Visit {
    InProgress,
    Done(HealthStatus),
}

/// Memo for one health query.
///
/// Each module is checked at most once per query even when several
/// dependents share it. A module met again while its own check is still
/// running sits on a dependency cycle; every edge of that loop is
/// remembered so each member reports the broken dependency, whichever
/// module the walk started from.
#[derive(Debug, Default)]
pub struct HealthCache {
    visits: HashMap<String, Visit>,
    path: Vec<String>,
    cycle_edges: HashSet<(String, String)>,
}

pub(crate) enum CachedStatus {
    Unvisited,
    InProgress,
    Done(HealthStatus),
}

impl HealthCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, module: &str) -> CachedStatus {
        match self.visits.get(module) {
            None => CachedStatus::Unvisited,
            Some(Visit::InProgress) => CachedStatus::InProgress,
            Some(Visit::Done(s)) => CachedStatus::Done(*s),
        }
    }

    pub(crate) fn enter(&mut self, module: &str) {
        self.visits.insert(module.to_owned(), Visit::InProgress);
        self.path.push(module.to_owned());
    }

    pub(crate) fn complete(&mut self, module: &str, status: HealthStatus) {
        self.visits.insert(module.to_owned(), Visit::Done(status));
        if self.path.last().is_some_and(|m| m == module) {
            self.path.pop();
        }
    }

    /// Record the loop closed by reaching `module` again from the module
    /// currently being checked.
    pub(crate) fn close_cycle(&mut self, module: &str) {
        let Some(start) = self.path.iter().position(|m| m == module) else {
            return;
        };
        let mut members = self.path[start..].to_vec();
        members.push(module.to_owned());
        for pair in members.windows(2) {
            self.cycle_edges.insert((pair[0].clone(), pair[1].clone()));
        }
    }

    /// Whether `from -> to` lies on a dependency cycle seen in this query.
    pub(crate) fn on_cycle(&self, from: &str, to: &str) -> bool {
        self.cycle_edges.contains(&(from.to_owned(), to.to_owned()))
    }

    /// Final status of a module already checked during this query.
    #[must_use]
    pub fn status_of(&self, module: &str) -> Option<HealthStatus> {
        match self.visits.get(module) {
            Some(Visit::Done(s)) => Some(*s),
            _ => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn tri_state_rule() {
        assert_eq!(HealthStatus::from_checks([true, true]), HealthStatus::Healthy);
        assert_eq!(
            HealthStatus::from_checks([false, false]),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::from_checks([true, false]),
            HealthStatus::Degraded
        );
        assert_eq!(HealthStatus::from_checks([]), HealthStatus::Healthy);
    }

    #[test]
    fn combine_statuses() {
        use HealthStatus::{Degraded, Healthy, Unhealthy};
        assert_eq!(HealthStatus::combine([Healthy, Healthy]), Healthy);
        assert_eq!(HealthStatus::combine([Unhealthy, Unhealthy]), Unhealthy);
        assert_eq!(HealthStatus::combine([Healthy, Unhealthy]), Degraded);
        assert_eq!(HealthStatus::combine([Degraded]), Degraded);
        assert_eq!(HealthStatus::combine([]), Healthy);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(HealthStatus::Healthy.http_status(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Degraded.http_status(),
            StatusCode::PARTIAL_CONTENT
        );
        assert_eq!(
            HealthStatus::Unhealthy.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn finish_derives_status_from_services_and_dependencies() {
        let mut h = ModuleHealth::new();
        h.record_service(MODULE_SERVICE, false);
        h.record_dependency("accounts", true);
        let h = h.finish();
        assert_eq!(h.status, HealthStatus::Degraded);
    }

    #[test]
    fn serializes_lowercase_status_and_camel_case_fields() {
        let mut h = ModuleHealth::new();
        h.record_service(MODULE_SERVICE, true);
        let v = serde_json::to_value(h.finish()).unwrap();
        assert_eq!(v["status"], "healthy");
        assert!(v.get("lastCheck").is_some());
    }

    #[test]
    fn closing_a_cycle_marks_every_edge_of_the_loop() {
        let mut cache = HealthCache::new();
        cache.enter("top");
        cache.enter("x");
        cache.enter("y");
        cache.close_cycle("x");

        assert!(cache.on_cycle("x", "y"));
        assert!(cache.on_cycle("y", "x"));
        assert!(!cache.on_cycle("top", "x"));

        cache.complete("y", HealthStatus::Degraded);
        cache.complete("x", HealthStatus::Degraded);
        cache.complete("top", HealthStatus::Healthy);
        assert_eq!(cache.status_of("x"), Some(HealthStatus::Degraded));
    }
}
