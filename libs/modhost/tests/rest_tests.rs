#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Standard module endpoints and `/system` routes, driven through `oneshot`.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing;
use common::{Scripted, add, calls, descriptor, events};
use modhost::api::APPLICATION_PROBLEM_JSON;
use modhost::{
    Hook, HookError, LifecycleState, Module, ModuleCtx, ModuleDescriptor, ModuleRegistry,
    RegistryError, async_trait,
};
use serde_json::Value;
use tower::ServiceExt;

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn started(build: impl FnOnce(&ModuleRegistry)) -> (ModuleRegistry, Router) {
    let reg = ModuleRegistry::default();
    build(&reg);
    reg.start().await.unwrap();
    let router = reg.router();
    (reg, router)
}

#[tokio::test]
async fn health_endpoint_maps_status_to_http_code() {
    let ev = events();
    let (_reg, router) = started(|reg| {
        add(reg, &ev, "a", &[]);
        reg.register(descriptor("b", &["a"]), Arc::new(Scripted::new("b", &ev).unhealthy()))
            .unwrap();
        reg.register(descriptor("c", &[]), Arc::new(Scripted::new("c", &ev).unhealthy()))
            .unwrap();
    })
    .await;

    let (status, body) = get(&router, "/a/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["lastCheck"].is_string());

    let (status, body) = get(&router, "/b/health").await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["module"], false);
    assert_eq!(body["dependencies"]["a"], true);

    let (status, body) = get(&router, "/c/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn info_endpoint_describes_module() {
    let ev = events();
    let (_reg, router) = started(|reg| {
        let d = ModuleDescriptor::builder("billing", "2.1.0")
            .description("Invoices and payments")
            .feature("fast_path", true)
            .build()
            .unwrap();
        reg.register(d, Arc::new(Scripted::new("billing", &ev))).unwrap();
    })
    .await;

    let (status, body) = get(&router, "/billing/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "billing");
    assert_eq!(body["version"], "2.1.0");
    assert_eq!(body["description"], "Invoices and payments");
    assert_eq!(body["features"]["fast_path"], true);
    assert_eq!(body["status"]["active"], true);
    assert_eq!(body["status"]["initialized"], true);
    assert_eq!(body["status"]["enabled"], true);
}

#[tokio::test]
async fn metrics_count_domain_requests_and_server_errors() {
    let ev = events();
    let (_reg, router) = started(|reg| {
        reg.register(descriptor("a", &[]), Arc::new(Scripted::new("a", &ev).with_routes()))
            .unwrap();
    })
    .await;

    assert_eq!(get(&router, "/a/ok").await.0, StatusCode::OK);
    assert_eq!(get(&router, "/a/ok").await.0, StatusCode::OK);
    assert_eq!(
        get(&router, "/a/boom").await.0,
        StatusCode::INTERNAL_SERVER_ERROR
    );

    let (status, body) = get(&router, "/a/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "a");
    assert_eq!(body["requestCount"], 3);
    assert_eq!(body["errorCount"], 1);
    assert!(body["responseTime"].as_f64().unwrap() >= 0.0);
    assert!(body["uptime"].as_f64().unwrap() > 0.0);
    assert!(body["memoryUsage"].is_u64());
    assert_eq!(body["customMetrics"]["scripted"], true);
}

#[tokio::test]
async fn custom_route_prefix_is_honored() {
    let ev = events();
    let (_reg, router) = started(|reg| {
        let d = ModuleDescriptor::builder("alpha", "1.0.0")
            .route_prefix("/api/v1/alpha")
            .build()
            .unwrap();
        reg.register(d, Arc::new(Scripted::new("alpha", &ev))).unwrap();
    })
    .await;

    assert_eq!(get(&router, "/api/v1/alpha/health").await.0, StatusCode::OK);
    assert_eq!(get(&router, "/alpha/health").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn system_overview_and_module_listing() {
    let ev = events();
    let (_reg, router) = started(|reg| {
        add(reg, &ev, "a", &[]);
        add(reg, &ev, "b", &["a"]);
        reg.register(common::disabled("off", &[]), Arc::new(Scripted::new("off", &ev)))
            .unwrap();
    })
    .await;

    let (status, body) = get(&router, "/system/overview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalModules"], 3);
    assert_eq!(body["enabledModules"], 2);
    assert_eq!(body["activeModules"], 2);
    assert_eq!(body["loadOrder"], serde_json::json!(["a", "b", "off"]));

    let (status, body) = get(&router, "/system/modules").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["a", "b", "off"]);
    assert_eq!(body[1]["routePrefix"], "/b");
    assert_eq!(body[2]["state"], "registered");

    let (status, body) = get(&router, "/system/modules/b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["dependencies"], serde_json::json!(["a"]));

    // Disabled modules get no endpoints of their own.
    assert_eq!(get(&router, "/off/health").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_module_is_a_problem_response() {
    let (_reg, router) = started(|_| {}).await;

    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/system/modules/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        APPLICATION_PROBLEM_JSON
    );
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], 404);
    assert_eq!(body["instance"], "/system/modules/ghost");
    assert!(body["detail"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn system_health_reports_every_enabled_module() {
    let ev = events();
    let (_reg, router) = started(|reg| {
        add(reg, &ev, "a", &[]);
        reg.register(descriptor("b", &[]), Arc::new(Scripted::new("b", &ev).unhealthy()))
            .unwrap();
    })
    .await;

    let (status, body) = get(&router, "/system/health").await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["modules"]["a"], "healthy");
    assert_eq!(body["modules"]["b"], "unhealthy");
}

#[tokio::test]
async fn system_routes_exist_before_start() {
    let ev = events();
    let reg = ModuleRegistry::default();
    add(&reg, &ev, "a", &[]);
    let router = reg.router();

    let (status, body) = get(&router, "/system/overview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalModules"], 1);
    assert_eq!(body["activeModules"], 0);
    assert_eq!(get(&router, "/a/health").await.0, StatusCode::NOT_FOUND);
}

/// Claims `/health` for itself, clashing with the standard endpoint.
struct Shadowing;

#[async_trait]
impl Module for Shadowing {
    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    fn register_routes(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        Ok(router.route("/health", routing::get(|| async { "mine" })))
    }

    async fn perform_health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn route_clash_with_standard_endpoint_fails_start() {
    let ev = events();
    let reg = ModuleRegistry::default();
    add(&reg, &ev, "a", &[]);
    reg.register(descriptor("shadow", &["a"]), Arc::new(Shadowing))
        .unwrap();

    let err = reg.start().await.unwrap_err();
    match &err {
        RegistryError::Routes {
            module,
            source:
                HookError::Failed {
                    hook: Hook::RegisterRoutes,
                    source,
                },
        } => {
            assert_eq!(module, "shadow");
            assert!(source.to_string().starts_with("conflicting routes"), "{source}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "failed to register routes for module 'shadow'"
    );
    assert!(calls(&ev, "activate").is_empty());

    reg.stop().await;
    assert_eq!(calls(&ev, "cleanup"), ["a"]);
    assert_eq!(
        reg.get_module("shadow").unwrap().state(),
        LifecycleState::CleanedUp
    );
}
