mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use governance::auth::{ACTOR_ID_HEADER, ENVIRONMENTS_HEADER, PLATFORM_ADMIN_HEADER};
use governance::http::{router, AppState};
use governance::HeaderAuthProvider;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(env: &TestEnv) -> Router {
    router(AppState {
        engine: env.engine.clone(),
        admin: env.admin.clone(),
        auth: Arc::new(HeaderAuthProvider),
    })
}

fn post(uri: &str, actor: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(ENVIRONMENTS_HEADER, "test");
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_ID_HEADER, actor);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, actor: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(ACTOR_ID_HEADER, actor)
        .header(ENVIRONMENTS_HEADER, "test")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn delete_body(vm_ids: &[&str]) -> Value {
    json!({
        "operation": "DELETE",
        "items": vm_ids.iter().map(|id| json!({ "vm_id": id })).collect::<Vec<_>>(),
        "reason": "decommission",
    })
}

#[tokio::test]
async fn test_health() {
    let env = setup().await;
    let response = app(&env)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_submit_and_fetch_batch() {
    let env = setup().await;

    let response = app(&env)
        .oneshot(post(
            "/api/v1/vms/batch",
            Some("alice"),
            delete_body(&["vm-1", "vm-2"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let submitted = json_body(response).await;
    let batch_id = submitted["batch_id"].as_str().unwrap().to_string();
    assert_eq!(submitted["status"], "PENDING_APPROVAL");
    assert_eq!(
        submitted["status_url"],
        format!("/api/v1/vms/batch/{}", batch_id)
    );

    let response = app(&env)
        .oneshot(get(&format!("/api/v1/vms/batch/{}", batch_id), "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["child_count"], 2);
    assert_eq!(view["pending_count"], 2);
    assert_eq!(view["children"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let env = setup().await;
    let response = app(&env)
        .oneshot(post("/api/v1/vms/batch", None, delete_body(&["vm-1"])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let env = setup().await;
    let response = app(&env)
        .oneshot(get("/api/v1/vms/batch/does-not-exist", "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "BATCH_NOT_FOUND");
}

#[tokio::test]
async fn test_rate_limited_submission_sets_retry_after() {
    let env = setup().await;
    for vm in ["vm-1", "vm-2", "vm-3"] {
        let response = app(&env)
            .oneshot(post("/api/v1/vms/batch", Some("alice"), delete_body(&[vm])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = app(&env)
        .oneshot(post(
            "/api/v1/vms/batch",
            Some("alice"),
            delete_body(&["vm-4"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    let body = json_body(response).await;
    assert_eq!(body["code"], "BATCH_RATE_LIMITED");
    assert_eq!(body["params"]["reason"], "user_pending");
}

#[tokio::test]
async fn test_bad_requests() {
    let env = setup().await;
    let submitted = env
        .engine
        .submit_batch(&tester("alice"), delete_request(&["vm-1"]))
        .await
        .unwrap();

    let response = app(&env)
        .oneshot(post(
            &format!("/api/v1/vms/batch/{}/actions", submitted.batch_id),
            Some("alice"),
            json!({ "action": "explode" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_REQUEST");

    let response = app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/vms/batch")
                .header(header::CONTENT_TYPE, "application/json")
                .header(ACTOR_ID_HEADER, "alice")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_cancel_action_over_http() {
    let env = setup().await;
    let submitted = env
        .engine
        .submit_batch(&tester("alice"), delete_request(&["vm-1", "vm-2"]))
        .await
        .unwrap();

    let response = app(&env)
        .oneshot(post(
            &format!("/api/v1/vms/batch/{}/actions", submitted.batch_id),
            Some("alice"),
            json!({ "action": "cancel" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["affected_count"], 2);
}

#[tokio::test]
async fn test_admin_rate_limit_routes() {
    let env = setup().await;

    let forbidden = app(&env)
        .oneshot(get("/api/v1/admin/rate-limits/alice", "bob"))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let put_override = Request::builder()
        .method("PUT")
        .uri("/api/v1/admin/rate-limits/alice/override")
        .header(header::CONTENT_TYPE, "application/json")
        .header(ACTOR_ID_HEADER, "root")
        .header(PLATFORM_ADMIN_HEADER, "true")
        .body(Body::from(
            json!({ "max_pending_parents": 7, "reason": "release week" }).to_string(),
        ))
        .unwrap();
    let response = app(&env).oneshot(put_override).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(&env)
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/rate-limits/alice")
                .header(ACTOR_ID_HEADER, "root")
                .header(PLATFORM_ADMIN_HEADER, "true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let limits = json_body(response).await;
    assert_eq!(limits["policy"]["max_pending_parents"], 7);
    assert_eq!(limits["override"]["reason"], "release week");

    let response = app(&env)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/admin/rate-limits/alice/override")
                .header(ACTOR_ID_HEADER, "root")
                .header(PLATFORM_ADMIN_HEADER, "true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["removed"], true);
}
