//! End-to-end tests over the full router, hitting it through `tower`'s
//! `oneshot` instead of a real listener, with the metadata, blob, and cache
//! gateways swapped for their in-memory fakes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use skyport_api::{build_router, ApiState};
use skyport_blob::LocalBlobStore;
use skyport_cache::FakeCacheStore;
use skyport_metadata::{FakeMetadataStore, MetadataStore};
use skyport_release::{NoopDiffer, ReleaseIngestor};
use skyport_types::{ids::AccountId, App, Email};

async fn test_app() -> (axum::Router, AccountId, App) {
    let metadata = Arc::new(FakeMetadataStore::new());
    let dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(LocalBlobStore::new(dir.path().to_path_buf()));
    let cache = Arc::new(FakeCacheStore::new());
    let release = Arc::new(ReleaseIngestor::new(metadata.clone(), blobs.clone(), cache.clone(), Arc::new(NoopDiffer)));

    let owner = AccountId::new();
    let app = metadata
        .create_app("demo", Email::parse("owner@example.com").unwrap(), owner)
        .await
        .unwrap();

    let state = ApiState::new(metadata, blobs, cache, release);
    (build_router(state), owner, app)
}

fn authed(method: &str, uri: &str, owner: AccountId) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {owner}"))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_and_fetch_app() {
    let (router, owner, _app) = test_app().await;

    let response = router
        .clone()
        .oneshot(
            authed("POST", "/apps", owner)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "another", "ownerEmail": "owner@example.com"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .oneshot(authed("GET", "/apps", owner).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn non_collaborator_cannot_read_deployments() {
    let (router, _owner, app) = test_app().await;
    let stranger = AccountId::new();

    let response = router
        .oneshot(
            authed("GET", &format!("/apps/{}/deployments", app.name), stranger)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deployment_lifecycle_and_release_upload() {
    let (router, owner, app) = test_app().await;

    let response = router
        .clone()
        .oneshot(
            authed("POST", &format!("/apps/{}/deployments", app.name), owner)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "Staging"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let deployment = body_json(response).await;
    let deployment_name = deployment["name"].as_str().unwrap();

    let boundary = "XBOUNDARY";
    let mut multipart_body = Vec::new();
    multipart_body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    multipart_body.extend_from_slice(b"Content-Disposition: form-data; name=\"package\"\r\n\r\n");
    multipart_body.extend_from_slice(b"package bytes go here");
    multipart_body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    multipart_body.extend_from_slice(b"Content-Disposition: form-data; name=\"packageInfo\"\r\n\r\n");
    multipart_body.extend_from_slice(json!({"appVersion": "1.0.0", "isMandatory": false}).to_string().as_bytes());
    multipart_body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = router
        .clone()
        .oneshot(
            authed("POST", &format!("/apps/{}/deployments/{deployment_name}/release", app.name), owner)
                .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(multipart_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let package = body_json(response).await;
    assert_eq!(package["label"], "v1");

    let response = router
        .oneshot(
            authed("GET", &format!("/apps/{}/deployments/{deployment_name}/history", app.name), owner)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_check_reports_no_update_against_empty_history() {
    let (router, owner, app) = test_app().await;

    let response = router
        .clone()
        .oneshot(
            authed("POST", &format!("/apps/{}/deployments", app.name), owner)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "Production"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let deployment = body_json(response).await;
    let key = deployment["key"].as_str().unwrap().to_string();

    let uri = format!("/updateCheck?deploymentKey={key}&appVersion=1.0.0");
    let response = router.oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["updateInfo"]["isAvailable"], false);
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let (router, _owner, _app) = test_app().await;
    let response = router.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
