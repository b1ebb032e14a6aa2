//! HTTP control surface for Ark.
//!
//! Exposes batch creation and `start`/`suspend`/`resume`/`cancel`, batch
//! status, aggregated storage health and replica fixity over a small JSON
//! API. Coordinator errors map onto HTTP statuses: unknown batch 404,
//! illegal transition 409, storage refusal 507.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{BatchSummary, CreateBatchRequest, CreatedBatch, SipSource};
pub use server::ArkServer;

#[cfg(test)]
mod tests {
    use super::*;
    use ark_batch::{BatchCoordinator, IngestConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn app() -> (Router, BatchCoordinator) {
        let coordinator = BatchCoordinator::from_config(IngestConfig::default()).unwrap();
        (router::build_router(coordinator.clone()), coordinator)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn sip_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["alpha", "beta"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join("a.txt"), name).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn storage_endpoint_reports_configured_nodes() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/v1/storage", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_and_malformed_batch_ids() {
        let (app, _) = app();
        let missing = ark_types::BatchId::new();
        let (status, _) = send(&app, "POST", &format!("/v1/batches/{missing}/start"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", "/v1/batches/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_requires_exactly_one_source() {
        let (app, _) = app();
        let (status, _) = send(&app, "POST", "/v1/batches", Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_lifecycle_over_http() {
        let (app, coordinator) = app();
        let tree = sip_tree();

        let (status, created) = send(
            &app,
            "POST",
            "/v1/batches",
            Some(serde_json::json!({ "root": tree.path() })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["batch_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("/v1/batches/{id}/suspend"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("suspend"));

        let (status, _) = send(&app, "POST", &format!("/v1/batches/{id}/start"), None).await;
        assert_eq!(status, StatusCode::OK);

        let batch: ark_types::BatchId = id.parse().unwrap();
        let settled = tokio::time::timeout(Duration::from_secs(10), coordinator.wait(batch))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.counts().done, 2);

        let (status, snapshot) = send(&app, "GET", &format!("/v1/batches/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["state"], "COMPLETED");
        assert_eq!(snapshot["units"].as_array().unwrap().len(), 2);

        let (status, list) = send(&app, "GET", "/v1/batches", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["units"]["done"], 2);

        let (status, fixity) = send(&app, "GET", "/v1/sips/alpha/fixity", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fixity["matched"], true);

        let (status, _) = send(&app, "GET", "/v1/sips/never-ingested/fixity", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn insufficient_storage_is_507() {
        let config = IngestConfig {
            min_free_bytes: u64::MAX,
            ..IngestConfig::default()
        };
        let coordinator = BatchCoordinator::from_config(config).unwrap();
        let app = router::build_router(coordinator.clone());
        let tree = sip_tree();
        let id = coordinator.create_batch_from_dir(tree.path()).unwrap();

        let (status, _) = send(&app, "POST", &format!("/v1/batches/{id}/start"), None).await;
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
    }
}
