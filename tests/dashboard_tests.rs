
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use test_harness::{render_params, FakeWorker, TestController};
use tilefarm::dashboard::{router, DashboardState};

fn app(controller: &TestController) -> Router {
    router(DashboardState {
        scheduler: controller.scheduler.clone(),
    })
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_progress_idle_before_first_render() {
    let controller = TestController::start().await;
    let (status, json) = get_json(app(&controller), "/api/progress").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 0);
    assert_eq!(json["completed"], 0);
    assert_eq!(json["status"], "Ready");
}

#[tokio::test]
async fn test_workers_endpoint_lists_fleet() {
    let controller = TestController::start().await;
    let b = FakeWorker::start("b", 2).await;
    let a = FakeWorker::start("a", 1).await;
    controller.register(&b).await.unwrap();
    controller.register(&a).await.unwrap();

    let (status, json) = get_json(app(&controller), "/api/workers").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["live"], 2);
    let workers = json["workers"].as_array().unwrap();
    assert_eq!(workers[0]["id"], "a");
    assert_eq!(workers[1]["id"], "b");
    assert_eq!(workers[1]["capacity"], 2);
}

#[tokio::test]
async fn test_progress_tracks_render() {
    let controller = TestController::start().await;
    let worker = FakeWorker::start("w1", 2).await;
    controller.register(&worker).await.unwrap();
    controller
        .scheduler
        .start_render(render_params(32, 5))
        .await
        .unwrap();

    let (_, json) = get_json(app(&controller), "/api/progress").await;
    assert_eq!(json["total"], 5);
    assert_eq!(json["queued"], 3);
    assert_eq!(json["status"], "Started");
}

#[tokio::test]
async fn test_renders_endpoints() {
    let controller = TestController::start().await;

    let (status, json) = get_json(app(&controller), "/api/renders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["images"].as_array().unwrap().len(), 0);

    let (status, _) = get(app(&controller), "/api/renders/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(app(&controller), "/api/renders/bad..name").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let name = "render-20260101-000000-000.png";
    std::fs::write(controller.output_dir.path().join(name), b"png bytes").unwrap();

    let response = app(&controller)
        .oneshot(
            Request::builder()
                .uri("/api/renders/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"png bytes");
}
