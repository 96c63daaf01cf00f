use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::FarmError;
use crate::registry::WorkerDescriptor;
use crate::scheduler::{Progress, Scheduler};

#[derive(Clone)]
pub struct DashboardState {
    pub scheduler: Arc<Scheduler>,
}

#[derive(Serialize)]
struct WorkersResponse {
    live: usize,
    workers: Vec<WorkerDescriptor>,
}

#[derive(Serialize)]
struct RendersResponse {
    images: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/workers", get(workers_handler))
        .route("/api/progress", get(progress_handler))
        .route("/api/renders", get(renders_handler))
        .route("/api/renders/{name}", get(render_image_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

fn error_response(err: FarmError) -> Response {
    let status = match &err {
        FarmError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        FarmError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

async fn workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let registry = state.scheduler.registry();
    Json(WorkersResponse {
        live: registry.live_count().await,
        workers: registry.list(),
    })
}

async fn progress_handler(State(state): State<DashboardState>) -> Json<Progress> {
    Json(state.scheduler.progress().await)
}

async fn renders_handler(State(state): State<DashboardState>) -> Response {
    match state.scheduler.store().list().await {
        Ok(images) => Json(RendersResponse { images }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn render_image_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Response {
    match state.scheduler.store().read(&name).await {
        Ok((_, bytes)) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => error_response(e),
    }
}
