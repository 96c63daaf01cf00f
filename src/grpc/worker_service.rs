use std::sync::Arc;

use tokio::sync::RwLock;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use crate::proto::controller_client::ControllerClient;
use crate::proto::worker_server::Worker;
use crate::proto::{Ack, Empty, JobRequest, JobResult, PrepareRequest};
use crate::scheduler::tile::{ImageDetails, Tile};
use crate::worker::executor::TileExecutor;
use crate::worker::renderer::SceneContext;

/// gRPC service each worker exposes to the controller.
///
/// `NewJob` only acknowledges receipt; the tile renders in the background
/// and the pixels go back through the controller's `JobComplete`.
pub struct WorkerService {
    worker_id: String,
    executor: TileExecutor,
    scene: Arc<RwLock<Option<Arc<SceneContext>>>>,
    controller: ControllerClient<Channel>,
}

impl WorkerService {
    pub fn new(worker_id: String, executor: TileExecutor, controller: ControllerClient<Channel>) -> Self {
        Self {
            worker_id,
            executor,
            scene: Arc::new(RwLock::new(None)),
            controller,
        }
    }

    /// Scene for a tile: the prepared one if it matches the tile's image,
    /// otherwise a blank scene of the right size.
    async fn scene_for(&self, image: ImageDetails) -> Arc<SceneContext> {
        match self.scene.read().await.as_ref() {
            Some(scene) if scene.image == image => scene.clone(),
            _ => Arc::new(SceneContext::blank(image)),
        }
    }
}

#[tonic::async_trait]
impl Worker for WorkerService {
    async fn ping(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        Ok(Response::new(Ack {}))
    }

    async fn prepare_render(
        &self,
        request: Request<PrepareRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let image = req
            .image
            .as_ref()
            .map(ImageDetails::from)
            .ok_or_else(|| Status::invalid_argument("Image details are required"))?;

        tracing::info!(
            scene_bytes = req.scene_data.len(),
            width = image.width,
            height = image.height,
            "Preparing for render"
        );

        *self.scene.write().await = Some(Arc::new(SceneContext {
            scene_data: req.scene_data,
            image,
        }));
        Ok(Response::new(Ack {}))
    }

    async fn new_job(&self, request: Request<JobRequest>) -> Result<Response<Ack>, Status> {
        let tile = Tile::from_request(request.get_ref())?;
        tracing::debug!(tile_id = tile.id, "Received job");

        let scene = self.scene_for(tile.image).await;
        let executor = self.executor.clone();
        let mut controller = self.controller.clone();
        let worker_id = self.worker_id.clone();

        tokio::spawn(async move {
            let tile_id = tile.id;
            let result = match executor.execute(tile, scene).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(tile_id, error = %e, "Tile render failed");
                    return;
                }
            };

            let report = JobResult {
                job_id: result.tile_id,
                image_data: result.pixels,
                worker_id,
                time_taken_ms: result.elapsed.as_millis() as u64,
            };
            if let Err(status) = controller.job_complete(report).await {
                tracing::warn!(tile_id, error = %status, "Failed to send completed tile to controller");
            }
        });

        Ok(Response::new(Ack {}))
    }
}
