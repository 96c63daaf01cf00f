use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::proto::controller_server::Controller;
use crate::proto::{
    Ack, Empty, ImageData, ImageList, ImageRequest, JobResult, Progress, RenderRequest, WorkerInfo,
    WorkerList,
};
use crate::scheduler::{CompletionOutcome, RenderParams, Scheduler};

/// gRPC surface of the controller: worker membership, render control and
/// output retrieval.
pub struct ControllerService {
    scheduler: Arc<Scheduler>,
}

impl ControllerService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn register_worker(&self, request: Request<WorkerInfo>) -> Result<Response<Ack>, Status> {
        let info = request.into_inner();
        self.scheduler.registry().register(info).await?;
        Ok(Response::new(Ack {}))
    }

    async fn get_workers(&self, _request: Request<Empty>) -> Result<Response<WorkerList>, Status> {
        let workers = self
            .scheduler
            .registry()
            .list()
            .iter()
            .map(|w| w.to_proto())
            .collect();
        Ok(Response::new(WorkerList { workers }))
    }

    async fn start_render(&self, request: Request<RenderRequest>) -> Result<Response<Ack>, Status> {
        let params = RenderParams::from(request.into_inner());
        let started = self.scheduler.start_render(params).await?;
        tracing::info!(
            output = %started.output_name,
            tiles = started.total_tiles,
            dispatched = started.dispatched,
            "Render started"
        );
        Ok(Response::new(Ack {}))
    }

    async fn job_complete(&self, request: Request<JobResult>) -> Result<Response<Ack>, Status> {
        let result = request.into_inner();
        if result.worker_id.is_empty() {
            return Err(Status::invalid_argument("Worker ID cannot be empty"));
        }

        let outcome = self
            .scheduler
            .job_complete(result.job_id, &result.image_data, &result.worker_id)
            .await?;

        tracing::trace!(
            tile_id = result.job_id,
            worker_id = %result.worker_id,
            time_taken_ms = result.time_taken_ms,
            outcome = ?outcome,
            "Tile completion handled"
        );
        if let CompletionOutcome::Finished { path } = outcome {
            tracing::info!(path = %path.display(), "Render complete");
        }
        Ok(Response::new(Ack {}))
    }

    async fn get_progress(&self, _request: Request<Empty>) -> Result<Response<Progress>, Status> {
        Ok(Response::new(self.scheduler.progress().await.into()))
    }

    async fn list_rendered_images(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ImageList>, Status> {
        let images = self.scheduler.store().list().await?;
        Ok(Response::new(ImageList { images }))
    }

    async fn get_rendered_image(
        &self,
        request: Request<ImageRequest>,
    ) -> Result<Response<ImageData>, Status> {
        let req = request.into_inner();
        let (name, data) = self.scheduler.store().read(&req.name).await?;
        Ok(Response::new(ImageData { name, data }))
    }
}
