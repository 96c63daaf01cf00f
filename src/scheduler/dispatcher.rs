use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{FarmError, Result};
use crate::proto;
use crate::registry::{LinkState, WorkerRecord, WorkerRegistry};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::session::{Progress, RenderSession, TileCompletion};
use crate::scheduler::tile::{partition, RenderParams, Tile};
use crate::storage::{output_name, OutputStore};

/// Summary returned when a render has been kicked off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRender {
    pub output_name: String,
    pub total_tiles: u32,
    pub dispatched: u32,
}

/// What the controller did with a `JobComplete` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Counted; the next queued tile (if any) went back to the same worker.
    Progressed { next_tile: Option<u64> },
    /// Final tile: the session is COMPLETE and its image was saved here.
    Finished { path: PathBuf },
    /// Tile had already been counted.
    Duplicate,
}

/// Everything the completion path mutates, behind a single lock.
#[derive(Debug, Default)]
struct SchedulerState {
    session: Option<RenderSession>,
    queue: JobQueue,
    next_tile_id: u64,
}

/// Partitions renders into tiles and keeps the worker fleet busy.
///
/// Session start, completion handling and progress reads all go through
/// the same mutex, so the terminal transition and the final save happen
/// exactly once no matter how completions interleave.
pub struct Scheduler {
    registry: Arc<WorkerRegistry>,
    store: OutputStore,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(registry: Arc<WorkerRegistry>, store: OutputStore) -> Self {
        Self {
            registry,
            store,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// Start a new render, replacing whatever session came before.
    ///
    /// Fails with [`FarmError::NoWorkersAvailable`] and leaves all state
    /// untouched when nobody is registered.
    pub async fn start_render(&self, params: RenderParams) -> Result<StartedRender> {
        let image = params.validate()?;

        let workers = self.registry.records();
        if workers.is_empty() {
            tracing::warn!("No workers available to start render");
            return Err(FarmError::NoWorkersAvailable);
        }

        let mut state = self.state.lock().await;

        let first_id = state.next_tile_id;
        let tiles: Vec<Tile> = partition(&image, params.slice_count)
            .into_iter()
            .enumerate()
            .map(|(i, rect)| Tile {
                id: first_id + i as u64,
                rect,
                samples_per_pixel: params.samples_per_pixel,
                max_depth: params.max_depth,
                image,
            })
            .collect();
        state.next_tile_id = first_id + tiles.len() as u64;

        let started_at = Utc::now();
        let name = output_name(started_at);
        let session = RenderSession::start(image, &tiles, name.clone(), started_at);
        let total_tiles = session.total_tiles();

        if let Some(previous) = state.session.replace(session) {
            tracing::info!(
                output = previous.output_name(),
                status = %previous.status(),
                "Discarding previous render session"
            );
        }
        state.queue = tiles.into_iter().collect();

        tracing::info!(
            output = %name,
            tiles = total_tiles,
            width = image.width,
            height = image.height,
            workers = workers.len(),
            "Starting render"
        );

        let prepare = proto::PrepareRequest {
            scene_data: params.scene_data,
            image: Some(image.into()),
        };

        let mut dispatched = 0;
        for worker in workers {
            Self::prepare_worker(&worker, prepare.clone()).await;
            if worker.link.state() == LinkState::Disconnected {
                tracing::warn!(worker_id = %worker.descriptor.id, "Worker link is down, skipping it");
                continue;
            }
            dispatched += Self::initial_dispatch(&mut state, &worker).await;
        }

        tracing::info!(dispatched, queued = state.queue.len(), "Initial dispatch finished");

        Ok(StartedRender {
            output_name: name,
            total_tiles,
            dispatched,
        })
    }

    /// Push session-wide scene data so tiles can be sent without it.
    ///
    /// Optional for workers: a failure is logged and only a lost link keeps
    /// the worker out of the initial dispatch.
    async fn prepare_worker(worker: &WorkerRecord, request: proto::PrepareRequest) {
        let mut client = worker.client.clone();
        if let Err(status) = client.prepare_render(request).await {
            tracing::warn!(
                worker_id = %worker.descriptor.id,
                error = %status,
                "Failed to prepare worker for render"
            );
            worker.link.observe(&status);
        }
    }

    /// Fill one worker up to its declared capacity.
    async fn initial_dispatch(state: &mut SchedulerState, worker: &WorkerRecord) -> u32 {
        let mut sent = 0;
        while sent < worker.descriptor.capacity {
            let Some(tile) = state.queue.pop_next() else {
                break;
            };
            if !Self::dispatch(state, worker, tile).await {
                break;
            }
            sent += 1;
        }
        tracing::debug!(worker_id = %worker.descriptor.id, sent, "Initial tiles dispatched");
        sent
    }

    /// Send an already-claimed tile to a worker.
    ///
    /// The tile is gone from the queue either way; on failure it is counted
    /// as stranded.
    async fn dispatch(state: &mut SchedulerState, worker: &WorkerRecord, tile: Tile) -> bool {
        let mut client = worker.client.clone();
        match client.new_job(tile.to_request()).await {
            Ok(_) => true,
            Err(status) => {
                tracing::warn!(
                    tile_id = tile.id,
                    worker_id = %worker.descriptor.id,
                    error = %status,
                    "Failed to send tile to worker"
                );
                worker.link.observe(&status);
                if let Some(session) = state.session.as_mut() {
                    session.note_stranded();
                }
                false
            }
        }
    }

    /// Handle a worker's report that it finished a tile.
    ///
    /// Composites the pixels, bumps the counter, and either hands the same
    /// worker its next tile or, on the last tile, marks the session COMPLETE
    /// and saves the image. A failed save is returned as an error but the
    /// session stays COMPLETE.
    pub async fn job_complete(
        &self,
        tile_id: u64,
        pixels: &[u8],
        worker_id: &str,
    ) -> Result<CompletionOutcome> {
        let finished = {
            let mut state = self.state.lock().await;
            let session = state
                .session
                .as_mut()
                .ok_or_else(|| FarmError::NotFound("no render has been started".to_string()))?;

            match session.complete_tile(tile_id, pixels)? {
                TileCompletion::Duplicate => {
                    tracing::debug!(tile_id, worker_id, "Duplicate tile completion ignored");
                    return Ok(CompletionOutcome::Duplicate);
                }
                TileCompletion::Finished => {
                    tracing::info!(
                        tiles = session.total_tiles(),
                        elapsed_ms = (Utc::now() - session.started_at()).num_milliseconds(),
                        "All tiles completed"
                    );
                    session.take_output()
                }
                TileCompletion::Progressed => {
                    let next_tile = self.redistribute(&mut state, worker_id).await;
                    return Ok(CompletionOutcome::Progressed { next_tile });
                }
            }
        };

        let name = finished.name.clone();
        match self.store.persist(finished).await {
            Ok(path) => Ok(CompletionOutcome::Finished { path }),
            Err(e) => {
                tracing::error!(output = %name, error = %e, "Failed to save render output");
                Err(FarmError::Persist {
                    name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Give the worker that just freed a slot the next queued tile.
    async fn redistribute(&self, state: &mut SchedulerState, worker_id: &str) -> Option<u64> {
        let Some(worker) = self.registry.get(worker_id) else {
            tracing::warn!(
                worker_id,
                queued = state.queue.len(),
                "Completing worker is not registered, leaving next tile queued"
            );
            return None;
        };

        let tile = state.queue.pop_next()?;
        let tile_id = tile.id;
        Self::dispatch(state, &worker, tile).await.then_some(tile_id)
    }

    /// Consistent total/completed snapshot; idle before the first render.
    pub async fn progress(&self) -> Progress {
        let state = self.state.lock().await;
        match state.session.as_ref() {
            Some(session) => session.progress(state.queue.len()),
            None => Progress::idle(),
        }
    }

    /// Tiles still waiting for a worker.
    pub async fn queued_tiles(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Mark the active session FAILED if it can no longer finish because
    /// every worker is gone. Returns true if the status changed.
    pub async fn fail_if_stranded(&self) -> bool {
        if self.registry.live_count().await > 0 {
            return false;
        }
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        if !session.mark_failed() {
            return false;
        }
        tracing::warn!(
            completed = session.completed_tiles(),
            total = session.total_tiles(),
            "Last worker left mid-render, session failed"
        );
        true
    }
}
