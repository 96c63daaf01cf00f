use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{FarmError, Result};
use crate::scheduler::Tile;
use crate::worker::renderer::{SceneContext, TileRenderer};

/// Result of rendering one tile
#[derive(Debug)]
pub struct ExecutionResult {
    pub tile_id: u64,
    pub pixels: Vec<u8>,
    pub elapsed: Duration,
}

/// Runs tiles through a renderer on the blocking thread pool.
#[derive(Clone)]
pub struct TileExecutor {
    renderer: Arc<dyn TileRenderer>,
}

impl TileExecutor {
    pub fn new(renderer: Arc<dyn TileRenderer>) -> Self {
        Self { renderer }
    }

    /// Render a tile, checking the renderer produced a full tile of pixels.
    pub async fn execute(&self, tile: Tile, scene: Arc<SceneContext>) -> Result<ExecutionResult> {
        tracing::debug!(tile_id = tile.id, y = tile.rect.y, height = tile.rect.height, "Rendering tile");

        let renderer = self.renderer.clone();
        let expected = tile.rect.pixel_len();
        let tile_id = tile.id;

        let started = Instant::now();
        let pixels = tokio::task::spawn_blocking(move || renderer.render(&tile, &scene))
            .await
            .map_err(|e| FarmError::Internal(format!("render task for tile {} failed: {}", tile_id, e)))?;
        let elapsed = started.elapsed();

        if pixels.len() != expected {
            tracing::error!(tile_id, expected, got = pixels.len(), "Renderer returned a short tile");
            return Err(FarmError::Internal(format!(
                "renderer produced {} bytes for tile {}, expected {}",
                pixels.len(),
                tile_id,
                expected
            )));
        }

        tracing::debug!(tile_id, elapsed_ms = elapsed.as_millis() as u64, "Tile rendered");
        Ok(ExecutionResult {
            tile_id,
            pixels,
            elapsed,
        })
    }
}
