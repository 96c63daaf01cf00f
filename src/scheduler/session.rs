use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FarmError, Result};
use crate::proto;
use crate::scheduler::tile::{ImageDetails, Tile, TileRect, BYTES_PER_PIXEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Ready,
    Started,
    Complete,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Started => write!(f, "started"),
            SessionStatus::Complete => write!(f, "complete"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl From<SessionStatus> for proto::RenderStatus {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Ready => proto::RenderStatus::Ready,
            SessionStatus::Started => proto::RenderStatus::Started,
            SessionStatus::Complete => proto::RenderStatus::Complete,
            SessionStatus::Failed => proto::RenderStatus::Failed,
        }
    }
}

/// Consistent snapshot of a session's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: u32,
    pub completed: u32,
    pub status: SessionStatus,
    pub queued: u32,
    pub stranded: u32,
}

impl Progress {
    /// Reported before any render has been started.
    pub fn idle() -> Self {
        Self {
            total: 0,
            completed: 0,
            status: SessionStatus::Ready,
            queued: 0,
            stranded: 0,
        }
    }
}

impl From<Progress> for proto::Progress {
    fn from(p: Progress) -> Self {
        Self {
            total_jobs: p.total,
            completed_jobs: p.completed,
            status: proto::RenderStatus::from(p.status) as i32,
            queued_jobs: p.queued,
            stranded_jobs: p.stranded,
        }
    }
}

/// What a single tile completion did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCompletion {
    /// Counted; more tiles are outstanding.
    Progressed,
    /// Counted, and it was the last one. The session is now COMPLETE.
    Finished,
    /// Tile was already counted; nothing changed.
    Duplicate,
}

/// The composited output of a finished session, ready to be persisted.
#[derive(Debug)]
pub struct FinishedImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// State of one render pass, from partition to final image.
#[derive(Debug)]
pub struct RenderSession {
    status: SessionStatus,
    total_tiles: u32,
    completed_tiles: u32,
    stranded_tiles: u32,
    image: ImageDetails,
    output: Vec<u8>,
    layout: HashMap<u64, TileRect>,
    done: HashSet<u64>,
    started_at: DateTime<Utc>,
    output_name: String,
}

impl RenderSession {
    /// Build a STARTED session over the given tiles with a blank output buffer.
    pub fn start(
        image: ImageDetails,
        tiles: &[Tile],
        output_name: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: SessionStatus::Started,
            total_tiles: tiles.len() as u32,
            completed_tiles: 0,
            stranded_tiles: 0,
            image,
            output: vec![0; image.buffer_len()],
            layout: tiles.iter().map(|t| (t.id, t.rect)).collect(),
            done: HashSet::with_capacity(tiles.len()),
            started_at,
            output_name,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn total_tiles(&self) -> u32 {
        self.total_tiles
    }

    pub fn completed_tiles(&self) -> u32 {
        self.completed_tiles
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn progress(&self, queued: usize) -> Progress {
        Progress {
            total: self.total_tiles,
            completed: self.completed_tiles,
            status: self.status,
            queued: queued as u32,
            stranded: self.stranded_tiles,
        }
    }

    /// Record a finished tile: composite its pixels and bump the counter.
    ///
    /// Fails without touching any state when the tile is not part of this
    /// session or the payload does not match the tile's size.
    pub fn complete_tile(&mut self, tile_id: u64, pixels: &[u8]) -> Result<TileCompletion> {
        let rect = *self.layout.get(&tile_id).ok_or_else(|| {
            FarmError::NotFound(format!("tile {} is not part of the active render", tile_id))
        })?;

        if self.done.contains(&tile_id) {
            return Ok(TileCompletion::Duplicate);
        }

        if pixels.len() != rect.pixel_len() {
            return Err(FarmError::InvalidArgument(format!(
                "tile {} expected {} bytes of pixel data, got {}",
                tile_id,
                rect.pixel_len(),
                pixels.len()
            )));
        }

        self.composite(&rect, pixels);
        self.done.insert(tile_id);
        self.completed_tiles += 1;

        if self.completed_tiles == self.total_tiles {
            self.status = SessionStatus::Complete;
            Ok(TileCompletion::Finished)
        } else {
            Ok(TileCompletion::Progressed)
        }
    }

    /// Copy tile rows straight into the output buffer, overwriting what was there.
    fn composite(&mut self, rect: &TileRect, pixels: &[u8]) {
        let stride = self.image.width as usize * BYTES_PER_PIXEL;
        let row_len = rect.width as usize * BYTES_PER_PIXEL;
        for (row, src) in pixels.chunks_exact(row_len).enumerate() {
            let start = (rect.y as usize + row) * stride + rect.x as usize * BYTES_PER_PIXEL;
            self.output[start..start + row_len].copy_from_slice(src);
        }
    }

    /// Hand the composited buffer over for persistence.
    pub fn take_output(&mut self) -> FinishedImage {
        FinishedImage {
            name: self.output_name.clone(),
            width: self.image.width,
            height: self.image.height,
            pixels: std::mem::take(&mut self.output),
        }
    }

    /// A tile left the queue but never reached a worker.
    pub fn note_stranded(&mut self) {
        self.stranded_tiles += 1;
    }

    /// Mark an unfinishable session FAILED. Returns true if the status changed.
    pub fn mark_failed(&mut self) -> bool {
        if self.status == SessionStatus::Started {
            self.status = SessionStatus::Failed;
            true
        } else {
            false
        }
    }
}
