use std::collections::VecDeque;

use crate::scheduler::tile::Tile;

/// Tiles of the active session that have not been dispatched yet.
///
/// Filled once when a render starts and drained in FIFO order afterwards;
/// there is no way to put a tile back.
#[derive(Debug, Default)]
pub struct JobQueue {
    tiles: VecDeque<Tile>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next tile, removing it from the queue.
    pub fn pop_next(&mut self) -> Option<Tile> {
        self.tiles.pop_front()
    }

    /// Returns the current number of queued tiles
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns true if nothing is left to dispatch
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl FromIterator<Tile> for JobQueue {
    fn from_iter<I: IntoIterator<Item = Tile>>(iter: I) -> Self {
        Self {
            tiles: iter.into_iter().collect(),
        }
    }
}
