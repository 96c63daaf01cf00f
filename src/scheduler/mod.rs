pub mod dispatcher;
pub mod queue;
pub mod session;
pub mod tile;

pub use dispatcher::{CompletionOutcome, Scheduler, StartedRender};
pub use queue::JobQueue;
pub use session::{FinishedImage, Progress, RenderSession, SessionStatus, TileCompletion};
pub use tile::{
    partition, ImageDetails, RenderParams, Tile, TileRect, MAX_IMAGE_DIMENSION, MAX_TILE_BYTES,
};
