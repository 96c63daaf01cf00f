pub mod controller_service;
pub mod server;
pub mod worker_service;

pub use server::GrpcServer;

use crate::scheduler::{MAX_IMAGE_DIMENSION, MAX_TILE_BYTES};

/// Decode limit for controller RPCs: the largest tile payload plus room
/// for the rest of the `JobResult` envelope.
pub const MAX_MESSAGE_BYTES: usize = MAX_TILE_BYTES + 64 * 1024;

/// Decode limit for clients fetching a finished PNG.
pub const MAX_IMAGE_MESSAGE_BYTES: usize =
    MAX_IMAGE_DIMENSION as usize * MAX_IMAGE_DIMENSION as usize * 4 + 64 * 1024;
