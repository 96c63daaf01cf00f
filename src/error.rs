use thiserror::Error;
use tonic::{Code, Status};

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("No workers available to start render")]
    NoWorkersAvailable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker at {addr} is unreachable: {source}")]
    WorkerUnreachable {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("Handshake with worker at {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("Failed to persist render output {name}: {reason}")]
    Persist { name: String, reason: String },

    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FarmError {
    /// gRPC code reported to the caller for this error.
    pub fn code(&self) -> Code {
        match self {
            FarmError::NoWorkersAvailable => Code::FailedPrecondition,
            FarmError::InvalidArgument(_) => Code::InvalidArgument,
            FarmError::NotFound(_) => Code::NotFound,
            FarmError::WorkerUnreachable { .. } | FarmError::Handshake { .. } => Code::Unavailable,
            FarmError::Grpc(status) => status.code(),
            FarmError::Transport(_) => Code::Unavailable,
            FarmError::Persist { .. }
            | FarmError::Io(_)
            | FarmError::Image(_)
            | FarmError::Internal(_) => Code::Internal,
        }
    }
}

impl From<FarmError> for Status {
    fn from(err: FarmError) -> Self {
        match err {
            FarmError::Grpc(status) => status,
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FarmError>;
