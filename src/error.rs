// error.rs - Error taxonomy for the scheduler (see SPEC_FULL.md §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Kind 1: rejected synchronously at `start()`, before any worker or
    /// event is touched.
    #[error("invalid render config: {reason}")]
    InvalidConfig { reason: String },

    /// Kind 2: a worker's render future errored. The block stays in-flight;
    /// no retry is attempted (see SPEC_FULL.md §4.1 Failure semantics).
    #[error("worker render failed: {0}")]
    WorkerFailed(String),

    /// Raised by the opaque `BlockRenderer` collaborator itself (scene
    /// upload, mesh/texture store, acceleration rebuild).
    #[error("renderer collaborator error: {0}")]
    Renderer(String),

    /// The Job Serializer's channel has been dropped; no further jobs can
    /// be submitted.
    #[error("job serializer is closed")]
    SerializerClosed,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
