//! A parallel block-based render scheduler that sits between an
//! interactive raytracer UI and a pool of opaque per-worker raytracer
//! instances (see `SPEC_FULL.md` for the full design).
//!
//! It partitions a requested viewport into rectangular blocks, distributes
//! them across a dynamically-resized pool of [`BlockRenderer`] workers,
//! composites their pixel results into an off-screen [`FrameBuffer`], and
//! emits progress events — while correctly handling worker replacement,
//! mid-render reconfiguration, and serialized job submission.
//!
//! The crate is organized leaves-first, mirroring the cooperating
//! components of the design:
//!
//! - [`renderer`] — the opaque `BlockRenderer` boundary to a worker.
//! - [`worker_pool`] — owns the mutable set of workers.
//! - [`frame_buffer`] — the RGBA composite and its de-band post-process.
//! - [`events`] — the outbound event taxonomy.
//! - [`job_serializer`] — the single-slot FIFO job queue.
//! - [`scheduler`] — the [`BlockScheduler`] tying the above together.
//! - [`controller`] — the [`RaytracerController`] facade the UI talks to.

pub mod controller;
pub mod error;
pub mod events;
pub mod frame_buffer;
pub mod job_serializer;
pub mod renderer;
pub mod scheduler;
pub mod types;
pub mod worker_pool;

pub use controller::RaytracerController;
pub use error::{Result, SchedulerError};
pub use events::SchedulerEvent;
pub use frame_buffer::FrameBuffer;
pub use job_serializer::JobSerializer;
pub use renderer::{BlockRenderer, BlockRendererFactory};
pub use scheduler::{BlockScheduler, FrameSnapshot};
pub use types::{Block, BlockId, RenderConfig};

#[cfg(not(target_arch = "wasm32"))]
pub use scheduler::default_pool_size;
