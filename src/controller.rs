// controller.rs - The UI-facing facade (SPEC_FULL.md §4.6).
//
// Every call that mutates renderer state is routed through a JobSerializer
// so the opaque kernel never observes two such calls in flight at once.
// Read-only queries bypass it: they have no side effects to serialize.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::SchedulerEvent;
use crate::job_serializer::JobSerializer;
use crate::renderer::BlockRendererFactory;
use crate::scheduler::{BlockScheduler, FrameSnapshot};
use crate::types::RenderConfig;

/// The only type the UI talks to. Owns one [`BlockScheduler`] and one
/// [`JobSerializer`]; every renderer-mutating method is
/// `self.serializer.submit(move || scheduler.clone().op(..))`.
pub struct RaytracerController {
    scheduler: Arc<BlockScheduler>,
    serializer: JobSerializer,
}

impl RaytracerController {
    pub fn new(factory: Arc<dyn BlockRendererFactory>) -> Self {
        Self {
            scheduler: BlockScheduler::new(factory),
            serializer: JobSerializer::new(),
        }
    }

    /// Begin a new frame.
    pub async fn start(&self, cfg: RenderConfig) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        self.serializer.submit(move || async move { scheduler.start(cfg).await }).await?
    }

    /// Grow or shrink the worker pool.
    pub async fn resize_pool(&self, n: usize) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        self.serializer.submit(move || async move { scheduler.resize_pool(n).await }).await?
    }

    /// Push a fresh opaque parameter bag to every idle worker, without
    /// restarting the current frame.
    pub async fn update_scene(&self, params: Value) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        self.serializer.submit(move || async move { scheduler.update_scene(params).await }).await?
    }

    /// Opaque mesh upload, routed through the serializer (SPEC_FULL.md
    /// §4.5).
    pub async fn store_mesh(&self, id: String, bytes: Vec<u8>) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        self.serializer
            .submit(move || async move { scheduler.store_mesh(&id, &bytes).await })
            .await?
    }

    /// Opaque texture upload; see [`Self::store_mesh`].
    pub async fn store_texture(&self, id: String, bytes: Vec<u8>) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        self.serializer
            .submit(move || async move { scheduler.store_texture(&id, &bytes).await })
            .await?
    }

    /// Opaque acceleration-structure rebuild; see [`Self::store_mesh`].
    pub async fn rebuild_acceleration_structure(&self) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        self.serializer
            .submit(move || async move { scheduler.rebuild_acceleration_structure().await })
            .await?
    }

    /// A read-only snapshot of the current frame buffer. Bypasses the
    /// serializer: it has no side effects on the renderer.
    pub async fn target(&self) -> Option<FrameSnapshot> {
        self.scheduler.target().await
    }

    /// Subscribe to scheduler events. Bypasses the serializer for the same
    /// reason as [`Self::target`].
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.scheduler.subscribe()
    }

    /// Current worker pool size.
    pub async fn pool_size(&self) -> usize {
        self.scheduler.pool_size().await
    }
}
