// renderer.rs - The opaque Block Renderer boundary (SPEC_FULL.md §6).
//
// Everything on the other side of this trait — ray-triangle intersection,
// BVH construction, material shading, mesh/texture parsing — is out of
// scope. The scheduler only ever sees bytes in, bytes out.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One worker's capability to render rectangular blocks of a scene.
///
/// Implementors wrap whatever raytracing kernel is available (GPU, CPU,
/// remote); this crate never looks inside one. All methods are exclusive:
/// the scheduler never calls `render_block` while a previous call on the
/// same instance is unresolved, and never calls any method after
/// `terminate`.
#[async_trait]
pub trait BlockRenderer: Send {
    /// Prepare this worker to render blocks at the given viewport
    /// dimensions with the given opaque parameter bag. Must be awaited
    /// before `render_block`. Safe to call repeatedly; the last call wins.
    async fn set_scene(&mut self, width: u32, height: u32, params: &Value) -> Result<()>;

    /// Produce `3 * w * h` bytes in RGB order, row-major, top-left origin.
    /// `aa` is the anti-alias sampling level (one of
    /// [`crate::types::VALID_ANTI_ALIAS_LEVELS`]).
    async fn render_block(&mut self, x: u32, y: u32, w: u32, h: u32, aa: u8) -> Result<Vec<u8>>;

    /// Release this worker. Subsequent calls have no obligation to
    /// complete; the pool never makes any after this.
    async fn terminate(self: Box<Self>) {}

    /// Opaque mesh upload, routed through the Job Serializer by
    /// [`crate::controller::RaytracerController`] so it never races a
    /// render. Out of scope to interpret; default no-op.
    async fn store_mesh(&mut self, _id: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Opaque texture upload; see `store_mesh`.
    async fn store_texture(&mut self, _id: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Opaque acceleration-structure rebuild; see `store_mesh`.
    async fn rebuild_acceleration_structure(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Constructs fresh [`BlockRenderer`] instances on demand. The Worker Pool
/// holds one of these and never constructs workers any other way, so test
/// doubles and production collaborators plug in identically.
pub trait BlockRendererFactory: Send + Sync {
    fn create(&self) -> Box<dyn BlockRenderer>;
}

impl<F> BlockRendererFactory for F
where
    F: Fn() -> Box<dyn BlockRenderer> + Send + Sync,
{
    fn create(&self) -> Box<dyn BlockRenderer> {
        (self)()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// A renderer that paints every block a fixed solid color. Useful for
    /// asserting composite correctness without any real raytracing.
    pub struct SolidColorRenderer {
        pub color: [u8; 3],
        pub scenes_set: Arc<AtomicU32>,
        pub blocks_rendered: Arc<AtomicU32>,
    }

    impl SolidColorRenderer {
        pub fn new(color: [u8; 3]) -> Self {
            Self {
                color,
                scenes_set: Arc::new(AtomicU32::new(0)),
                blocks_rendered: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl BlockRenderer for SolidColorRenderer {
        async fn set_scene(&mut self, _width: u32, _height: u32, _params: &Value) -> Result<()> {
            self.scenes_set.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }

        async fn render_block(
            &mut self,
            _x: u32,
            _y: u32,
            w: u32,
            h: u32,
            _aa: u8,
        ) -> Result<Vec<u8>> {
            self.blocks_rendered.fetch_add(1, Ordering::AcqRel);
            let mut out = Vec::with_capacity(3 * w as usize * h as usize);
            for _ in 0..(w as usize * h as usize) {
                out.extend_from_slice(&self.color);
            }
            Ok(out)
        }
    }

    /// A factory that always builds `SolidColorRenderer`s of one color,
    /// for scheduler-level tests that don't care about per-worker state.
    pub fn solid_color_factory(color: [u8; 3]) -> impl BlockRendererFactory {
        move || -> Box<dyn BlockRenderer> { Box::new(SolidColorRenderer::new(color)) }
    }
}
