// worker_pool.rs - Owns the mutable set of Block Renderer instances
// (SPEC_FULL.md §4.2).
//
// A slot's renderer is physically absent (`renderer: None`) for the
// duration of a dispatch: the scheduler takes ownership of the boxed
// renderer, hands it to a spawned task that awaits `render_block`, and the
// task hands it back on completion. This is what lets many slots render in
// parallel while the scheduler's own bookkeeping stays single-threaded
// (SPEC_FULL.md §5) — no per-slot lock is needed, ownership itself is the
// mutual exclusion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::renderer::{BlockRenderer, BlockRendererFactory};
use crate::types::{Block, BlockId};

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity for a [`WorkerSlot`], independent of its position in the
/// pool's `Vec` (which shifts under grow/shrink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u64);

impl SlotId {
    fn next() -> Self {
        Self(NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// `FRESH -> INITIALIZING -> IDLE <-> BUSY -> DISPOSED` (SPEC_FULL.md
/// §4.1). `FRESH`/`INITIALIZING` are transient and collapse into the await
/// inside [`WorkerPool::grow_to`]; by the time a slot is observable it is
/// always `Idle` or `Busy`. `Disposed` slots simply aren't in the `Vec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Busy,
}

pub struct WorkerSlot {
    pub id: SlotId,
    /// `None` exactly while a dispatch is in flight for this slot.
    renderer: Option<Box<dyn BlockRenderer>>,
    pub in_flight: Option<(BlockId, Block)>,
    /// Handle to the spawned `render_block -> on_result` task, so a
    /// reclaim or recycle can abort it outright rather than waiting for a
    /// stale result to arrive and be discarded (SPEC_FULL.md §5
    /// Cancellation: "aborting their JoinHandles").
    join_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerSlot {
    pub fn state(&self) -> SlotState {
        if self.in_flight.is_some() {
            SlotState::Busy
        } else {
            SlotState::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.renderer.is_some()
    }
}

/// Owns worker instances with factory discipline: every renderer in the
/// pool was built by the same `factory`. Iteration order is insertion
/// order; shrink always removes from the tail, which is what makes reclaim
/// predictable (SPEC_FULL.md §4.2 Determinism).
pub struct WorkerPool {
    factory: Arc<dyn BlockRendererFactory>,
    slots: Vec<WorkerSlot>,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn BlockRendererFactory>) -> Self {
        Self {
            factory,
            slots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    /// Grow the pool to `n` workers, constructing `n - len` new ones and
    /// initializing each against `(width, height, params)` before it is
    /// considered `Idle`.
    pub async fn grow_to(&mut self, n: usize, width: u32, height: u32, params: &Value) -> Result<()> {
        while self.slots.len() < n {
            let mut renderer = self.factory.create();
            renderer.set_scene(width, height, params).await?;
            self.slots.push(WorkerSlot {
                id: SlotId::next(),
                renderer: Some(renderer),
                in_flight: None,
                join_handle: None,
            });
        }
        Ok(())
    }

    /// Shrink the pool to `n` workers, popping from the tail. Any in-flight
    /// block on a popped slot is returned to the caller so it can be
    /// re-enqueued and an `unqueued` event emitted, in pop order, exactly
    /// once per slot.
    ///
    /// A popped slot whose renderer is idle (present) is terminated
    /// immediately in a detached task. A popped slot whose renderer is
    /// mid-render (absent — some spawned dispatch task owns it) has its
    /// dispatch task aborted outright, so the render future is cancelled at
    /// its next await point rather than left to complete and be discarded
    /// as a stale result (SPEC_FULL.md §4.1 Worker Slot state machine: BUSY
    /// reclaimed moves straight to DISPOSED; §5 Cancellation).
    pub fn shrink_to(&mut self, n: usize) -> Vec<(BlockId, Block)> {
        let mut reclaimed = Vec::new();
        while self.slots.len() > n {
            let mut slot = self.slots.pop().expect("len > n implies non-empty");
            if let Some(handle) = slot.join_handle.take() {
                handle.abort();
            }
            if let Some(block) = slot.in_flight.take() {
                reclaimed.push(block);
            }
            if let Some(renderer) = slot.renderer.take() {
                tokio::spawn(async move {
                    renderer.terminate().await;
                });
            }
        }
        reclaimed
    }

    /// Terminate every current worker and replace with `len()` fresh ones
    /// initialized for `(width, height, params)`. Used by `start()` when
    /// the previous frame was incomplete (SPEC_FULL.md §4.1 step 1).
    pub async fn recycle_all(&mut self, width: u32, height: u32, params: &Value) -> Result<()> {
        let count = self.slots.len();
        let old = std::mem::take(&mut self.slots);
        for slot in old {
            if let Some(handle) = slot.join_handle {
                handle.abort();
            }
            if let Some(renderer) = slot.renderer {
                tokio::spawn(async move {
                    renderer.terminate().await;
                });
            }
            // Any in-flight block on an old slot is the previous frame's;
            // the caller (BlockScheduler::start) already replaced the
            // pending queue and frame buffer wholesale, so it is simply
            // dropped here rather than reclaimed.
        }
        self.grow_to(count, width, height, params).await
    }

    /// Re-initialize every existing worker in place, without discarding
    /// any of them. Used by `start()` when the previous frame was complete
    /// (SPEC_FULL.md §4.1 step 1, "kept but re-initialized").
    pub async fn reinit_all(&mut self, width: u32, height: u32, params: &Value) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(renderer) = slot.renderer.as_mut() {
                renderer.set_scene(width, height, params).await?;
            }
        }
        Ok(())
    }

    /// Take ownership of an idle slot's renderer so a dispatch can render
    /// with it. Returns `None` if the slot doesn't exist or isn't idle.
    pub fn take_idle_renderer(&mut self, id: SlotId) -> Option<Box<dyn BlockRenderer>> {
        let slot = self.slots.iter_mut().find(|s| s.id == id)?;
        if slot.in_flight.is_some() {
            return None;
        }
        slot.renderer.take()
    }

    pub fn mark_in_flight(&mut self, id: SlotId, block: (BlockId, Block)) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.in_flight = Some(block);
        }
    }

    /// Record the `JoinHandle` of the task dispatching this slot's
    /// in-flight block, so a later reclaim can abort it. Called right
    /// after `tokio::spawn`, under the same scheduler lock that guards
    /// `mark_in_flight`, so no reclaim can race between dispatch and the
    /// handle being recorded.
    pub fn set_join_handle(&mut self, id: SlotId, handle: tokio::task::JoinHandle<()>) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.join_handle = Some(handle);
        }
    }

    /// Returns the renderer to its slot and clears the in-flight marker,
    /// iff the slot still exists. Hands the renderer back to the caller
    /// (`Some`) when the slot was removed out from under the dispatch, so
    /// the caller can terminate it; `None` means it was accepted back into
    /// its slot.
    pub fn return_renderer(
        &mut self,
        id: SlotId,
        renderer: Box<dyn BlockRenderer>,
    ) -> Option<Box<dyn BlockRenderer>> {
        match self.slots.iter_mut().find(|s| s.id == id) {
            Some(slot) => {
                slot.renderer = Some(renderer);
                slot.in_flight = None;
                slot.join_handle = None;
                None
            }
            None => Some(renderer),
        }
    }

    /// Whether `id`'s in-flight block still matches `expected` — the
    /// identity check that guards every `on_result` (SPEC_FULL.md §4.1).
    pub fn in_flight_matches(&self, id: SlotId, expected: BlockId) -> bool {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.in_flight.as_ref())
            .is_some_and(|(bid, _)| *bid == expected)
    }

    pub fn idle_slot_ids(&self) -> Vec<SlotId> {
        self.slots.iter().filter(|s| s.is_idle()).map(|s| s.id).collect()
    }

    /// Apply an opaque scene-mutation command (`store_mesh`, `store_texture`,
    /// `rebuild_acceleration_structure`) to every currently idle renderer,
    /// in slot order. Busy slots (renderer physically out on a dispatch) are
    /// skipped — the operation reaches them the next time they go idle and
    /// the caller re-issues it, same as any other mid-render scene mutation
    /// this crate declines to interleave with (SPEC_FULL.md §4.5).
    pub async fn apply_scene_command(&mut self, cmd: &SceneCommand<'_>) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(renderer) = slot.renderer.as_mut() {
                match *cmd {
                    SceneCommand::StoreMesh { id, bytes } => renderer.store_mesh(id, bytes).await?,
                    SceneCommand::StoreTexture { id, bytes } => renderer.store_texture(id, bytes).await?,
                    SceneCommand::RebuildAccelerationStructure => {
                        renderer.rebuild_acceleration_structure().await?
                    }
                }
            }
        }
        Ok(())
    }
}

/// An opaque scene-mutation request routed to every currently idle renderer
/// (SPEC_FULL.md §4.5). Kept as a plain enum matched inline in
/// [`WorkerPool::apply_scene_command`] rather than a generic closure:
/// `store_mesh`/`store_texture`/`rebuild_acceleration_structure` are
/// `async_trait` methods whose futures borrow the renderer they're called
/// on, and a `FnMut(&mut Box<dyn BlockRenderer>) -> Fut` generic cannot name
/// a single `Fut` type for a future that borrows a per-call, higher-ranked
/// `&mut` — so the mutation has to happen inline, not behind a callback.
#[derive(Clone, Copy)]
pub enum SceneCommand<'a> {
    StoreMesh { id: &'a str, bytes: &'a [u8] },
    StoreTexture { id: &'a str, bytes: &'a [u8] },
    RebuildAccelerationStructure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::solid_color_factory;

    #[tokio::test]
    async fn grow_to_constructs_and_initializes() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(3, 64, 64, &Value::Null).await.unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.slots().iter().all(|s| s.state() == SlotState::Idle));
    }

    #[tokio::test]
    async fn grow_to_is_idempotent_past_target() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(2, 64, 64, &Value::Null).await.unwrap();
        let ids_before: Vec<_> = pool.slots().iter().map(|s| s.id).collect();
        pool.grow_to(2, 64, 64, &Value::Null).await.unwrap();
        let ids_after: Vec<_> = pool.slots().iter().map(|s| s.id).collect();
        assert_eq!(ids_before, ids_after);
    }

    #[tokio::test]
    async fn shrink_to_pops_from_tail_and_reclaims_in_flight() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(3, 64, 64, &Value::Null).await.unwrap();
        let ids: Vec<_> = pool.slots().iter().map(|s| s.id).collect();

        let block = Block { id: BlockId(7), x: 0, y: 0, width: 8, height: 8 };
        pool.mark_in_flight(ids[2], (BlockId(7), block));

        let reclaimed = pool.shrink_to(2);
        assert_eq!(reclaimed, vec![(BlockId(7), block)]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.slots().iter().map(|s| s.id).collect::<Vec<_>>(), &ids[..2]);
    }

    #[tokio::test]
    async fn shrink_then_regrow_never_duplicates_reclaim() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(2, 64, 64, &Value::Null).await.unwrap();
        let ids: Vec<_> = pool.slots().iter().map(|s| s.id).collect();
        let block = Block { id: BlockId(1), x: 0, y: 0, width: 1, height: 1 };
        pool.mark_in_flight(ids[1], (BlockId(1), block));

        let first_shrink = pool.shrink_to(0);
        assert_eq!(first_shrink, vec![(BlockId(1), block)]);
        // Shrinking again immediately must not reclaim anything twice.
        let second_shrink = pool.shrink_to(0);
        assert!(second_shrink.is_empty());
    }

    #[tokio::test]
    async fn resize_to_same_count_is_a_no_op_on_identities() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(3, 64, 64, &Value::Null).await.unwrap();
        let before: Vec<_> = pool.slots().iter().map(|s| s.id).collect();

        pool.grow_to(3, 64, 64, &Value::Null).await.unwrap();
        let reclaimed = pool.shrink_to(3);
        assert!(reclaimed.is_empty());

        let after: Vec<_> = pool.slots().iter().map(|s| s.id).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn take_and_return_renderer_round_trips() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(1, 64, 64, &Value::Null).await.unwrap();
        let id = pool.slots()[0].id;

        let renderer = pool.take_idle_renderer(id).expect("idle");
        assert!(pool.take_idle_renderer(id).is_none(), "already taken");

        assert!(pool.return_renderer(id, renderer).is_none());
        assert!(pool.slots()[0].is_idle());
    }

    #[tokio::test]
    async fn apply_scene_command_skips_busy_slots() {
        use async_trait::async_trait;

        /// Tracks `rebuild_acceleration_structure` calls via a counter
        /// shared across every renderer the factory constructs, so the test
        /// can tell how many *idle* slots a broadcast command reached.
        struct RebuildCountingRenderer {
            rebuilds: Arc<AtomicU64>,
        }

        #[async_trait]
        impl BlockRenderer for RebuildCountingRenderer {
            async fn set_scene(&mut self, _w: u32, _h: u32, _p: &Value) -> Result<()> {
                Ok(())
            }
            async fn render_block(&mut self, _x: u32, _y: u32, w: u32, h: u32, _aa: u8) -> Result<Vec<u8>> {
                Ok(vec![0u8; 3 * (w * h) as usize])
            }
            async fn rebuild_acceleration_structure(&mut self) -> Result<()> {
                self.rebuilds.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }

        struct RebuildCountingFactory(Arc<AtomicU64>);
        impl BlockRendererFactory for RebuildCountingFactory {
            fn create(&self) -> Box<dyn BlockRenderer> {
                Box::new(RebuildCountingRenderer { rebuilds: Arc::clone(&self.0) })
            }
        }

        let rebuilds = Arc::new(AtomicU64::new(0));
        let mut pool = WorkerPool::new(Arc::new(RebuildCountingFactory(Arc::clone(&rebuilds))));
        pool.grow_to(2, 64, 64, &Value::Null).await.unwrap();
        let ids: Vec<_> = pool.slots().iter().map(|s| s.id).collect();
        let taken = pool.take_idle_renderer(ids[0]).unwrap();
        pool.mark_in_flight(ids[0], (BlockId(0), Block { id: BlockId(0), x: 0, y: 0, width: 1, height: 1 }));

        pool.apply_scene_command(&SceneCommand::RebuildAccelerationStructure)
            .await
            .unwrap();
        assert_eq!(rebuilds.load(Ordering::Acquire), 1, "only the idle slot is visited");

        pool.return_renderer(ids[0], taken);
    }

    #[tokio::test]
    async fn return_renderer_fails_once_slot_is_gone() {
        let mut pool = WorkerPool::new(Arc::new(solid_color_factory([1, 2, 3])));
        pool.grow_to(1, 64, 64, &Value::Null).await.unwrap();
        let id = pool.slots()[0].id;
        let renderer = pool.take_idle_renderer(id).unwrap();

        pool.shrink_to(0);
        assert!(pool.return_renderer(id, renderer).is_some());
    }
}
