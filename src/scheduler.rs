// scheduler.rs - The Block Scheduler (SPEC_FULL.md §4.1).
//
// Ties together the Worker Pool, the pending block queue, the Frame
// Buffer, and the event sinks. All state transitions happen while holding
// `Inner`'s mutex, so only the spawned per-block render futures run in
// true parallel; the scheduler itself processes one transition at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::events::{EventSink, SchedulerEvent};
use crate::frame_buffer::FrameBuffer;
use crate::renderer::{BlockRenderer, BlockRendererFactory};
use crate::types::{enumerate_blocks, Block, BlockId, RenderConfig};
use crate::worker_pool::{SceneCommand, SlotId, WorkerPool};

/// Suggested default pool size for callers that don't pass an explicit
/// worker count. Never a hard cap — just a reasonable starting point
/// (SPEC_FULL.md §9 Open Questions).
#[cfg(not(target_arch = "wasm32"))]
pub fn default_pool_size() -> usize {
    num_cpus::get()
}

/// A read-only copy of the current frame buffer's geometry and pixels, for
/// handing to an external compositor (`target()` in SPEC_FULL.md §4.1).
/// Deliberately a snapshot rather than a live handle: the scheduler is the
/// only writer, and cloning `width * height * 4` bytes per poll is cheap
/// relative to a render block.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

struct FrameState {
    generation: u64,
    cfg: RenderConfig,
    buffer: FrameBuffer,
    pending: VecDeque<(BlockId, Block)>,
    done_count: u32,
    total_count: u32,
    started_at: Instant,
    complete: bool,
}

impl FrameState {
    fn is_complete(&self) -> bool {
        self.complete
    }
}

struct Inner {
    pool: WorkerPool,
    frame: Option<FrameState>,
    next_generation: u64,
}

impl Inner {
    /// Pop ready work: for every currently idle slot, if the frame has a
    /// pending block, take the slot's renderer and mark it in-flight.
    /// Returns the assignments the caller should emit `Queued` for and
    /// spawn dispatch tasks for (SPEC_FULL.md §4.1 Dispatch algorithm).
    fn collect_dispatch(&mut self) -> Vec<DispatchItem> {
        let mut out = Vec::new();

        let (generation, anti_alias) = match self.frame.as_ref() {
            Some(frame) if !frame.is_complete() => (frame.generation, frame.cfg.anti_alias),
            _ => return out,
        };

        for slot_id in self.pool.idle_slot_ids() {
            let Some(frame) = self.frame.as_mut() else { break };
            let Some((block_id, block)) = frame.pending.pop_front() else { break };

            match self.pool.take_idle_renderer(slot_id) {
                Some(renderer) => {
                    self.pool.mark_in_flight(slot_id, (block_id, block));
                    out.push(DispatchItem { slot_id, generation, anti_alias, block_id, block, renderer });
                }
                None => {
                    // Slot state changed between `idle_slot_ids()` and now
                    // (shouldn't happen under the single scheduler lock,
                    // kept defensive); put the block back and stop.
                    if let Some(frame) = self.frame.as_mut() {
                        frame.pending.push_front((block_id, block));
                    }
                    break;
                }
            }
        }

        out
    }
}

struct DispatchItem {
    slot_id: SlotId,
    generation: u64,
    anti_alias: u8,
    block_id: BlockId,
    block: Block,
    renderer: Box<dyn BlockRenderer>,
}

/// Converts a [`RenderConfig`] into an executing frame: partitions the
/// viewport into blocks, shuffles them, dispatches across the worker pool,
/// composites results as they arrive, and emits progress events. See
/// SPEC_FULL.md §4.1 for the full contract.
pub struct BlockScheduler {
    inner: Mutex<Inner>,
    events: EventSink,
}

impl BlockScheduler {
    pub fn new(factory: Arc<dyn BlockRendererFactory>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                pool: WorkerPool::new(factory),
                frame: None,
                next_generation: 0,
            }),
            events: EventSink::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Current worker pool size.
    pub async fn pool_size(&self) -> usize {
        self.inner.lock().await.pool.len()
    }

    /// A read-only snapshot of the current frame buffer, or `None` if
    /// `start()` has never been called.
    pub async fn target(&self) -> Option<FrameSnapshot> {
        let inner = self.inner.lock().await;
        inner.frame.as_ref().map(|f| FrameSnapshot {
            width: f.buffer.width(),
            height: f.buffer.height(),
            pixels: f.buffer.pixels().to_vec(),
        })
    }

    /// Begin a new frame (SPEC_FULL.md §4.1 `start(cfg)`).
    pub async fn start(self: &Arc<Self>, cfg: RenderConfig) -> Result<()> {
        cfg.validate()?;

        let mut inner = self.inner.lock().await;

        let previous_complete = inner.frame.as_ref().map_or(true, FrameState::is_complete);
        if previous_complete {
            inner.pool.reinit_all(cfg.width, cfg.height, &cfg.render_params).await?;
        } else {
            log::info!("start() called during an incomplete frame; terminating and replacing workers");
            inner.pool.recycle_all(cfg.width, cfg.height, &cfg.render_params).await?;
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;

        let mut blocks = enumerate_blocks(&cfg, 0);
        blocks.shuffle(&mut rand::thread_rng());
        let total_count = blocks.len() as u32;
        let pending: VecDeque<(BlockId, Block)> = blocks.into_iter().map(|b| (b.id, b)).collect();

        log::debug!(
            "start(): generation={generation} blocks={total_count} viewport={}x{}",
            cfg.width, cfg.height
        );

        let buffer = FrameBuffer::new(cfg.width, cfg.height, cfg.de_band);
        inner.frame = Some(FrameState {
            generation,
            cfg,
            buffer,
            pending,
            done_count: 0,
            total_count,
            started_at: Instant::now(),
            complete: total_count == 0,
        });

        drop(inner);
        self.dispatch().await;
        Ok(())
    }

    /// Grow or shrink the worker pool to `n` (SPEC_FULL.md §4.1
    /// `resize_pool(n)`).
    pub async fn resize_pool(self: &Arc<Self>, n: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let current = inner.pool.len();

        if n < current {
            let reclaimed = inner.pool.shrink_to(n);
            if let Some(frame) = inner.frame.as_mut() {
                for (block_id, block) in reclaimed {
                    frame.pending.push_back((block_id, block));
                    self.events.emit(SchedulerEvent::Unqueued { block });
                }
            }
        } else if n > current {
            let (width, height, params) = match inner.frame.as_ref() {
                Some(f) => (f.buffer.width(), f.buffer.height(), f.cfg.render_params.clone()),
                None => (0, 0, Value::Null),
            };
            inner.pool.grow_to(n, width, height, &params).await?;
        }

        drop(inner);
        self.dispatch().await;
        Ok(())
    }

    /// Push a fresh `render_params` bag to every idle worker without
    /// disturbing the current frame's blocks (SPEC_FULL.md §4.6
    /// `update_scene`). Busy workers pick it up only on their next `start`
    /// or `resize_pool`.
    pub async fn update_scene(&self, params: Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(frame) = inner.frame.as_ref() else {
            return Err(crate::error::SchedulerError::InvalidConfig {
                reason: "update_scene called before any start()".into(),
            });
        };
        let (width, height) = (frame.buffer.width(), frame.buffer.height());
        inner.pool.reinit_all(width, height, &params).await
    }

    pub async fn store_mesh(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pool.apply_scene_command(&SceneCommand::StoreMesh { id, bytes }).await
    }

    pub async fn store_texture(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pool.apply_scene_command(&SceneCommand::StoreTexture { id, bytes }).await
    }

    pub async fn rebuild_acceleration_structure(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pool.apply_scene_command(&SceneCommand::RebuildAccelerationStructure).await
    }

    /// Run the dispatch loop once: assign every ready (idle slot, pending
    /// block) pair and spawn its render-then-composite chain.
    async fn dispatch(self: &Arc<Self>) {
        let items = {
            let mut inner = self.inner.lock().await;
            inner.collect_dispatch()
        };
        if items.is_empty() {
            return;
        }

        // Re-lock to record each spawned task's JoinHandle on its slot.
        // Nothing spawned below can observe the pool before this lock is
        // released (on_result's first action is to lock the same mutex),
        // so every handle is recorded before a reclaim could need it.
        let mut inner = self.inner.lock().await;
        for item in items {
            self.events.emit(SchedulerEvent::Queued { block: item.block });
            let scheduler = Arc::clone(self);
            let DispatchItem { slot_id, generation, anti_alias, block_id, block, mut renderer } = item;

            let handle = tokio::spawn(async move {
                let result = renderer
                    .render_block(block.x, block.y, block.width, block.height, anti_alias)
                    .await;
                scheduler.on_result(slot_id, generation, block_id, block, renderer, result).await;
            });
            inner.pool.set_join_handle(slot_id, handle);
        }
    }

    /// Handle one worker's render result (SPEC_FULL.md §4.1 `on_result`).
    async fn on_result(
        self: Arc<Self>,
        slot_id: SlotId,
        generation: u64,
        block_id: BlockId,
        block: Block,
        renderer: Box<dyn BlockRenderer>,
        result: Result<Vec<u8>>,
    ) {
        let mut inner = self.inner.lock().await;
        let slot_matches = inner.pool.in_flight_matches(slot_id, block_id);

        let pixels = match result {
            Ok(pixels) => pixels,
            Err(err) => {
                log::warn!("render_block failed for block {block_id:?}: {err}");
                // Failure semantics (SPEC_FULL.md §4.1, §7 kind 2): if the
                // slot is still tracking this exact block, it stays
                // in-flight and stuck until an explicit resize_pool/start
                // reclaims it — no retry, no auto-restart. Either way the
                // renderer instance itself is released now.
                drop(inner);
                renderer.terminate().await;
                return;
            }
        };

        let frame_matches = inner.frame.as_ref().is_some_and(|f| f.generation == generation);

        if frame_matches && slot_matches {
            let stale = inner.pool.return_renderer(slot_id, renderer);
            debug_assert!(stale.is_none(), "slot_matches implies the slot still exists");

            let frame = inner.frame.as_mut().expect("frame_matches implies Some");
            frame.buffer.write_rect(block.x, block.y, block.width, block.height, &pixels);
            frame.done_count += 1;
            let (done, total) = (frame.done_count, frame.total_count);
            if done == total {
                frame.complete = true;
            }

            self.events.emit(SchedulerEvent::Progress { block, done, total });
            if done == total {
                let duration = frame.started_at.elapsed();
                log::info!("frame generation={generation} complete in {duration:?}");
                self.events.emit(SchedulerEvent::Done { duration });
            }
        } else {
            log::trace!(
                "discarding stale result for block {block_id:?} (frame_matches={frame_matches}, slot_matches={slot_matches})"
            );
            if let Some(orphan) = inner.pool.return_renderer(slot_id, renderer) {
                tokio::spawn(async move {
                    orphan.terminate().await;
                });
            }
        }

        drop(inner);
        self.dispatch().await;
    }
}

/// Default `done`/`progress` wait helper for tests and the demo binary:
/// poll events until a `Done` is observed, ignoring everything else.
/// Exposed because both the demo binary and integration tests need it and
/// neither should re-derive the subscribe/recv-loop boilerplate.
pub async fn wait_for_done(mut rx: broadcast::Receiver<SchedulerEvent>) -> Duration {
    loop {
        match rx.recv().await {
            Ok(SchedulerEvent::Done { duration }) => return duration,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                panic!("event sink closed before a Done event arrived")
            }
        }
    }
}
