// job_serializer.rs - Single-slot FIFO job queue (SPEC_FULL.md §4.4).
//
// The external raytracer is stateful: storing a mesh before the scene is
// initialized, issuing `update_scene` mid-render, or rebuilding an
// acceleration structure during a render block produces undefined behavior
// in the opaque kernel. This linearizes the operation history so only one
// such call is ever outstanding against the collaborator.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::error::{Result, SchedulerError};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct State {
    /// `true` while a driver task is actively popping and awaiting jobs.
    running: bool,
    queue: VecDeque<BoxFuture<()>>,
}

/// Serializes externally-visible operations that have side effects on the
/// renderer. `submit` never blocks the caller past enqueueing; the
/// returned future resolves once this job's turn has come and gone.
pub struct JobSerializer {
    state: Arc<Mutex<State>>,
}

impl JobSerializer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State { running: false, queue: VecDeque::new() })),
        }
    }

    /// Enqueue `thunk`. It begins running only after every job submitted
    /// before it has fully settled (SPEC_FULL.md §8: `j1` submitted first
    /// settles no later than `j2`). Returns [`SchedulerError::SerializerClosed`]
    /// if the driver is dropped before this job's turn arrives.
    pub async fn submit<F, Fut, T>(&self, thunk: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<T>();
        let job: BoxFuture<()> = Box::pin(async move {
            let value = thunk().await;
            let _ = tx.send(value);
        });

        let should_drive = {
            let mut state = self.state.lock().await;
            state.queue.push_back(job);
            let idle = !state.running;
            if idle {
                state.running = true;
            }
            idle
        };

        if should_drive {
            self.drive();
        }

        rx.await.map_err(|_| SchedulerError::SerializerClosed)
    }

    /// Spawn the driver loop if one isn't already running. Pops and awaits
    /// jobs strictly one at a time; exits (and clears `running`) once the
    /// queue is observed empty, so a subsequent `submit` knows to restart
    /// it.
    fn drive(&self) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = state.lock().await;
                    match guard.queue.pop_front() {
                        Some(job) => Some(job),
                        None => {
                            guard.running = false;
                            None
                        }
                    }
                };
                match next {
                    Some(job) => job.await,
                    None => break,
                }
            }
        });
    }
}

impl Default for JobSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for JobSerializer {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}
