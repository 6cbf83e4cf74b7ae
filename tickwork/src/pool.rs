// Scaling worker pool running scheduled work on tokio tasks
//
// Workers are started lazily: up to `min_workers` on demand, then up to
// `max_workers` while queued work outnumbers idle workers. Workers above the
// minimum retire after `keep_alive` without work.

use crate::errors::PoolError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

/// Identifies a unit of work while it waits in the pool queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkId(u64);

/// A unit of work; it receives the name of the worker executing it
pub(crate) type Work = Box<dyn FnOnce(Arc<str>) -> BoxFuture<'static, ()> + Send>;

/// Pool sizing
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub name: String,
    pub min_workers: usize,
    pub max_workers: usize,
    pub keep_alive: Duration,
}

struct PoolState {
    pending: VecDeque<(WorkId, Work)>,
    workers: usize,
    active: usize,
    largest: usize,
    shut_down: bool,
    next_work_id: u64,
    next_worker_id: u64,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    work_available: Notify,
    terminated: Notify,
}

pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    runtime: Handle,
}

impl WorkerPool {
    pub(crate) fn new(config: PoolConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    pending: VecDeque::new(),
                    workers: 0,
                    active: 0,
                    largest: 0,
                    shut_down: false,
                    next_work_id: 0,
                    next_worker_id: 0,
                }),
                work_available: Notify::new(),
                terminated: Notify::new(),
            }),
            runtime,
        }
    }

    /// Queue work for execution, starting a worker when needed
    pub(crate) fn submit(&self, work: Work) -> Result<WorkId, PoolError> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();

        if state.shut_down {
            return Err(PoolError::ShutDown(config.name.clone()));
        }

        let id = WorkId(state.next_work_id);
        state.next_work_id += 1;
        state.pending.push_back((id, work));

        let idle = state.workers - state.active;
        let needs_worker = state.workers < config.min_workers
            || (idle < state.pending.len() && state.workers < config.max_workers);

        let worker_name = if needs_worker {
            let worker_id = state.next_worker_id;
            state.next_worker_id += 1;
            state.workers += 1;
            state.largest = state.largest.max(state.workers);
            Some(Arc::<str>::from(format!("{}-worker-{}", config.name, worker_id)))
        } else {
            None
        };
        drop(state);

        if let Some(worker_name) = worker_name {
            self.runtime
                .spawn(worker_loop(Arc::clone(&self.shared), worker_name));
        }
        self.shared.work_available.notify_one();

        Ok(id)
    }

    /// Remove queued work that no worker has claimed yet
    pub(crate) fn remove(&self, id: WorkId) -> bool {
        let mut state = self.shared.state.lock();
        match state.pending.iter().position(|(queued, _)| *queued == id) {
            Some(index) => {
                state.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Stop accepting work. Queued work still runs unless removed.
    pub(crate) fn shutdown(&self) {
        let no_workers = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.workers == 0
        };

        info!(pool = %self.shared.config.name, "Worker pool shutting down");
        self.shared.work_available.notify_waiters();
        if no_workers {
            self.shared.terminated.notify_waiters();
        }
    }

    /// Wait until every worker has exited after [`WorkerPool::shutdown`].
    ///
    /// Returns `false` when the timeout elapses first.
    pub(crate) async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.shared.terminated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_terminated() {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_terminated();
            }
        }
    }

    pub(crate) fn min_workers(&self) -> usize {
        self.shared.config.min_workers
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.shared.config.max_workers
    }

    pub(crate) fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    pub(crate) fn pool_size(&self) -> usize {
        self.shared.state.lock().workers
    }

    pub(crate) fn largest_pool_size(&self) -> usize {
        self.shared.state.lock().largest
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Shut down but some workers are still running
    pub(crate) fn is_terminating(&self) -> bool {
        let state = self.shared.state.lock();
        state.shut_down && state.workers > 0
    }

    pub(crate) fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        state.shut_down && state.workers == 0
    }
}

async fn worker_loop(shared: Arc<PoolShared>, worker_name: Arc<str>) {
    debug!(worker = %worker_name, "Worker started");

    loop {
        // Registered before looking at the queue so a concurrent submit
        // cannot slip between the check and the wait
        let notified = shared.work_available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let work = {
            let mut state = shared.state.lock();
            if let Some((_, work)) = state.pending.pop_front() {
                state.active += 1;
                Some(work)
            } else if state.shut_down {
                state.workers -= 1;
                let last = state.workers == 0;
                drop(state);

                debug!(worker = %worker_name, "Worker stopped");
                if last {
                    shared.terminated.notify_waiters();
                }
                return;
            } else {
                None
            }
        };

        match work {
            Some(work) => {
                work(Arc::clone(&worker_name)).await;
                shared.state.lock().active -= 1;
            }
            None => {
                if tokio::time::timeout(shared.config.keep_alive, notified)
                    .await
                    .is_err()
                {
                    let mut state = shared.state.lock();
                    if !state.shut_down
                        && state.pending.is_empty()
                        && state.workers > shared.config.min_workers
                    {
                        state.workers -= 1;
                        debug!(worker = %worker_name, "Idle worker retired");
                        return;
                    }
                }
            }
        }
    }
}
