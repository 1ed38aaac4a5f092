//! Task router.
//!
//! Every submission is fire-and-forget and runs exactly once on an owner
//! appropriate to its affinity target. On partitioned hosts the router asks
//! the host for the dedicated scheduler; whenever that fails it falls back
//! to the single global authority instead of surfacing an error.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::affinity::OwnerLabel;
use crate::error::{GuildError, GuildResult};
use crate::ids::{ActorId, Location};
use crate::scheduler::{Executor, HostScheduler, Task, TaskHandle, Work};
use crate::topology::{Topology, TopologyDetector};

/// Re-dispatch attempts when an actor changes owner between submit and run.
const MAX_ACTOR_HOPS: u8 = 3;

struct RouterInner {
    topology: Topology,
    host: Arc<dyn HostScheduler>,
    global: Executor,
}

/// Cheap to clone; all clones share one resolved topology.
#[derive(Clone)]
pub struct TaskRouter {
    inner: Arc<RouterInner>,
}

impl fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRouter")
            .field("topology", &self.inner.topology)
            .field("global", &self.inner.global.label())
            .finish()
    }
}

impl TaskRouter {
    /// Resolve the topology and the global executor once.
    pub fn new(detector: &TopologyDetector, host: Arc<dyn HostScheduler>) -> Self {
        let topology = detector.topology();
        let global = if topology.is_partitioned() {
            match host.global_region() {
                Ok(executor) => executor,
                Err(e) => {
                    warn!(error = %e, "Global region scheduler unavailable, using authority");
                    host.authority()
                }
            }
        } else {
            host.authority()
        };
        debug!(topology = %topology, global = %global.label(), "Task router ready");

        Self {
            inner: Arc::new(RouterInner {
                topology,
                host,
                global,
            }),
        }
    }

    pub fn topology(&self) -> Topology {
        self.inner.topology
    }

    pub fn current_tick(&self) -> u64 {
        self.inner.host.current_tick()
    }

    /// Work with no spatial or actor affinity: guild state, presentation.
    pub fn run_on_global_authority(&self, work: impl FnOnce() + Send + 'static) -> TaskHandle {
        let task = Task::once(work);
        let handle = task.handle();
        self.inner.global.submit(task, 0);
        handle
    }

    /// Work tied to the region containing `location`.
    pub fn run_at_location(
        &self,
        location: &Location,
        work: impl FnOnce() + Send + 'static,
    ) -> TaskHandle {
        let task = Task::once(work);
        let handle = task.handle();
        self.executor_for_location(location).submit(task, 0);
        handle
    }

    /// Work tied to a live actor.
    ///
    /// Runs `work` on the actor's owner if the actor is still connected when
    /// the job executes; otherwise `on_give_up` runs on the global authority.
    /// Exactly one of the two runs.
    pub fn run_for_actor(
        &self,
        actor: ActorId,
        work: impl FnOnce() + Send + 'static,
        on_give_up: impl FnOnce() + Send + 'static,
    ) -> TaskHandle {
        let handle = TaskHandle::new();
        dispatch_for_actor(
            self.clone(),
            actor,
            Box::new(work),
            Box::new(on_give_up),
            handle.clone(),
            0,
        );
        handle
    }

    /// Global-authority work after `delay_ticks` ticks.
    pub fn run_later(&self, work: impl FnOnce() + Send + 'static, delay_ticks: u64) -> TaskHandle {
        let task = Task::once(work);
        let handle = task.handle();
        self.inner.global.submit(task, delay_ticks.max(1));
        handle
    }

    /// Global-authority work first after `delay_ticks`, then every `period_ticks`.
    pub fn run_periodically(
        &self,
        work: impl FnMut() + Send + 'static,
        delay_ticks: u64,
        period_ticks: u64,
    ) -> TaskHandle {
        let task = Task::repeating(work, period_ticks);
        let handle = task.handle();
        self.inner.global.submit(task, delay_ticks);
        handle
    }

    /// Work that must stay off every owner.
    pub fn run_in_background(&self, work: impl FnOnce() + Send + 'static) -> TaskHandle {
        let handle = TaskHandle::new();
        let guard = handle.clone();
        let runtime = self.inner.host.runtime();
        let job = runtime.spawn_blocking(move || {
            if !guard.is_cancelled() {
                work();
            }
        });
        runtime.spawn(async move {
            if let Err(e) = job.await {
                error!(error = %e, "Background job failed");
            }
        });
        handle
    }

    /// Run `work` on the global authority and await its result.
    pub async fn call<R: Send + 'static>(
        &self,
        work: impl FnOnce() -> R + Send + 'static,
    ) -> GuildResult<R> {
        let (tx, rx) = oneshot::channel();
        self.run_on_global_authority(move || {
            let _ = tx.send(work());
        });
        rx.await
            .map_err(|_| GuildError::internal("owner job ended without a result"))
    }

    fn executor_for_location(&self, location: &Location) -> Executor {
        if !self.inner.topology.is_partitioned() {
            return self.inner.global.clone();
        }
        match self.inner.host.region_at(location) {
            Ok(executor) => executor,
            Err(e) => {
                debug!(error = %e, location = %location, "Region scheduler unavailable, falling back");
                self.inner.host.authority()
            }
        }
    }

    /// Executor for an actor, or `None` if the actor is gone.
    fn executor_for_actor(&self, actor: ActorId) -> Option<Executor> {
        if !self.inner.topology.is_partitioned() {
            return self
                .inner
                .host
                .is_live(actor)
                .then(|| self.inner.global.clone());
        }
        match self.inner.host.actor_owner(actor) {
            Ok(executor) => Some(executor),
            Err(GuildError::NotFound(_)) => None,
            Err(e) => {
                debug!(error = %e, actor = %actor, "Actor scheduler unavailable, falling back");
                Some(self.inner.host.authority())
            }
        }
    }
}

fn give_up(router: &TaskRouter, actor: ActorId, on_give_up: Work, handle: &TaskHandle) {
    debug!(actor = %actor, "Actor gone before its work ran");
    let guard = handle.clone();
    router.run_on_global_authority(move || {
        if !guard.is_cancelled() {
            on_give_up();
        }
    });
}

fn dispatch_for_actor(
    router: TaskRouter,
    actor: ActorId,
    work: Work,
    on_give_up: Work,
    handle: TaskHandle,
    hops: u8,
) {
    let Some(executor) = router.executor_for_actor(actor) else {
        give_up(&router, actor, on_give_up, &handle);
        return;
    };
    let expected: OwnerLabel = executor.label();

    let job_router = router.clone();
    let job_handle = handle.clone();
    let job = move || {
        if job_handle.is_cancelled() {
            return;
        }
        if !job_router.inner.host.is_live(actor) {
            give_up(&job_router, actor, on_give_up, &job_handle);
            return;
        }
        let current = job_router.executor_for_actor(actor).map(|e| e.label());
        match current {
            Some(label) if label == expected => {
                if catch_unwind(AssertUnwindSafe(work)).is_err() {
                    error!(actor = %actor, owner = %label, "Actor job panicked");
                }
            }
            Some(label) if hops < MAX_ACTOR_HOPS => {
                trace!(actor = %actor, from = %expected, to = %label, "Actor moved, re-dispatching");
                dispatch_for_actor(job_router.clone(), actor, work, on_give_up, job_handle.clone(), hops + 1);
            }
            Some(label) => {
                warn!(actor = %actor, owner = %label, hops, "Actor kept moving, giving up");
                give_up(&job_router, actor, on_give_up, &job_handle);
            }
            None => give_up(&job_router, actor, on_give_up, &job_handle),
        }
    };

    // The task handle returned to the caller is the shared one above
    let task = Task::once(job);
    executor.submit(task, 0);
}
