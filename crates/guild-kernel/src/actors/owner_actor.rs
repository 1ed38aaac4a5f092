//! OwnerActor: the owning context for a slice of state.
//!
//! Each owner processes its mailbox serially, so every job it runs has
//! exclusive access to the state that owner is responsible for. While a job
//! runs, the executing thread carries the owner's [`OwnerLabel`].

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use acton_reactive::prelude::*;
use tracing::{debug, error, trace};

use crate::affinity::{self, OwnerLabel};
use crate::messages::{DrainTimers, SubmitTask, Tick};
use crate::scheduler::Task;

/// Actor state for one owner.
#[derive(Default, Clone)]
pub struct OwnerActorState {
    pub label: OwnerLabel,
    /// Last tick this owner observed
    pub tick: u64,
    /// Due tick -> jobs
    pub timers: BTreeMap<u64, Vec<Task>>,
    /// Jobs executed, including periodic re-runs
    pub executed: u64,
    /// Jobs that panicked
    pub panicked: u64,
}

impl std::fmt::Debug for OwnerActorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerActorState")
            .field("label", &self.label)
            .field("tick", &self.tick)
            .field("pending_timers", &self.timers.values().map(Vec::len).sum::<usize>())
            .field("executed", &self.executed)
            .finish()
    }
}

impl OwnerActorState {
    fn run(&mut self, task: &Task) {
        let _scope = affinity::enter(self.label);
        match catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(true) => self.executed += 1,
            Ok(false) => trace!(owner = %self.label, "Skipped cancelled or spent job"),
            Err(_) => {
                self.panicked += 1;
                error!(owner = %self.label, tick = self.tick, "Job panicked on owner");
            }
        }
    }

    fn schedule(&mut self, task: Task, due_tick: u64) {
        self.timers.entry(due_tick).or_default().push(task);
    }

    fn run_and_rearm(&mut self, task: Task) {
        self.run(&task);
        if let Some(period) = task.period() {
            if !task.handle.is_cancelled() {
                let next = self.tick + period;
                self.schedule(task, next);
            }
        }
    }

    fn fire_due(&mut self) {
        while let Some(entry) = self.timers.first_entry() {
            if *entry.key() > self.tick {
                break;
            }
            for task in entry.remove() {
                self.run_and_rearm(task);
            }
        }
    }
}

/// Spawns owner actors.
pub struct OwnerActor {
    label: OwnerLabel,
}

impl OwnerActor {
    pub fn new(label: OwnerLabel) -> Self {
        Self { label }
    }

    /// Spawn this owner in the given runtime.
    pub async fn spawn(self, runtime: &mut ActorRuntime, start_tick: u64) -> ActorHandle {
        let mut actor = runtime.new_actor_with_name::<OwnerActorState>(format!("Owner:{}", self.label));

        actor.model.label = self.label;
        actor.model.tick = start_tick;

        configure_owner_actor(&mut actor);

        actor.start().await
    }
}

fn configure_owner_actor(actor: &mut ManagedActor<Idle, OwnerActorState>) {
    actor.mutate_on::<SubmitTask>(|actor, context| {
        let msg = context.message().clone();
        let state = &mut actor.model;

        match msg.due_tick {
            Some(due) if due > state.tick => {
                trace!(owner = %state.label, due, now = state.tick, "Job parked until due tick");
                state.schedule(msg.task, due);
            }
            _ => {
                // A periodic job's first run anchors its period to this tick
                state.run_and_rearm(msg.task);
            }
        }

        Reply::ready()
    });

    actor.mutate_on::<Tick>(|actor, context| {
        let tick = context.message().tick;
        let state = &mut actor.model;

        if tick > state.tick {
            state.tick = tick;
            state.fire_due();
        }

        Reply::ready()
    });

    actor.mutate_on::<DrainTimers>(|actor, _context| {
        let state = &mut actor.model;
        let dropped: usize = state.timers.values().map(Vec::len).sum();
        state.timers.clear();
        debug!(owner = %state.label, dropped, "Owner timers drained");
        Reply::ready()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use acton_reactive::prelude::ActonApp;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_submitted_job_runs_marked_as_owner() {
        let mut runtime = ActonApp::launch_async().await;
        let owner = OwnerActor::new(OwnerLabel::Global).spawn(&mut runtime, 0).await;

        let (tx, rx) = oneshot::channel();
        owner
            .send(SubmitTask {
                task: Task::once(move || {
                    let _ = tx.send(affinity::is_owning_thread());
                }),
                due_tick: None,
            })
            .await;

        let on_owner = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job did not run")
            .expect("job dropped");
        assert!(on_owner);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_region_owner_is_not_global() {
        let mut runtime = ActonApp::launch_async().await;
        let owner = OwnerActor::new(OwnerLabel::Region(1)).spawn(&mut runtime, 0).await;

        let (tx, rx) = oneshot::channel();
        owner
            .send(SubmitTask {
                task: Task::once(move || {
                    let _ = tx.send(affinity::current_owner());
                }),
                due_tick: None,
            })
            .await;

        let label = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job did not run")
            .expect("job dropped");
        assert_eq!(label, Some(OwnerLabel::Region(1)));

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_delayed_job_waits_for_tick() {
        let mut runtime = ActonApp::launch_async().await;
        let owner = OwnerActor::new(OwnerLabel::Global).spawn(&mut runtime, 0).await;

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        owner
            .send(SubmitTask {
                task: Task::once(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                due_tick: Some(2),
            })
            .await;

        owner.send(Tick { tick: 1 }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        owner.send(Tick { tick: 2 }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_owner() {
        let mut runtime = ActonApp::launch_async().await;
        let owner = OwnerActor::new(OwnerLabel::Global).spawn(&mut runtime, 0).await;

        owner
            .send(SubmitTask {
                task: Task::once(|| panic!("job failure")),
                due_tick: None,
            })
            .await;

        let (tx, rx) = oneshot::channel();
        owner
            .send(SubmitTask {
                task: Task::once(move || {
                    let _ = tx.send(());
                }),
                due_tick: None,
            })
            .await;

        assert!(tokio::time::timeout(Duration::from_secs(2), rx).await.is_ok());

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_periodic_job_rearms_until_cancelled() {
        let mut runtime = ActonApp::launch_async().await;
        let owner = OwnerActor::new(OwnerLabel::Global).spawn(&mut runtime, 0).await;

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = Task::repeating(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            2,
        );
        let handle = task.handle();
        owner.send(SubmitTask { task, due_tick: Some(1) }).await;

        for tick in 1..=5 {
            owner.send(Tick { tick }).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        // ticks 1, 3, 5
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.cancel();
        for tick in 6..=9 {
            owner.send(Tick { tick }).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let _ = runtime.shutdown_all().await;
    }
}
