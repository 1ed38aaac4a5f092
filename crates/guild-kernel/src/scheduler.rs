//! Units of work and the executors that accept them.
//!
//! A [`Task`] is what travels in an owner's mailbox. Its body is shared
//! behind an `Arc` because actor messages must be `Clone`; the body can
//! still run only once, since the job is taken out of its slot on first
//! execution.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use acton_reactive::prelude::*;
use tokio::runtime::Handle;

use crate::affinity::OwnerLabel;
use crate::error::GuildResult;
use crate::ids::{ActorId, Location};
use crate::messages::SubmitTask;
use crate::topology::CapabilityProbe;

/// One-shot work item.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Work re-run every period until cancelled.
pub type RepeatingWork = Box<dyn FnMut() + Send + 'static>;

/// Cancellation handle returned by every router submission.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent any future execution. Has no effect on a run already underway.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub(crate) enum JobBody {
    Once(Arc<Mutex<Option<Work>>>),
    Repeating {
        work: Arc<Mutex<RepeatingWork>>,
        period: u64,
    },
}

/// A job as carried by [`SubmitTask`].
#[derive(Clone)]
pub struct Task {
    pub(crate) body: JobBody,
    pub(crate) handle: TaskHandle,
}

impl Task {
    pub fn once(work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            body: JobBody::Once(Arc::new(Mutex::new(Some(Box::new(work))))),
            handle: TaskHandle::new(),
        }
    }

    pub fn repeating(work: impl FnMut() + Send + 'static, period: u64) -> Self {
        Self {
            body: JobBody::Repeating {
                work: Arc::new(Mutex::new(Box::new(work))),
                period: period.max(1),
            },
            handle: TaskHandle::new(),
        }
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    /// Ticks until the next run, or `None` for one-shot jobs.
    pub(crate) fn period(&self) -> Option<u64> {
        match &self.body {
            JobBody::Once(_) => None,
            JobBody::Repeating { period, .. } => Some(*period),
        }
    }

    /// Execute the body. Returns false if nothing ran.
    pub(crate) fn run(&self) -> bool {
        if self.handle.is_cancelled() {
            return false;
        }
        match &self.body {
            JobBody::Once(slot) => {
                let job = slot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                match job {
                    Some(job) => {
                        job();
                        true
                    }
                    None => false,
                }
            }
            JobBody::Repeating { work, .. } => {
                let mut work = work.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                (*work)();
                true
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("period", &self.period())
            .field("cancelled", &self.handle.is_cancelled())
            .finish()
    }
}

/// Host tick counter shared by the ticker and every executor.
#[derive(Debug, Clone, Default)]
pub struct OwnerClock(Arc<AtomicU64>);

impl OwnerClock {
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Submission endpoint for one owning context.
///
/// Submitting never blocks: the mailbox send is spawned on the runtime the
/// executor was created on, so it is safe from owner jobs, blocking threads
/// and plain OS threads alike.
#[derive(Clone)]
pub struct Executor {
    label: OwnerLabel,
    owner: ActorHandle,
    clock: OwnerClock,
    runtime: Handle,
}

impl Executor {
    pub(crate) fn new(label: OwnerLabel, owner: ActorHandle, clock: OwnerClock, runtime: Handle) -> Self {
        Self {
            label,
            owner,
            clock,
            runtime,
        }
    }

    pub fn label(&self) -> OwnerLabel {
        self.label
    }

    /// Queue `task` to run once `delay_ticks` ticks have elapsed.
    pub fn submit(&self, task: Task, delay_ticks: u64) {
        let due_tick = if delay_ticks == 0 {
            None
        } else {
            Some(self.clock.now() + delay_ticks)
        };
        let owner = self.owner.clone();
        self.runtime.spawn(async move {
            owner.send(SubmitTask { task, due_tick }).await;
        });
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("label", &self.label)
            .finish()
    }
}

/// Scheduling capabilities offered by a host.
///
/// Every method other than [`HostScheduler::authority`] may report
/// `SchedulerUnavailable`; the router recovers from that by falling back to
/// the authority.
pub trait HostScheduler: CapabilityProbe {
    /// The single global submission path. Always available.
    fn authority(&self) -> Executor;

    /// Dedicated scheduler of the global region on partitioned hosts.
    fn global_region(&self) -> GuildResult<Executor>;

    /// Scheduler owning the region containing `location`.
    fn region_at(&self, location: &Location) -> GuildResult<Executor>;

    /// Scheduler currently owning `actor`. `NotFound(Actor)` if it is gone.
    fn actor_owner(&self, actor: ActorId) -> GuildResult<Executor>;

    /// Whether `actor` is still connected.
    fn is_live(&self, actor: ActorId) -> bool;

    /// Runtime used to spawn background and bookkeeping tasks.
    fn runtime(&self) -> Handle;

    /// Ticks elapsed since the host started.
    fn current_tick(&self) -> u64;
}

/// Read access to live actors' state, valid on the actor's owning context.
pub trait ActorLocator: Send + Sync {
    fn location_of(&self, actor: ActorId) -> Option<Location>;
    fn name_of(&self, actor: ActorId) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_once_runs_a_single_time_across_clones() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = Task::once(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let copy = task.clone();
        assert!(task.run());
        assert!(!copy.run());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_task_does_not_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = Task::repeating(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            3,
        );
        assert!(task.run());
        assert!(task.run());
        task.handle().cancel();
        assert!(!task.run());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(task.period(), Some(3));
    }

    #[test]
    fn test_owner_clock_advances() {
        let clock = OwnerClock::default();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.clone().advance(), 2);
        assert_eq!(clock.now(), 2);
    }
}
