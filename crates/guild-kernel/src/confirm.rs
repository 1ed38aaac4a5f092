//! Confirmation protocol for destructive actions.
//!
//! Each actor holds at most one pending confirmation. Asking again for the
//! same target confirms it; asking for a different target replaces it. An
//! armed confirmation expires after a fixed number of ticks. The expiry timer
//! is advisory: it only clears the entry if the entry is still the one it was
//! armed for.
//!
//! All methods run on the global authority.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::affinity::AuthorityCell;
use crate::ids::{ActorId, GuildId, RelationId};
use crate::presenter::{Notice, Presenter};
use crate::router::TaskRouter;
use crate::scheduler::TaskHandle;

/// What a confirmation guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmTarget {
    DeleteRelation(RelationId),
    DisbandGuild(GuildId),
}

impl fmt::Display for ConfirmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmTarget::DeleteRelation(id) => write!(f, "relation:{}", id),
            ConfirmTarget::DisbandGuild(id) => write!(f, "guild:{}", id),
        }
    }
}

/// Result of [`ConfirmationManager::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// A fresh window opened for the target
    Armed,
    /// A different pending target was dropped and this one armed
    Replaced { previous: ConfirmTarget },
    /// Second request for the same target; the caller runs the action
    Confirmed,
}

#[derive(Debug)]
struct PendingConfirmation {
    target: ConfirmTarget,
    generation: u64,
    armed_tick: u64,
    timer: TaskHandle,
}

pub struct ConfirmationManager {
    pending: AuthorityCell<HashMap<ActorId, PendingConfirmation>>,
    generation: AtomicU64,
    router: TaskRouter,
    presenter: Arc<dyn Presenter>,
    timeout_ticks: u64,
    this: Weak<ConfirmationManager>,
}

impl fmt::Debug for ConfirmationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationManager")
            .field("timeout_ticks", &self.timeout_ticks)
            .finish()
    }
}

impl ConfirmationManager {
    pub fn new(router: TaskRouter, presenter: Arc<dyn Presenter>, timeout_ticks: u64) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            pending: AuthorityCell::new("confirmation registry", HashMap::new()),
            generation: AtomicU64::new(0),
            router,
            presenter,
            timeout_ticks: timeout_ticks.max(1),
            this: this.clone(),
        })
    }

    pub fn timeout_ticks(&self) -> u64 {
        self.timeout_ticks
    }

    pub fn request(&self, actor: ActorId, target: ConfirmTarget) -> ConfirmOutcome {
        let existing = self.pending.with(|pending| pending.remove(&actor));

        if let Some(previous) = &existing {
            previous.timer.cancel();
            if previous.target == target {
                info!(actor = %actor, target = %target, "Confirmation accepted");
                return ConfirmOutcome::Confirmed;
            }
        }

        self.arm(actor, target);
        match existing {
            Some(previous) => {
                debug!(actor = %actor, previous = %previous.target, target = %target, "Confirmation replaced");
                self.presenter.notify(
                    actor,
                    Notice::new("confirm.replaced")
                        .arg("previous", previous.target)
                        .arg("target", target),
                );
                ConfirmOutcome::Replaced {
                    previous: previous.target,
                }
            }
            None => ConfirmOutcome::Armed,
        }
    }

    /// Consume the actor's pending confirmation, if any.
    pub fn confirm(&self, actor: ActorId) -> Option<ConfirmTarget> {
        let entry = self.pending.with(|pending| pending.remove(&actor))?;
        entry.timer.cancel();
        info!(actor = %actor, target = %entry.target, "Confirmation accepted");
        Some(entry.target)
    }

    pub fn cancel(&self, actor: ActorId) -> Option<ConfirmTarget> {
        let entry = self.pending.with(|pending| pending.remove(&actor))?;
        entry.timer.cancel();
        debug!(actor = %actor, target = %entry.target, "Confirmation cancelled");
        self.presenter
            .notify(actor, Notice::new("confirm.cancelled").arg("target", entry.target));
        Some(entry.target)
    }

    pub fn pending(&self, actor: ActorId) -> Option<ConfirmTarget> {
        self.pending.with(|pending| pending.get(&actor).map(|p| p.target))
    }

    /// Tick the actor's current window was opened on.
    pub fn armed_at(&self, actor: ActorId) -> Option<u64> {
        self.pending.with(|pending| pending.get(&actor).map(|p| p.armed_tick))
    }

    /// Drop the actor's entry silently, e.g. on disconnect.
    pub fn clear_actor(&self, actor: ActorId) {
        if let Some(entry) = self.pending.with(|pending| pending.remove(&actor)) {
            entry.timer.cancel();
        }
    }

    /// Drop every pending entry.
    pub fn clear_all(&self) -> usize {
        let drained: Vec<PendingConfirmation> =
            self.pending.with(|pending| pending.drain().map(|(_, p)| p).collect());
        for entry in &drained {
            entry.timer.cancel();
        }
        drained.len()
    }

    fn arm(&self, actor: ActorId, target: ConfirmTarget) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.this.clone();
        let timer = self.router.run_later(
            move || {
                if let Some(manager) = this.upgrade() {
                    manager.expire(actor, generation);
                }
            },
            self.timeout_ticks,
        );

        let armed_tick = self.router.current_tick();
        self.pending.with(|pending| {
            pending.insert(
                actor,
                PendingConfirmation {
                    target,
                    generation,
                    armed_tick,
                    timer,
                },
            );
        });
        debug!(actor = %actor, target = %target, generation, "Confirmation armed");
        self.presenter.notify(
            actor,
            Notice::new("confirm.armed")
                .arg("target", target)
                .arg("ticks", self.timeout_ticks),
        );
    }

    fn expire(&self, actor: ActorId, generation: u64) {
        let expired = self.pending.with(|pending| {
            let current = pending.get(&actor).map(|entry| entry.generation);
            if current == Some(generation) {
                pending.remove(&actor)
            } else {
                None
            }
        });
        if let Some(entry) = expired {
            debug!(actor = %actor, target = %entry.target, "Confirmation expired");
            self.presenter
                .notify(actor, Notice::new("confirm.expired").arg("target", entry.target));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostLayout, SchedulerHost};
    use crate::presenter::RecordingPresenter;
    use crate::topology::TopologyDetector;
    use acton_reactive::prelude::ActonApp;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_same_target_twice_confirms_once() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::SingleAuthority).await;
        let router = TaskRouter::new(&TopologyDetector::new(host.clone()), host.clone());
        let presenter = Arc::new(RecordingPresenter::new());
        let manager = ConfirmationManager::new(router.clone(), presenter.clone(), 200);

        let actor = ActorId::named("admin");
        let target = ConfirmTarget::DeleteRelation(RelationId::named("r1"));

        let m = manager.clone();
        let outcomes = router
            .call(move || (m.request(actor, target), m.request(actor, target), m.pending(actor)))
            .await
            .unwrap();
        assert_eq!(outcomes.0, ConfirmOutcome::Armed);
        assert_eq!(outcomes.1, ConfirmOutcome::Confirmed);
        assert_eq!(outcomes.2, None);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_timeout_clears_and_next_request_rearms() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::SingleAuthority).await;
        let router = TaskRouter::new(&TopologyDetector::new(host.clone()), host.clone());
        let presenter = Arc::new(RecordingPresenter::new());
        let manager = ConfirmationManager::new(router.clone(), presenter.clone(), 5);

        let actor = ActorId::named("leader");
        let target = ConfirmTarget::DisbandGuild(GuildId::named("alpha"));

        let m = manager.clone();
        assert_eq!(
            router.call(move || m.request(actor, target)).await.unwrap(),
            ConfirmOutcome::Armed
        );
        settle().await;
        host.advance(5).await;
        settle().await;

        let m = manager.clone();
        assert_eq!(router.call(move || m.pending(actor)).await.unwrap(), None);
        assert_eq!(presenter.count("confirm.expired"), 1);

        let m = manager.clone();
        assert_eq!(
            router.call(move || m.request(actor, target)).await.unwrap(),
            ConfirmOutcome::Armed
        );

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_clear_newer_window() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::SingleAuthority).await;
        let router = TaskRouter::new(&TopologyDetector::new(host.clone()), host.clone());
        let presenter = Arc::new(RecordingPresenter::new());
        let manager = ConfirmationManager::new(router.clone(), presenter.clone(), 4);

        let actor = ActorId::named("leader");
        let first = ConfirmTarget::DeleteRelation(RelationId::named("r1"));
        let second = ConfirmTarget::DeleteRelation(RelationId::named("r2"));

        let m = manager.clone();
        router.call(move || m.request(actor, first)).await.unwrap();
        settle().await;
        host.advance(2).await;

        let m = manager.clone();
        let outcome = router.call(move || m.request(actor, second)).await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Replaced { previous: first });
        settle().await;

        // First window's deadline passes; the second is still inside its own
        host.advance(2).await;
        settle().await;
        let m = manager.clone();
        assert_eq!(router.call(move || m.pending(actor)).await.unwrap(), Some(second));

        host.advance(2).await;
        settle().await;
        let m = manager.clone();
        assert_eq!(router.call(move || m.pending(actor)).await.unwrap(), None);
        assert_eq!(presenter.count("confirm.expired"), 1);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_cancel_and_clear() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::SingleAuthority).await;
        let router = TaskRouter::new(&TopologyDetector::new(host.clone()), host.clone());
        let presenter = Arc::new(RecordingPresenter::new());
        let manager = ConfirmationManager::new(router.clone(), presenter.clone(), 200);

        let a = ActorId::named("a");
        let b = ActorId::named("b");
        let target = ConfirmTarget::DisbandGuild(GuildId::named("g"));

        let m = manager.clone();
        let (cancelled, cleared) = router
            .call(move || {
                m.request(a, target);
                m.request(b, target);
                let cancelled = m.cancel(a);
                let cleared = m.clear_all();
                (cancelled, cleared)
            })
            .await
            .unwrap();
        assert_eq!(cancelled, Some(target));
        assert_eq!(cleared, 1);
        assert!(presenter.all_on_owner());

        let _ = runtime.shutdown_all().await;
    }
}
