//! Scheduler host: owner actors laid out the way a game server lays out its
//! threads.
//!
//! The host spawns one global owner and, under the partitioned layout, a
//! fixed pool of region owners. It drives ticks, tracks live actors and
//! their locations, and advertises what it can do through
//! [`CapabilityProbe`] and [`HostScheduler`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use acton_reactive::prelude::*;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::actors::OwnerActor;
use crate::affinity::OwnerLabel;
use crate::config::{LayoutKind, SchedulerConfig};
use crate::error::{Entity, GuildError, GuildResult};
use crate::ids::{ActorId, Location, RegionKey};
use crate::messages::{DrainTimers, Tick};
use crate::scheduler::{ActorLocator, Executor, HostScheduler, OwnerClock};
use crate::topology::{CapabilityProbe, Marker, ProbeError};

/// Threading layout to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLayout {
    /// One global owner
    SingleAuthority,
    /// A global region owner plus `region_threads` region owners
    Partitioned {
        region_threads: usize,
        region_shift: u32,
    },
    /// One global owner behind capabilities that cannot be probed
    Opaque,
}

impl HostLayout {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        match config.layout {
            LayoutKind::Single => HostLayout::SingleAuthority,
            LayoutKind::Partitioned => HostLayout::Partitioned {
                region_threads: config.region_threads.max(1),
                region_shift: config.region_shift,
            },
            LayoutKind::Opaque => HostLayout::Opaque,
        }
    }
}

#[derive(Debug, Clone)]
struct ActorRecord {
    name: String,
    location: Location,
}

pub struct SchedulerHost {
    layout: HostLayout,
    global: Executor,
    regions: Vec<Executor>,
    owners: Vec<ActorHandle>,
    actors: DashMap<ActorId, ActorRecord>,
    clock: OwnerClock,
    runtime: Handle,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SchedulerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHost")
            .field("layout", &self.layout)
            .field("regions", &self.regions.len())
            .field("live_actors", &self.actors.len())
            .field("tick", &self.clock.now())
            .finish()
    }
}

impl SchedulerHost {
    /// Spawn the owners for `layout` in the given runtime.
    pub async fn spawn(runtime: &mut ActorRuntime, layout: HostLayout) -> Arc<Self> {
        let clock = OwnerClock::default();
        let tokio_handle = Handle::current();

        let global_owner = OwnerActor::new(OwnerLabel::Global).spawn(runtime, 0).await;
        let global = Executor::new(
            OwnerLabel::Global,
            global_owner.clone(),
            clock.clone(),
            tokio_handle.clone(),
        );
        let mut owners = vec![global_owner];

        let mut regions = Vec::new();
        if let HostLayout::Partitioned { region_threads, .. } = layout {
            for index in 0..region_threads.max(1) {
                let label = OwnerLabel::Region(index);
                let handle = OwnerActor::new(label).spawn(runtime, 0).await;
                regions.push(Executor::new(label, handle.clone(), clock.clone(), tokio_handle.clone()));
                owners.push(handle);
            }
        }

        info!(?layout, owners = owners.len(), "Scheduler host started");

        Arc::new(Self {
            layout,
            global,
            regions,
            owners,
            actors: DashMap::new(),
            clock,
            runtime: tokio_handle,
            ticker: Mutex::new(None),
        })
    }

    pub fn layout(&self) -> HostLayout {
        self.layout
    }

    /// Advance `ticks` ticks, delivering each boundary to every owner in order.
    pub async fn advance(&self, ticks: u64) {
        for _ in 0..ticks {
            let tick = self.clock.advance();
            for owner in &self.owners {
                owner.send(Tick { tick }).await;
            }
            trace!(tick, "Tick delivered");
        }
    }

    /// Drive ticks from a timer until [`SchedulerHost::stop_ticker`].
    pub fn start_ticker(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick of a tokio interval completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                match weak.upgrade() {
                    Some(host) => host.advance(1).await,
                    None => break,
                }
            }
        });

        let mut slot = self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        debug!(interval_ms = interval.as_millis() as u64, "Ticker started");
    }

    pub fn stop_ticker(&self) {
        let task = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            debug!("Ticker stopped");
        }
    }

    /// Drop every parked timer on every owner.
    pub async fn drain_timers(&self) {
        for owner in &self.owners {
            owner.send(DrainTimers).await;
        }
    }

    pub fn register_actor(&self, actor: ActorId, name: impl Into<String>, location: Location) {
        let name = name.into();
        debug!(actor = %actor, name = %name, location = %location, "Actor connected");
        self.actors.insert(actor, ActorRecord { name, location });
    }

    /// Move a live actor. Returns false if the actor is not connected.
    pub fn relocate_actor(&self, actor: ActorId, location: Location) -> bool {
        match self.actors.get_mut(&actor) {
            Some(mut record) => {
                trace!(actor = %actor, location = %location, "Actor moved");
                record.location = location;
                true
            }
            None => false,
        }
    }

    /// Forget an actor. Returns false if it was not connected.
    pub fn retire_actor(&self, actor: ActorId) -> bool {
        let removed = self.actors.remove(&actor).is_some();
        if removed {
            debug!(actor = %actor, "Actor retired");
        }
        removed
    }

    pub fn live_actors(&self) -> usize {
        self.actors.len()
    }

    fn region_index(&self, key: &RegionKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.regions.len().max(1) as u64) as usize
    }

    fn unavailable(affinity: &'static str, layout: HostLayout) -> GuildError {
        GuildError::SchedulerUnavailable {
            affinity,
            reason: format!("no {} scheduler under {:?}", affinity, layout),
        }
    }
}

impl CapabilityProbe for SchedulerHost {
    fn probe(&self, marker: Marker) -> Result<bool, ProbeError> {
        match self.layout {
            HostLayout::SingleAuthority => Ok(matches!(marker, Marker::TickThread)),
            HostLayout::Partitioned { .. } => Ok(matches!(
                marker,
                Marker::RegionizedScheduler | Marker::GlobalRegionScheduler
            )),
            HostLayout::Opaque => Err(ProbeError {
                marker,
                reason: "host does not expose scheduler capabilities".into(),
            }),
        }
    }
}

impl HostScheduler for SchedulerHost {
    fn authority(&self) -> Executor {
        self.global.clone()
    }

    fn global_region(&self) -> GuildResult<Executor> {
        match self.layout {
            HostLayout::Partitioned { .. } => Ok(self.global.clone()),
            layout => Err(Self::unavailable("global_region", layout)),
        }
    }

    fn region_at(&self, location: &Location) -> GuildResult<Executor> {
        match self.layout {
            HostLayout::Partitioned { region_shift, .. } if !self.regions.is_empty() => {
                let key = location.region_key(region_shift);
                Ok(self.regions[self.region_index(&key)].clone())
            }
            layout => Err(Self::unavailable("region", layout)),
        }
    }

    fn actor_owner(&self, actor: ActorId) -> GuildResult<Executor> {
        let location = self
            .actors
            .get(&actor)
            .map(|record| record.location.clone())
            .ok_or(GuildError::NotFound(Entity::Actor))?;
        self.region_at(&location)
    }

    fn is_live(&self, actor: ActorId) -> bool {
        self.actors.contains_key(&actor)
    }

    fn runtime(&self) -> Handle {
        self.runtime.clone()
    }

    fn current_tick(&self) -> u64 {
        self.clock.now()
    }
}

impl ActorLocator for SchedulerHost {
    fn location_of(&self, actor: ActorId) -> Option<Location> {
        self.actors.get(&actor).map(|record| record.location.clone())
    }

    fn name_of(&self, actor: ActorId) -> Option<String> {
        self.actors.get(&actor).map(|record| record.name.clone())
    }
}

impl Drop for SchedulerHost {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acton_reactive::prelude::ActonApp;

    fn partitioned() -> HostLayout {
        HostLayout::Partitioned {
            region_threads: 4,
            region_shift: 5,
        }
    }

    #[tokio::test]
    async fn test_single_authority_capabilities() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::SingleAuthority).await;

        assert_eq!(host.probe(Marker::TickThread).ok(), Some(true));
        assert_eq!(host.probe(Marker::RegionizedScheduler).ok(), Some(false));
        assert!(matches!(
            host.global_region(),
            Err(GuildError::SchedulerUnavailable { .. })
        ));
        assert_eq!(host.authority().label(), OwnerLabel::Global);

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_partitioned_routes_locations_to_regions() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, partitioned()).await;

        let here = Location::new("overworld", 10.0, 64.0, 10.0);
        let nearby = Location::new("overworld", 20.0, 64.0, 40.0);
        let a = host.region_at(&here).map(|e| e.label()).ok();
        let b = host.region_at(&nearby).map(|e| e.label()).ok();
        assert!(matches!(a, Some(OwnerLabel::Region(_))));
        assert_eq!(a, b);
        assert_eq!(host.global_region().map(|e| e.label()).ok(), Some(OwnerLabel::Global));

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_actor_registry_lifecycle() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, partitioned()).await;
        let actor = ActorId::named("steve");

        assert!(matches!(
            host.actor_owner(actor),
            Err(GuildError::NotFound(Entity::Actor))
        ));

        host.register_actor(actor, "Steve", Location::new("overworld", 0.0, 64.0, 0.0));
        assert!(host.is_live(actor));
        assert!(host.actor_owner(actor).is_ok());
        assert_eq!(host.name_of(actor).as_deref(), Some("Steve"));

        let far = Location::new("overworld", 90_000.0, 64.0, -40_000.0);
        assert!(host.relocate_actor(actor, far.clone()));
        assert_eq!(host.location_of(actor), Some(far));

        assert!(host.retire_actor(actor));
        assert!(!host.is_live(actor));
        assert!(!host.retire_actor(actor));

        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_opaque_probe_fails() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::Opaque).await;
        assert!(host.probe(Marker::TickThread).is_err());
        let _ = runtime.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_advance_moves_clock() {
        let mut runtime = ActonApp::launch_async().await;
        let host = SchedulerHost::spawn(&mut runtime, HostLayout::SingleAuthority).await;
        host.advance(3).await;
        assert_eq!(host.current_tick(), 3);
        let _ = runtime.shutdown_all().await;
    }
}
