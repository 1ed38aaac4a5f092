//! Scripted scenarios run against a live kernel.
//!
//! Each scenario boots its own kernel on the shared acton runtime, drives it
//! through the public services and checks the outcome against the store.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use acton_reactive::prelude::*;
use anyhow::{anyhow, ensure, Result};
use tracing::{info, warn};

use guild_kernel::{
    ActorId, ConfirmOutcome, ConfirmTarget, Entity, Guild, GuildError, GuildKernel,
    GuildKernelBuilder, HostLayout, KernelConfig, Location, MemoryEconomy, MemoryStore, Money,
    RelationStatus, RelationType,
};

use crate::catalog::LogPresenter;
use crate::report::ScenarioOutcome;

const STARTING_FUNDS: Money = Money(1_000_000);

/// A kernel plus the in-memory collaborators behind it.
pub struct World {
    pub kernel: GuildKernel,
    pub store: Arc<MemoryStore>,
    pub economy: Arc<MemoryEconomy>,
}

impl World {
    pub async fn boot(
        runtime: &mut ActorRuntime,
        config: &KernelConfig,
        layout: Option<HostLayout>,
        store: MemoryStore,
        presenter: Arc<LogPresenter>,
    ) -> Result<Self> {
        let store = Arc::new(store);
        let economy = Arc::new(MemoryEconomy::new("coins"));
        let mut builder = GuildKernelBuilder::new(config.clone())
            .store(store.clone())
            .economy(economy.clone())
            .presenter(presenter);
        if let Some(layout) = layout {
            builder = builder.layout(layout);
        }
        let kernel = builder.spawn(runtime).await?;
        Ok(Self {
            kernel,
            store,
            economy,
        })
    }

    pub fn player(&self, name: &str) -> ActorId {
        let actor = ActorId::named(name);
        self.economy.open_account(actor, STARTING_FUNDS);
        self.kernel
            .connect_actor(actor, name, Location::new("world", 0.0, 64.0, 0.0));
        actor
    }

    pub async fn guild(&self, name: &str) -> Result<(ActorId, Guild)> {
        let leader = self.player(&format!("{}-leader", name.to_lowercase()));
        let guild = self.kernel.guilds().create_guild(leader, name, None).await?;
        Ok((leader, guild))
    }

    pub fn open_relations(&self) -> usize {
        self.store
            .relation_snapshot()
            .iter()
            .filter(|r| matches!(r.status, RelationStatus::Pending | RelationStatus::Active))
            .count()
    }
}

/// Shared inputs for every scenario.
pub struct ScenarioEnv {
    pub config: KernelConfig,
    pub layout: Option<HostLayout>,
    pub presenter: Arc<LogPresenter>,
}

impl ScenarioEnv {
    async fn world(&self, runtime: &mut ActorRuntime, store: MemoryStore) -> Result<World> {
        World::boot(runtime, &self.config, self.layout, store, self.presenter.clone()).await
    }
}

/// Run every scenario in order.
pub async fn run_all(runtime: &mut ActorRuntime, env: &ScenarioEnv) -> Vec<ScenarioOutcome> {
    let mut outcomes = Vec::new();

    outcomes.push(
        timed("ally_lifecycle", async {
            let world = env.world(runtime, MemoryStore::new()).await?;
            let result = ally_lifecycle(&world).await;
            world.kernel.shutdown().await;
            result
        })
        .await,
    );
    outcomes.push(
        timed("concurrent_war", async {
            let store = MemoryStore::new().with_latency(Duration::from_millis(25));
            let world = env.world(runtime, store).await?;
            let result = concurrent_war(&world).await;
            world.kernel.shutdown().await;
            result
        })
        .await,
    );
    outcomes.push(
        timed("war_truce_neutral", async {
            let world = env.world(runtime, MemoryStore::new()).await?;
            let result = war_truce_neutral(&world).await;
            world.kernel.shutdown().await;
            result
        })
        .await,
    );
    outcomes.push(
        timed("admin_switches_confirmation", async {
            let world = env.world(runtime, MemoryStore::new()).await?;
            let result = admin_switches_confirmation(&world).await;
            world.kernel.shutdown().await;
            result
        })
        .await,
    );
    outcomes.push(
        timed("confirmation_timeout", async {
            let world = env.world(runtime, MemoryStore::new()).await?;
            let result = confirmation_timeout(&world).await;
            world.kernel.shutdown().await;
            result
        })
        .await,
    );
    outcomes.push(
        timed("global_work_exactly_once", async {
            let world = env.world(runtime, MemoryStore::new()).await?;
            let result = global_work_exactly_once(&world).await;
            world.kernel.shutdown().await;
            result
        })
        .await,
    );

    outcomes
}

async fn timed(name: &str, scenario: impl Future<Output = Result<()>>) -> ScenarioOutcome {
    let start = Instant::now();
    let result = scenario.await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            info!(scenario = name, duration_ms, "Scenario passed");
            ScenarioOutcome {
                name: name.to_string(),
                passed: true,
                detail: String::new(),
                duration_ms,
            }
        }
        Err(e) => {
            warn!(scenario = name, error = %e, "Scenario failed");
            ScenarioOutcome {
                name: name.to_string(),
                passed: false,
                detail: format!("{:#}", e),
                duration_ms,
            }
        }
    }
}

/// Alpha allies Beta, Beta accepts, Alpha deletes, Alpha then declares Beta an enemy.
async fn ally_lifecycle(world: &World) -> Result<()> {
    let (alpha_leader, alpha) = world.guild("Alpha").await?;
    let (beta_leader, beta) = world.guild("Beta").await?;
    let relations = world.kernel.relations();

    let ally = relations
        .propose(alpha_leader, beta.id, RelationType::Ally)
        .await?;
    ensure!(ally.status == RelationStatus::Pending, "proposal not pending");
    ensure!(ally.initiator_guild == alpha.id, "wrong initiator");

    let ally = relations.accept(beta_leader, ally.id).await?;
    ensure!(ally.status == RelationStatus::Active, "accept did not activate");

    let armed = relations.request_delete(alpha_leader, ally.id).await?;
    ensure!(armed == ConfirmOutcome::Armed, "first delete gave {:?}", armed);
    let confirmed = relations.request_delete(alpha_leader, ally.id).await?;
    ensure!(confirmed == ConfirmOutcome::Confirmed, "second delete gave {:?}", confirmed);
    ensure!(world.open_relations() == 0, "relation survived delete");

    relations
        .propose(alpha_leader, beta.id, RelationType::Enemy)
        .await?;
    ensure!(world.open_relations() == 1, "enemy proposal missing");
    Ok(())
}

/// Two members of Alpha declare war on Beta at the same time.
async fn concurrent_war(world: &World) -> Result<()> {
    let (alpha_leader, alpha) = world.guild("Alpha").await?;
    let (_beta_leader, beta) = world.guild("Beta").await?;
    let officer = world.player("alpha-officer");
    world.kernel.guilds().invite(alpha_leader, officer).await?;
    world.kernel.guilds().join(officer, alpha.id).await?;
    world.kernel.guilds().promote(alpha_leader, officer).await?;

    let relations = world.kernel.relations();
    let (first, second) = tokio::join!(
        relations.propose(alpha_leader, beta.id, RelationType::War),
        relations.propose(officer, beta.id, RelationType::War),
    );

    let created = [&first, &second].iter().filter(|r| r.is_ok()).count();
    ensure!(created == 1, "{} proposals succeeded", created);
    let refused = first.err().or(second.err());
    ensure!(
        refused == Some(GuildError::AlreadyExists(Entity::Relation)),
        "loser saw {:?}",
        refused
    );
    ensure!(world.open_relations() == 1, "pair has {} open relations", world.open_relations());
    Ok(())
}

/// War, truce offered and accepted, truce ended: one record throughout.
async fn war_truce_neutral(world: &World) -> Result<()> {
    let (alpha_leader, _alpha) = world.guild("Alpha").await?;
    let (beta_leader, beta) = world.guild("Beta").await?;
    let relations = world.kernel.relations();

    let war = relations
        .propose(alpha_leader, beta.id, RelationType::War)
        .await?;
    relations.accept(beta_leader, war.id).await?;

    let truce = relations.propose_truce(beta_leader, war.id).await?;
    ensure!(world.store.relation_snapshot().len() == 1, "war not replaced in place");
    relations.accept(alpha_leader, truce.id).await?;

    let neutral = relations.end_truce(beta_leader, truce.id).await?;
    ensure!(neutral.kind == RelationType::Neutral, "truce ended as {}", neutral.kind);
    ensure!(world.store.relation_snapshot().len() == 1, "more than one record");
    Ok(())
}

/// An admin arms a delete, switches to a different relation, then confirms.
async fn admin_switches_confirmation(world: &World) -> Result<()> {
    let (alpha_leader, _alpha) = world.guild("Alpha").await?;
    let (beta_leader, beta) = world.guild("Beta").await?;
    let (gamma_leader, gamma) = world.guild("Gamma").await?;
    let admin = world.player("admin");
    let relations = world.kernel.relations();

    let first = relations
        .propose(alpha_leader, beta.id, RelationType::Ally)
        .await?;
    relations.accept(beta_leader, first.id).await?;
    let second = relations
        .propose(alpha_leader, gamma.id, RelationType::Ally)
        .await?;
    relations.accept(gamma_leader, second.id).await?;

    relations.request_admin_delete(admin, first.id).await?;
    let switched = relations.request_admin_delete(admin, second.id).await?;
    let expected = ConfirmOutcome::Replaced {
        previous: ConfirmTarget::DeleteRelation(first.id),
    };
    ensure!(switched == expected, "switch outcome {:?}", switched);

    let confirmed = world.kernel.confirm(admin).await?;
    ensure!(
        confirmed == Some(ConfirmTarget::DeleteRelation(second.id)),
        "confirmed {:?}",
        confirmed
    );
    let remaining = world.store.relation_snapshot();
    ensure!(
        remaining.len() == 1 && remaining[0].id == first.id,
        "first relation should be untouched"
    );
    Ok(())
}

/// A window left alone expires; the next request opens a fresh one.
async fn confirmation_timeout(world: &World) -> Result<()> {
    let (leader, _guild) = world.guild("Alpha").await?;
    let guilds = world.kernel.guilds();

    let armed = guilds.disband_guild(leader).await?;
    ensure!(armed == ConfirmOutcome::Armed, "disband gave {:?}", armed);
    tokio::time::sleep(Duration::from_millis(20)).await;
    world
        .kernel
        .advance_ticks(world.kernel.config().confirmations.timeout_ticks)
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let pending = world.kernel.pending_confirmation(leader).await?;
    ensure!(pending.is_none(), "window still open: {:?}", pending);
    let rearmed = guilds.disband_guild(leader).await?;
    ensure!(rearmed == ConfirmOutcome::Armed, "stale window reused: {:?}", rearmed);
    ensure!(world.store.guild_count() == 1, "guild disbanded without confirmation");
    Ok(())
}

/// Submissions from many tasks each run exactly once on the authority.
async fn global_work_exactly_once(world: &World) -> Result<()> {
    const SUBMISSIONS: usize = 500;
    let runs = Arc::new(AtomicUsize::new(0));

    let mut submitters = Vec::new();
    for _ in 0..10 {
        let router = world.kernel.router().clone();
        let runs = runs.clone();
        submitters.push(tokio::spawn(async move {
            for _ in 0..SUBMISSIONS / 10 {
                let runs = runs.clone();
                router.run_on_global_authority(move || {
                    if guild_kernel::is_owning_thread() {
                        runs.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        }));
    }
    for submitter in submitters {
        submitter.await.map_err(|e| anyhow!("submitter failed: {}", e))?;
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while runs.load(Ordering::SeqCst) < SUBMISSIONS && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    let ran = runs.load(Ordering::SeqCst);
    ensure!(ran == SUBMISSIONS, "{} of {} jobs ran on the authority", ran, SUBMISSIONS);
    Ok(())
}
