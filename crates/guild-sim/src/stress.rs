//! Concurrent-proposer stress run.
//!
//! Guild leaders fire relation proposals at random counterparts, all at
//! once, against a store with artificial latency. The only invariant checked
//! is pair uniqueness: no pair may ever hold two open relations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use acton_reactive::prelude::*;
use anyhow::{ensure, Result};
use futures::future::join_all;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use guild_kernel::relation::PairKey;
use guild_kernel::{
    ActorId, GuildError, GuildId, HostLayout, KernelConfig, MemoryStore, RelationStatus,
    RelationType,
};

use crate::catalog::LogPresenter;
use crate::report::StressReport;
use crate::scenario::World;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub guilds: usize,
    pub proposers: usize,
    pub rounds: usize,
    pub latency: Duration,
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            guilds: 6,
            proposers: 8,
            rounds: 20,
            latency: Duration::from_millis(5),
            seed: 42,
        }
    }
}

const KINDS: [RelationType; 3] = [RelationType::Ally, RelationType::Enemy, RelationType::War];

/// One planned proposal: which leader, towards which guild, what kind.
type Planned = (ActorId, GuildId, RelationType);

fn plan(config: &StressConfig, leaders: &[(ActorId, GuildId)]) -> Vec<Vec<Planned>> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    (0..config.proposers)
        .map(|_| {
            (0..config.rounds)
                .map(|_| {
                    let from = rng.random_range(0..leaders.len());
                    let mut to = rng.random_range(0..leaders.len() - 1);
                    if to >= from {
                        to += 1;
                    }
                    let kind = KINDS[rng.random_range(0..KINDS.len())];
                    (leaders[from].0, leaders[to].1, kind)
                })
                .collect()
        })
        .collect()
}

pub async fn run(
    runtime: &mut ActorRuntime,
    kernel_config: &KernelConfig,
    layout: Option<HostLayout>,
    presenter: Arc<LogPresenter>,
    config: &StressConfig,
) -> Result<StressReport> {
    ensure!(config.guilds >= 2, "stress run needs at least two guilds");

    let store = MemoryStore::new().with_latency(config.latency);
    let world = World::boot(runtime, kernel_config, layout, store, presenter).await?;

    let mut leaders = Vec::with_capacity(config.guilds);
    for n in 0..config.guilds {
        let (leader, guild) = world.guild(&format!("Guild {}", n)).await?;
        leaders.push((leader, guild.id));
    }
    let plan = plan(config, &leaders);

    info!(
        guilds = config.guilds,
        proposers = config.proposers,
        rounds = config.rounds,
        seed = config.seed,
        "Stress run started"
    );
    let start = Instant::now();

    let relations = world.kernel.relations();
    let lanes = plan.into_iter().map(|lane| async move {
        let mut tally = (0usize, 0usize, 0usize);
        for (actor, target, kind) in lane {
            match relations.propose(actor, target, kind).await {
                Ok(_) => tally.0 += 1,
                Err(GuildError::AlreadyExists(_)) => tally.1 += 1,
                Err(e) => {
                    debug!(error = %e, "Proposal refused");
                    tally.2 += 1;
                }
            }
        }
        tally
    });
    let tallies = join_all(lanes).await;

    let mut report = StressReport {
        guilds: config.guilds,
        proposers: config.proposers,
        rounds: config.rounds,
        seed: config.seed,
        duration_ms: start.elapsed().as_millis() as u64,
        ..StressReport::default()
    };
    for (created, already, other) in tallies {
        report.created += created;
        report.already_exists += already;
        report.other_failures += other;
    }
    report.violations = count_violations(&world);

    world.kernel.shutdown().await;
    info!(
        created = report.created,
        already_exists = report.already_exists,
        violations = report.violations,
        "Stress run finished"
    );
    Ok(report)
}

fn count_violations(world: &World) -> usize {
    let mut open: HashMap<PairKey, usize> = HashMap::new();
    for relation in world.store.relation_snapshot() {
        if matches!(relation.status, RelationStatus::Pending | RelationStatus::Active) {
            *open.entry(relation.pair()).or_default() += 1;
        }
    }
    open.values().filter(|count| **count > 1).count()
}
