//! Shared harness for the kernel integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use acton_reactive::prelude::*;
use chrono::Utc;

use guild_kernel::{
    ActorId, Guild, GuildKernel, GuildKernelBuilder, HostLayout, KernelConfig, Location,
    ManualClock, MemoryEconomy, MemoryStore, Money, RecordingPresenter,
};

pub const OPENING_BALANCE: Money = Money(1_000_000);

pub struct Harness {
    pub runtime: ActorRuntime,
    pub kernel: GuildKernel,
    pub presenter: Arc<RecordingPresenter>,
    pub store: Arc<MemoryStore>,
    pub economy: Arc<MemoryEconomy>,
    pub clock: Arc<ManualClock>,
}

/// Config for tests: ticks are advanced by hand and windows are short.
pub fn test_config() -> KernelConfig {
    let mut config = KernelConfig::default();
    config.scheduler.auto_tick = false;
    config.confirmations.timeout_ticks = 20;
    config.guilds.invite_timeout_ticks = 40;
    config.relations.sweep_interval_ticks = 10;
    config
}

impl Harness {
    pub async fn start(layout: HostLayout) -> Self {
        Self::with_store(layout, MemoryStore::new()).await
    }

    pub async fn with_store(layout: HostLayout, store: MemoryStore) -> Self {
        let mut runtime = ActonApp::launch_async().await;
        let presenter = Arc::new(RecordingPresenter::new());
        let store = Arc::new(store);
        let economy = Arc::new(MemoryEconomy::new("coins"));
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let kernel = GuildKernelBuilder::new(test_config())
            .layout(layout)
            .store(store.clone())
            .economy(economy.clone())
            .presenter(presenter.clone())
            .clock(clock.clone())
            .spawn(&mut runtime)
            .await
            .expect("kernel should start");

        Self {
            runtime,
            kernel,
            presenter,
            store,
            economy,
            clock,
        }
    }

    /// Connect an actor with a funded account.
    pub fn player(&self, name: &str) -> ActorId {
        let actor = ActorId::named(name);
        self.economy.open_account(actor, OPENING_BALANCE);
        self.kernel
            .connect_actor(actor, name, Location::new("world", 0.0, 64.0, 0.0));
        actor
    }

    /// A fresh guild led by a new player named after it.
    pub async fn guild(&self, name: &str) -> (ActorId, Guild) {
        let leader = self.player(&format!("{}-leader", name));
        let guild = self
            .kernel
            .guilds()
            .create_guild(leader, name, None)
            .await
            .expect("guild should be created");
        (leader, guild)
    }

    /// Add `name` to the leader's guild through invite and join.
    pub async fn recruit(&self, leader: ActorId, guild: &Guild, name: &str) -> ActorId {
        let actor = self.player(name);
        self.kernel
            .guilds()
            .invite(leader, actor)
            .await
            .expect("invite should be sent");
        self.kernel
            .guilds()
            .join(actor, guild.id)
            .await
            .expect("join should succeed");
        actor
    }

    /// Advance ticks and give spawned submissions a moment to land.
    pub async fn ticks(&self, n: u64) {
        settle().await;
        self.kernel.advance_ticks(n).await;
        settle().await;
    }

    pub async fn stop(mut self) {
        self.kernel.shutdown().await;
        let _ = self.runtime.shutdown_all().await;
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
