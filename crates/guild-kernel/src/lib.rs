//! Guild Kernel: owner-thread task routing for a partitioned game server
//!
//! Game state is owned by threads: a single tick thread on classic hosts, or
//! a global region plus per-region threads on partitioned hosts. This crate
//! detects which model it runs under, routes every unit of work to the owner
//! of the state it touches, and builds the guild system on top of that:
//! inter-guild relations, membership, a guild bank and a confirmation
//! protocol for destructive actions.
//!
//! Store I/O never blocks an owner. Each write runs off-owner, and its
//! result is applied back on the global authority.

pub mod actors;
pub mod affinity;
pub mod clock;
pub mod config;
pub mod confirm;
pub mod context;
pub mod directory;
pub mod economy;
pub mod error;
pub mod guild;
pub mod host;
pub mod ids;
pub mod kernel;
pub mod messages;
pub mod pipeline;
pub mod presenter;
pub mod relation;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod topology;

pub use affinity::{current_owner, is_owning_thread, OwnerLabel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KernelConfig, LayoutKind};
pub use confirm::{ConfirmOutcome, ConfirmTarget, ConfirmationManager};
pub use economy::{Economy, MemoryEconomy};
pub use error::{Entity, GuildError, GuildResult};
pub use guild::{Guild, GuildMember, GuildRole, Money};
pub use host::{HostLayout, SchedulerHost};
pub use ids::{ActorId, GuildId, Location, RelationId};
pub use kernel::{GuildKernel, GuildKernelBuilder};
pub use pipeline::{OpContext, Pipeline};
pub use presenter::{Notice, NullPresenter, Presenter, RecordingPresenter};
pub use relation::{GuildRelation, RelationService, RelationStatus, RelationType};
pub use router::TaskRouter;
pub use scheduler::{HostScheduler, TaskHandle};
pub use service::GuildService;
pub use store::{GuildStore, MemoryStore, StoreError};
pub use topology::{Topology, TopologyDetector};
