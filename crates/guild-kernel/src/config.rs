//! Configuration types for the kernel.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guild::Money;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level kernel configuration.
///
/// Loaded from TOML at runtime; every section falls back to its defaults, so
/// an empty document is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Owner threads and tick cadence
    pub scheduler: SchedulerConfig,

    /// Relation lifetime
    pub relations: RelationConfig,

    /// Destructive-action confirmation window
    pub confirmations: ConfirmationConfig,

    /// Guild rules: costs, levels, capacity, naming
    pub guilds: GuildSettings,
}

impl KernelConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

/// Which host layout to boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// One global tick thread owns everything
    #[default]
    Single,
    /// A global region plus a pool of region threads
    Partitioned,
    /// A host whose capabilities cannot be probed
    Opaque,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub layout: LayoutKind,

    /// Tick length in milliseconds (50 = 20 ticks per second)
    pub tick_interval_ms: u64,

    /// Drive ticks from a background timer; when false ticks are advanced manually
    pub auto_tick: bool,

    /// Region owner threads under the partitioned layout
    pub region_threads: usize,

    /// log2 of region width in chunks
    pub region_shift: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            layout: LayoutKind::Single,
            tick_interval_ms: 50,
            auto_tick: true,
            region_threads: 4,
            region_shift: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationConfig {
    /// Days from creation after which a relation reads as expired
    pub expiry_days: i64,

    /// Ticks between sweeps that evict expired relations from the cache
    pub sweep_interval_ticks: u64,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            expiry_days: 7,
            // once a minute at 20 ticks per second
            sweep_interval_ticks: 1_200,
        }
    }
}

impl RelationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::days(self.expiry_days.max(0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Ticks before an unanswered confirmation is dropped
    pub timeout_ticks: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        // 10 seconds at 20 ticks per second
        Self { timeout_ticks: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub creation_cost: Money,
    pub max_level: u8,
    pub base_member_capacity: usize,
    pub members_per_level: usize,
    /// `level_costs[n - 1]` is the price of going from level n to n + 1
    pub level_costs: Vec<Money>,
    pub name_min_len: usize,
    pub name_max_len: usize,
    pub tag_max_len: usize,
    pub invite_timeout_ticks: u64,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            creation_cost: Money(10_000),
            max_level: 10,
            base_member_capacity: 10,
            members_per_level: 5,
            level_costs: [
                50_000u64, 100_000, 200_000, 350_000, 500_000, 750_000, 1_000_000, 1_500_000,
                2_000_000,
            ]
            .into_iter()
            .map(Money)
            .collect(),
            name_min_len: 3,
            name_max_len: 24,
            tag_max_len: 5,
            invite_timeout_ticks: 1_200,
        }
    }
}

impl GuildSettings {
    pub fn member_capacity(&self, level: u8) -> usize {
        let bonus_levels = usize::from(level.max(1) - 1);
        self.base_member_capacity + self.members_per_level * bonus_levels
    }

    /// Price of the next level, or `None` at the cap.
    pub fn level_cost(&self, current_level: u8) -> Option<Money> {
        if current_level >= self.max_level {
            return None;
        }
        let index = usize::from(current_level.max(1) - 1);
        Some(
            self.level_costs
                .get(index)
                .or_else(|| self.level_costs.last())
                .copied()
                .unwrap_or(Money::ZERO),
        )
    }
}
