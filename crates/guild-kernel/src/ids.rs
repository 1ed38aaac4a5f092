//! Identity and spatial types shared across the kernel.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Deterministic identifier derived from a name (useful for fixtures).
            pub fn named(name: &str) -> Self {
                Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.8}", self.0)
            }
        }
    };
}

opaque_id!(
    /// Identity of a guild aggregate.
    GuildId
);
opaque_id!(
    /// Identity of a live actor (player session).
    ActorId
);
opaque_id!(
    /// Identity of a relation record.
    RelationId
);

/// A point in one of the host's worlds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Region containing this location.
    ///
    /// Blocks group into 16x16 chunks, and chunks group into
    /// `2^region_shift` square regions.
    pub fn region_key(&self, region_shift: u32) -> RegionKey {
        let chunk_x = (self.x.floor() as i64) >> 4;
        let chunk_z = (self.z.floor() as i64) >> 4;
        RegionKey {
            world: self.world.clone(),
            x: chunk_x >> region_shift,
            z: chunk_z >> region_shift,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:.1},{:.1},{:.1}", self.world, self.x, self.y, self.z)
    }
}

/// Key of an independently-owned slice of a world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionKey {
    pub world: String,
    pub x: i64,
    pub z: i64,
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.world, self.x, self.z)
    }
}
