//! # Entity Identifiers
//!
//! Entities are lightweight identifiers consisting of:
//! - An index into component slots
//! - A generation counter for safe reuse
//!
//! Every peer allocates entities in the same order for replicated objects, so
//! the raw id doubles as the network identity used in topic suffixes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into component slots
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Rebuilds an ID from its raw wire value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out entity IDs, recycling freed indices with a bumped generation.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    /// Current generation per index.
    generations: Vec<u32>,
    /// Whether the slot at each index is alive.
    alive: Vec<bool>,
    /// Free list of indices for reuse.
    free_indices: Vec<u32>,
}

impl EntityAllocator {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh ID.
    pub fn allocate(&mut self) -> EntityId {
        if let Some(index) = self.free_indices.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return EntityId::new(index, self.generations[slot]);
        }

        let index = u32::try_from(self.generations.len()).unwrap_or(u32::MAX);
        self.generations.push(0);
        self.alive.push(true);
        EntityId::new(index, 0)
    }

    /// Frees an ID. Returns false if it was stale or already free.
    pub fn free(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = id.index() as usize;
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free_indices.push(id.index());
        true
    }

    /// Returns true if `id` refers to a live entity of the current generation.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        let slot = id.index() as usize;
        !id.is_null()
            && self.alive.get(slot).copied().unwrap_or(false)
            && self.generations[slot] == id.generation()
    }

    /// Number of live entities.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|alive| **alive).count()
    }
}
