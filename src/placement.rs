//! Placement policies: which backend holds chunk `i`
//!
//! A policy is only consulted at upload time. Afterwards the manifest's
//! `placement` list is authoritative, so adding or removing backends never
//! invalidates files that are already stored.

/// Maps a chunk index onto a registry slot
pub trait PlacementPolicy: Send + Sync {
    /// Registry slot for chunk `index`. Must be a pure function of its inputs
    /// and return a value below `backends`.
    fn assign(&self, index: u64, backends: usize) -> usize;

    fn name(&self) -> &'static str;
}

/// Chunk `i` goes to backend `i mod N`
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl PlacementPolicy for RoundRobin {
    fn assign(&self, index: u64, backends: usize) -> usize {
        (index % backends as u64) as usize
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
