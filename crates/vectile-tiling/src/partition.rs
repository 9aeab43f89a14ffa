//! Core partitioner: distributes independent work units across execution
//! units with ceiling division and an explicit tail share.

use crate::error::{Result, TilingError};

/// Documented upper bound on execution units per launch. Capability
/// descriptors above this are rejected at planner construction instead of
/// silently truncating offset tables.
pub const MAX_CORES: usize = 64;

pub(crate) fn ceil_div(a: u64, b: u64) -> u64 {
    debug_assert!(b > 0);
    a.div_ceil(b)
}

/// First-level work distribution across cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorePartition {
    /// Units given to each of the first `used_cores - 1` cores.
    pub per_core: u64,
    /// Cores that actually receive work; the rest idle.
    pub used_cores: usize,
    /// The last used core's (possibly smaller) share.
    pub tail: u64,
}

/// Contiguous unit range owned by one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRange {
    pub start: u64,
    pub len: u64,
}

/// Distribute `total` units over at most `core_count` cores.
///
/// `used_cores` may come out below `core_count` for small problems; idle
/// cores are preferred over empty shares.
pub fn partition_units(total: u64, core_count: usize) -> CorePartition {
    debug_assert!(total >= 1 && core_count >= 1);
    let per_core = ceil_div(total, core_count as u64);
    let used_cores = ceil_div(total, per_core) as usize;
    let tail = total - per_core * (used_cores as u64 - 1);
    CorePartition {
        per_core,
        used_cores,
        tail,
    }
}

impl CorePartition {
    /// Units assigned to `core` (must be below `used_cores`).
    pub fn units_for(&self, core: usize) -> u64 {
        debug_assert!(core < self.used_cores);
        if core + 1 == self.used_cores {
            self.tail
        } else {
            self.per_core
        }
    }

    /// Per-core (start, len) table, sized at `used_cores`.
    pub fn ranges(&self) -> Vec<CoreRange> {
        (0..self.used_cores)
            .map(|core| CoreRange {
                start: self.per_core * core as u64,
                len: self.units_for(core),
            })
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.per_core * (self.used_cores as u64 - 1) + self.tail
    }
}

/// Second-level split of one core's share into fixed-size passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSplit {
    pub loops: u64,
    /// Units processed by the final pass; equal to `per_pass` when the share
    /// divides evenly, zero only when the share itself is zero.
    pub tail: u64,
}

/// Split `share` units into passes of `per_pass` with an explicit tail.
pub fn split_loops(share: u64, per_pass: u64) -> LoopSplit {
    debug_assert!(per_pass >= 1);
    if share == 0 {
        return LoopSplit { loops: 0, tail: 0 };
    }
    let loops = ceil_div(share, per_pass);
    let tail = share - per_pass * (loops - 1);
    LoopSplit { loops, tail }
}

/// Reject capability descriptors beyond the documented core bound.
pub fn check_core_bound(core_count: usize) -> Result<()> {
    if core_count == 0 || core_count > MAX_CORES {
        return Err(TilingError::Caps(format!(
            "core count {core_count} outside supported range 1..={MAX_CORES}"
        )));
    }
    Ok(())
}
