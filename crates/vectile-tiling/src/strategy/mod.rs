//! Strategy registry and selector.
//!
//! Each strategy is a capability predicate plus a plan builder. Selection
//! walks the operator's fixed strategy table and takes the first capable
//! entry; predicates may overlap, the order is the tie-break. A problem no
//! strategy accepts is a hard error, never a silent fallback.

mod full_load;
mod outer_tiled;
mod recompute;
mod small_reduce;

use crate::error::{Result, TilingError};
use crate::ops::OpKind;
use crate::partition::{partition_units, CorePartition};
use crate::plan::{compose_tiling_key, PlanFields, PlanHeader, TilingPlan};
use crate::problem::ProblemDescriptor;
use serde::{Deserialize, Serialize};
use vectile_api::HardwareCaps;

/// Tiling strategy identifier; the offset is the variant digit of the tiling
/// key and must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Reduce extent at most the small-R threshold; tiles outer columns.
    SmallReduceTail,
    /// Reduce axis innermost and one full row resident in scratch.
    FullLoadAlongReduce,
    /// Reduce axis innermost, streamed in chunks with re-read per pass.
    RecomputeAlongReduce,
    /// Reduce axis strided, full reduce extent per column tile.
    OuterTiledFullLoad,
    /// Reduce axis strided and streamed; the last resort.
    OuterTiledRecompute,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::SmallReduceTail => "small_reduce_tail",
            StrategyKind::FullLoadAlongReduce => "full_load",
            StrategyKind::RecomputeAlongReduce => "recompute",
            StrategyKind::OuterTiledFullLoad => "outer_tiled_full_load",
            StrategyKind::OuterTiledRecompute => "outer_tiled_recompute",
        }
    }

    /// Variant digit in the tiling key.
    pub fn offset(self) -> u64 {
        match self {
            StrategyKind::SmallReduceTail => 1,
            StrategyKind::FullLoadAlongReduce => 2,
            StrategyKind::RecomputeAlongReduce => 3,
            StrategyKind::OuterTiledFullLoad => 4,
            StrategyKind::OuterTiledRecompute => 5,
        }
    }

    pub fn from_offset(offset: u64) -> Option<Self> {
        Some(match offset {
            1 => StrategyKind::SmallReduceTail,
            2 => StrategyKind::FullLoadAlongReduce,
            3 => StrategyKind::RecomputeAlongReduce,
            4 => StrategyKind::OuterTiledFullLoad,
            5 => StrategyKind::OuterTiledRecompute,
            _ => return None,
        })
    }

    fn capable(self, op: OpKind, p: &ProblemDescriptor, caps: &HardwareCaps) -> bool {
        match self {
            StrategyKind::SmallReduceTail => small_reduce::capable(op, p, caps),
            StrategyKind::FullLoadAlongReduce => full_load::capable(op, p, caps),
            StrategyKind::RecomputeAlongReduce => recompute::capable(op, p, caps),
            StrategyKind::OuterTiledFullLoad => outer_tiled::full_load_capable(op, p, caps),
            StrategyKind::OuterTiledRecompute => outer_tiled::recompute_capable(op, p, caps),
        }
    }

    fn build(
        self,
        op: OpKind,
        p: &ProblemDescriptor,
        caps: &HardwareCaps,
        epsilon: Option<f32>,
    ) -> TilingPlan {
        match self {
            StrategyKind::SmallReduceTail => small_reduce::plan(op, p, caps, epsilon),
            StrategyKind::FullLoadAlongReduce => full_load::plan(op, p, caps, epsilon),
            StrategyKind::RecomputeAlongReduce => recompute::plan(op, p, caps, epsilon),
            StrategyKind::OuterTiledFullLoad => outer_tiled::full_load_plan(op, p, caps, epsilon),
            StrategyKind::OuterTiledRecompute => outer_tiled::recompute_plan(op, p, caps, epsilon),
        }
    }
}

/// Pick the first capable strategy from the operator's table and build its
/// plan. Deterministic for a given (op, problem, caps) triple.
pub fn select(
    op: OpKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
    epsilon: Option<f32>,
) -> Result<TilingPlan> {
    for &strategy in op.strategy_table() {
        if strategy.capable(op, p, caps) {
            log::debug!(
                "{}: selected {} for R={} outer={}x{} {}→{}",
                op.as_str(),
                strategy.as_str(),
                p.reduce_len,
                p.outer_left,
                p.outer_right,
                p.in_elem.as_str(),
                p.out_elem.as_str()
            );
            return Ok(strategy.build(op, p, caps, epsilon));
        }
        log::trace!("{}: {} not capable", op.as_str(), strategy.as_str());
    }
    Err(TilingError::NotCapable {
        op,
        reduce_len: p.reduce_len,
        outer: p.total_outer(),
        scratch_bytes: caps.scratch_bytes,
    })
}

/// Assemble the plan pieces shared by every strategy: key, header, core
/// counts and the workspace policy.
fn finish_plan(
    op: OpKind,
    strategy: StrategyKind,
    p: &ProblemDescriptor,
    part: CorePartition,
    epsilon: Option<f32>,
    fields: PlanFields,
) -> TilingPlan {
    let (workspace_bytes, needs_zero_init) =
        crate::ops::workspace_policy(op, strategy, p, part.used_cores);
    let header = PlanHeader {
        outer_left: p.outer_left,
        reduce_len: p.reduce_len,
        outer_right: p.outer_right,
        per_core_units: part.per_core,
        tail_units: part.tail,
        used_cores: part.used_cores as u64,
        epsilon_bits: epsilon.map(|e| e.to_bits() as u64).unwrap_or(0),
    };
    TilingPlan {
        op,
        strategy,
        tiling_key: compose_tiling_key(op, strategy, p.in_elem, p.out_elem),
        used_cores: part.used_cores,
        workspace_bytes,
        needs_zero_init,
        header,
        fields,
    }
}

/// Distribute the strategy's work units over the available cores.
fn distribute(total_units: u64, caps: &HardwareCaps) -> CorePartition {
    partition_units(total_units, caps.core_count)
}
