//! Operator kinds and their planning tables: strategy order, buffer cost
//! models, fixed scratch reserves, workspace policy and dtype rules.
//!
//! Each entry here replaces one `op_host` tiling class family of the device
//! library; the numbers are per-target tunables, not algorithm.

pub mod layer_norm;
pub mod log_softmax;
pub mod rms_norm;
pub mod softmax;

use crate::accumulator::floor_pow2;
use crate::error::{Result, TilingError};
use crate::problem::ProblemDescriptor;
use crate::sizer::{align_up, BufferCost};
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use vectile_api::{ElemType, HardwareCaps};

/// Operator family covered by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    Softmax,
    LogSoftmax,
    SoftmaxGrad,
    LogSoftmaxGrad,
    LayerNorm,
    LayerNormGrad,
    RmsNorm,
    RmsNormGrad,
}

/// Strategy order shared by every operator kind: cheapest / most specialized
/// first. Predicates may overlap; selection is first-match-wins, so a fixed
/// table makes the outcome deterministic regardless of overlap.
const STRATEGY_ORDER: [StrategyKind; 5] = [
    StrategyKind::SmallReduceTail,
    StrategyKind::FullLoadAlongReduce,
    StrategyKind::RecomputeAlongReduce,
    StrategyKind::OuterTiledFullLoad,
    StrategyKind::OuterTiledRecompute,
];

/// Stats temp reserved per strategy, in f32 vector registers.
pub(crate) const STATS_RESERVE_VECS: usize = 2;
/// Upper bound reserved for the accumulator slot bank, in f32 vector
/// registers; covers `cache_slots` up to the 64-bit chunk-count bound.
pub(crate) const ACCUM_BANK_RESERVE_VECS: usize = 64;
/// System workspace reserved for every launch.
pub(crate) const SYS_WORKSPACE_RESERVED: u64 = 16 * 1024 * 1024;

/// Default reduce-extent ceiling for the small-reduce-tail template.
const SMALL_R_MAX_DEFAULT: u64 = 64;

/// Small-R ceiling, overridable for bring-up via `VECTILE_SMALL_R_MAX`.
pub fn effective_small_r_threshold() -> u64 {
    if let Ok(val) = std::env::var("VECTILE_SMALL_R_MAX") {
        if let Ok(parsed) = val.trim().parse::<u64>() {
            if parsed > 0 {
                return parsed;
            }
        }
    }
    SMALL_R_MAX_DEFAULT
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Softmax => "softmax",
            OpKind::LogSoftmax => "log_softmax",
            OpKind::SoftmaxGrad => "softmax_grad",
            OpKind::LogSoftmaxGrad => "log_softmax_grad",
            OpKind::LayerNorm => "layer_norm",
            OpKind::LayerNormGrad => "layer_norm_grad",
            OpKind::RmsNorm => "rms_norm",
            OpKind::RmsNormGrad => "rms_norm_grad",
        }
    }

    /// Stable identifier used in tiling keys and cache keys.
    pub fn code(self) -> u64 {
        match self {
            OpKind::Softmax => 1,
            OpKind::LogSoftmax => 2,
            OpKind::SoftmaxGrad => 3,
            OpKind::LogSoftmaxGrad => 4,
            OpKind::LayerNorm => 5,
            OpKind::LayerNormGrad => 6,
            OpKind::RmsNorm => 7,
            OpKind::RmsNormGrad => 8,
        }
    }

    pub fn is_grad(self) -> bool {
        matches!(
            self,
            OpKind::SoftmaxGrad
                | OpKind::LogSoftmaxGrad
                | OpKind::LayerNormGrad
                | OpKind::RmsNormGrad
        )
    }

    pub fn strategy_table(self) -> &'static [StrategyKind] {
        &STRATEGY_ORDER
    }

    /// Streamed tensors tiled along the work axis: (inputs, outputs).
    pub(crate) fn io_streams(self) -> (usize, usize) {
        match self {
            OpKind::Softmax | OpKind::LogSoftmax | OpKind::RmsNorm | OpKind::LayerNorm => (1, 1),
            // dy and the forward result stream in; dx streams out.
            OpKind::SoftmaxGrad | OpKind::LogSoftmaxGrad => (2, 1),
            // dy and x stream in; dx streams out (dgamma/dbeta land in
            // side regions and workspace, not the streamed tile).
            OpKind::LayerNormGrad | OpKind::RmsNormGrad => (2, 1),
        }
    }

    /// Promoted working copies held per streamed element.
    pub(crate) fn f32_work_bufs(self, narrow: bool) -> usize {
        let promote = usize::from(narrow);
        match self {
            OpKind::Softmax | OpKind::LogSoftmax | OpKind::RmsNorm | OpKind::LayerNorm => promote,
            // exp(y)/recentered temp is carried in f32 even for f32 IO.
            OpKind::SoftmaxGrad | OpKind::LogSoftmaxGrad => 1 + promote,
            OpKind::LayerNormGrad | OpKind::RmsNormGrad => 1 + promote,
        }
    }

    /// Reduce-extent f32 side buffers resident during the pass
    /// (gamma/beta and gradient accumulators).
    pub(crate) fn side_regions(self) -> usize {
        match self {
            OpKind::Softmax | OpKind::LogSoftmax | OpKind::SoftmaxGrad | OpKind::LogSoftmaxGrad => {
                0
            }
            OpKind::RmsNorm => 1,                // gamma
            OpKind::LayerNorm => 2,              // gamma, beta
            OpKind::RmsNormGrad => 2,            // gamma, dgamma
            OpKind::LayerNormGrad => 3,          // gamma, dgamma, dbeta
        }
    }

    /// Reduce-extent gradient outputs accumulated across cores.
    pub(crate) fn grad_side_outputs(self) -> usize {
        match self {
            OpKind::LayerNormGrad => 2,
            OpKind::RmsNormGrad => 1,
            _ => 0,
        }
    }

    /// Dtype rule: output matches input, except the norm forwards may emit
    /// f32 from a narrow input (cast-on-store variants).
    pub fn validate_dtypes(self, in_elem: ElemType, out_elem: ElemType) -> Result<()> {
        if in_elem == out_elem {
            return Ok(());
        }
        let cast_ok = matches!(self, OpKind::LayerNorm | OpKind::RmsNorm)
            && in_elem.is_narrow()
            && out_elem == ElemType::F32;
        if cast_ok {
            return Ok(());
        }
        Err(TilingError::Shape(format!(
            "{} does not support {} input with {} output",
            self.as_str(),
            in_elem.as_str(),
            out_elem.as_str()
        )))
    }
}

/// Norm affine parameters (gamma, beta and their gradients) are 1-D over
/// the normalized axis.
pub(crate) fn check_norm_param(
    name: &str,
    data_shape: &[i64],
    axis: usize,
    param_shape: &[i64],
) -> Result<()> {
    crate::problem::check_shape(name, param_shape)?;
    if axis >= data_shape.len() {
        return Err(TilingError::Shape(format!(
            "normalized axis {axis} out of range for rank {}",
            data_shape.len()
        )));
    }
    if param_shape != [data_shape[axis]] {
        return Err(TilingError::Shape(format!(
            "{name} shape {param_shape:?} must be [{}] (the normalized axis extent)",
            data_shape[axis]
        )));
    }
    Ok(())
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scratch reserved for the full-load in-register pairwise add over the
/// reduce extent: quotient/VL partial lanes, block aligned.
pub(crate) fn binary_add_reserve(reduce_len: u64, caps: &HardwareCaps) -> usize {
    let quotient = binary_add_quotient(reduce_len);
    let lanes = quotient / caps.vector_elems as u64;
    align_up(lanes * 4, caps.block_align_bytes as u64) as usize
}

/// Largest power of two strictly below the reduce extent (the extent itself
/// halved when it is already a power of two above one).
pub(crate) fn binary_add_quotient(reduce_len: u64) -> u64 {
    let mut q = floor_pow2(reduce_len.max(1));
    if q == reduce_len && q > 1 {
        q /= 2;
    }
    q
}

/// Per-tiled-axis-element scratch cost for (op, strategy, problem).
///
/// The tiled-axis element is a column (full reduce extent) for the
/// column-parallel strategies, a row for full-load, and a single reduce-axis
/// element (times the column-block width for the outer-tiled case) for the
/// streaming strategies.
pub(crate) fn buffer_cost(
    op: OpKind,
    strategy: StrategyKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
) -> BufferCost {
    let narrow = p.in_elem.is_narrow();
    let (ins, outs) = op.io_streams();
    let streamed = BufferCost::new()
        .double_buffered(ins, p.in_elem.size_of())
        .double_buffered(outs, p.out_elem.size_of())
        .single(op.f32_work_bufs(narrow), 4);

    let align = caps.align_elems(p.in_elem) as u64;
    let r_al = align_up(p.reduce_len, align);
    let side_bytes = op.side_regions() * r_al as usize * 4;
    let vec_bytes = caps.vector_elems * 4;
    let stats = STATS_RESERVE_VECS * vec_bytes;

    match strategy {
        StrategyKind::SmallReduceTail | StrategyKind::OuterTiledFullLoad => streamed
            .per_elem_span(r_al)
            .fixed(side_bytes)
            .fixed(stats),
        StrategyKind::FullLoadAlongReduce => streamed
            .per_elem_span(r_al)
            .fixed(side_bytes)
            .fixed(binary_add_reserve(p.reduce_len, caps))
            .fixed(stats),
        StrategyKind::RecomputeAlongReduce => streamed
            .single(op.side_regions(), 4)
            .fixed(ACCUM_BANK_RESERVE_VECS * vec_bytes)
            .fixed(stats),
        StrategyKind::OuterTiledRecompute => streamed
            .per_elem_span(align)
            .single(op.side_regions(), 4)
            .fixed(ACCUM_BANK_RESERVE_VECS * vec_bytes)
            .fixed(stats),
    }
}

/// Workspace bytes and zero-init requirement for a planned launch.
///
/// Gradient operators with reduce-extent outputs stage per-core partials in
/// workspace; the streaming strategies accumulate into them across passes
/// and need the region cleared before launch.
pub(crate) fn workspace_policy(
    op: OpKind,
    strategy: StrategyKind,
    p: &ProblemDescriptor,
    used_cores: usize,
) -> (u64, bool) {
    let mut bytes = SYS_WORKSPACE_RESERVED;
    let side_outs = op.grad_side_outputs() as u64;
    if side_outs > 0 {
        bytes += used_cores as u64 * side_outs * p.reduce_len * 4;
    }
    let zero_init = side_outs > 0
        && matches!(
            strategy,
            StrategyKind::RecomputeAlongReduce | StrategyKind::OuterTiledRecompute
        );
    (bytes, zero_init)
}
