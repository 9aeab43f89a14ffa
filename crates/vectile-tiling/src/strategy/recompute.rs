//! Recompute template: the reduce axis is innermost but too long to stay
//! resident, so each row is streamed in chunks. Multi-pass operators re-read
//! the row per pass instead of spilling intermediates.

use crate::accumulator::ChunkSchedule;
use crate::ops::{buffer_cost, OpKind};
use crate::plan::{ChunkFields, PlanFields, TilingPlan};
use crate::problem::ProblemDescriptor;
use crate::sizer::max_tile_len;
use crate::strategy::{distribute, finish_plan, StrategyKind};
use vectile_api::HardwareCaps;

const KIND: StrategyKind = StrategyKind::RecomputeAlongReduce;

pub(super) fn capable(op: OpKind, p: &ProblemDescriptor, caps: &HardwareCaps) -> bool {
    let align = caps.align_elems(p.in_elem) as u64;
    p.reduce_is_last() && buffer_cost(op, KIND, p, caps).fits(caps.scratch_bytes, align)
}

pub(super) fn plan(
    op: OpKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
    epsilon: Option<f32>,
) -> TilingPlan {
    let part = distribute(p.outer_left, caps);
    let cost = buffer_cost(op, KIND, p, caps);
    let chunk_factor = max_tile_len(
        caps.scratch_bytes,
        &cost,
        caps.align_elems(p.in_elem),
        p.reduce_len,
    );
    let schedule = ChunkSchedule::for_reduce(p.reduce_len, chunk_factor);
    finish_plan(
        op,
        KIND,
        p,
        part,
        epsilon,
        PlanFields::Recompute(ChunkFields::from(schedule)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectile_api::ElemType;

    #[test]
    fn chunks_cover_the_reduce_axis() {
        let caps = HardwareCaps::default();
        let p = ProblemDescriptor {
            outer_left: 4,
            reduce_len: 8 * 1024 * 1024,
            outer_right: 1,
            in_elem: ElemType::F32,
            out_elem: ElemType::F32,
        };
        assert!(capable(OpKind::Softmax, &p, &caps));
        let plan = plan(OpKind::Softmax, &p, &caps, None);
        let PlanFields::Recompute(f) = plan.fields else {
            panic!("wrong field block");
        };
        assert!(f.chunk_factor >= 1);
        assert_eq!(
            f.chunk_factor * (f.total_chunks - 1) + f.tail_chunk_len,
            p.reduce_len
        );
        // Chunk length honors the transfer alignment.
        assert_eq!(f.chunk_factor % caps.align_elems(ElemType::F32) as u64, 0);
    }

    #[test]
    fn rejects_strided_reduce() {
        let caps = HardwareCaps::default();
        let p = ProblemDescriptor {
            outer_left: 4,
            reduce_len: 1 << 20,
            outer_right: 2,
            in_elem: ElemType::F32,
            out_elem: ElemType::F32,
        };
        assert!(!capable(OpKind::Softmax, &p, &caps));
    }
}
