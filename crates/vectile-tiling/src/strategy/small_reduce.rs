//! Small-reduce-tail template: when the reduce extent is tiny, the reduction
//! itself is cheap and the win is wide column tiles over the outer extent.

use crate::ops::{buffer_cost, effective_small_r_threshold, OpKind};
use crate::partition::split_loops;
use crate::plan::{ColTileFields, PlanFields, TilingPlan};
use crate::problem::ProblemDescriptor;
use crate::sizer::max_tile_len;
use crate::strategy::{distribute, finish_plan, StrategyKind};
use vectile_api::HardwareCaps;

const KIND: StrategyKind = StrategyKind::SmallReduceTail;

pub(super) fn capable(op: OpKind, p: &ProblemDescriptor, caps: &HardwareCaps) -> bool {
    p.reduce_len <= effective_small_r_threshold()
        && buffer_cost(op, KIND, p, caps).fits(caps.scratch_bytes, 1)
}

pub(super) fn plan(
    op: OpKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
    epsilon: Option<f32>,
) -> TilingPlan {
    let part = distribute(p.total_outer(), caps);
    let cost = buffer_cost(op, KIND, p, caps);
    let col_tile = max_tile_len(caps.scratch_bytes, &cost, 1, part.per_core);
    let main = split_loops(part.per_core, col_tile);
    let last = split_loops(part.tail, col_tile);
    finish_plan(
        op,
        KIND,
        p,
        part,
        epsilon,
        PlanFields::SmallReduce(ColTileFields {
            col_tile,
            main_loops: main.loops,
            main_tail: main.tail,
            last_loops: last.loops,
            last_tail: last.tail,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectile_api::ElemType;

    #[test]
    fn threshold_gates_capability() {
        let caps = HardwareCaps::default();
        let mut p = ProblemDescriptor {
            outer_left: 1,
            reduce_len: 4,
            outer_right: 2048,
            in_elem: ElemType::F16,
            out_elem: ElemType::F16,
        };
        assert!(capable(OpKind::Softmax, &p, &caps));
        p.reduce_len = 4096;
        assert!(!capable(OpKind::Softmax, &p, &caps));
    }

    #[test]
    fn tiles_cover_every_core_share() {
        let caps = HardwareCaps::default();
        let p = ProblemDescriptor {
            outer_left: 1,
            reduce_len: 8,
            outer_right: 100_000,
            in_elem: ElemType::F32,
            out_elem: ElemType::F32,
        };
        let plan = plan(OpKind::LogSoftmax, &p, &caps, None);
        let PlanFields::SmallReduce(f) = plan.fields else {
            panic!("wrong field block");
        };
        assert!(f.col_tile >= 1);
        // Main and last shares are fully covered by the loop splits.
        assert_eq!(
            f.col_tile * (f.main_loops - 1) + f.main_tail,
            plan.header.per_core_units
        );
        assert_eq!(
            f.col_tile * (f.last_loops - 1) + f.last_tail,
            plan.header.tail_units
        );
    }
}
