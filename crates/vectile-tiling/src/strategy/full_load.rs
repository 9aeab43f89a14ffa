//! Full-load template: the reduce axis is innermost and a whole row fits in
//! scratch, so each row is read once and reduced in registers.

use crate::ops::{binary_add_quotient, buffer_cost, OpKind};
use crate::partition::split_loops;
use crate::plan::{PlanFields, RowTileFields, TilingPlan};
use crate::problem::ProblemDescriptor;
use crate::sizer::max_tile_len;
use crate::strategy::{distribute, finish_plan, StrategyKind};
use vectile_api::HardwareCaps;

const KIND: StrategyKind = StrategyKind::FullLoadAlongReduce;

pub(super) fn capable(op: OpKind, p: &ProblemDescriptor, caps: &HardwareCaps) -> bool {
    p.reduce_is_last() && buffer_cost(op, KIND, p, caps).fits(caps.scratch_bytes, 1)
}

/// In-register pairwise add parameters for one resident row.
///
/// The kernel first folds the row down to the power-of-two `quotient`
/// prefix, then per-lane adds collapse it to `quotient / vl` lanes; `k`
/// halving rounds bring that to `last` values for the final cross-lane
/// reduce. `quotient` and `vl` are both powers of two, so the divisions are
/// exact.
pub(crate) fn binary_add_params(reduce_len: u64, vector_elems: usize) -> (u64, u64, u64) {
    let quotient = binary_add_quotient(reduce_len);
    let vl = vector_elems as u64;
    let vcadd = quotient / vl;
    if vcadd <= vl {
        (quotient, 0, vcadd)
    } else {
        (quotient, (vcadd / vl).trailing_zeros() as u64, vl)
    }
}

pub(super) fn plan(
    op: OpKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
    epsilon: Option<f32>,
) -> TilingPlan {
    let part = distribute(p.outer_left, caps);
    let cost = buffer_cost(op, KIND, p, caps);
    let rows_per_tile = max_tile_len(caps.scratch_bytes, &cost, 1, part.per_core);
    let main = split_loops(part.per_core, rows_per_tile);
    let last = split_loops(part.tail, rows_per_tile);
    let (quotient, k, last_add) = binary_add_params(p.reduce_len, caps.vector_elems);
    finish_plan(
        op,
        KIND,
        p,
        part,
        epsilon,
        PlanFields::FullLoad(RowTileFields {
            rows_per_tile,
            main_loops: main.loops,
            main_tail: main.tail,
            last_loops: last.loops,
            last_tail: last.tail,
            binary_add_quotient: quotient,
            binary_add_k: k,
            binary_add_last: last_add,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectile_api::ElemType;

    #[test]
    fn requires_innermost_reduce() {
        let caps = HardwareCaps::default();
        let p = ProblemDescriptor {
            outer_left: 8,
            reduce_len: 128,
            outer_right: 16,
            in_elem: ElemType::F32,
            out_elem: ElemType::F32,
        };
        assert!(!capable(OpKind::Softmax, &p, &caps));
    }

    #[test]
    fn pairwise_add_parameter_shapes() {
        // Short row: one per-lane add finishes it.
        assert_eq!(binary_add_params(1000, 64), (512, 0, 8));
        // Exactly vl^2 lanes after the fold: still no halving rounds.
        assert_eq!(binary_add_params(64 * 64 * 2, 64), (64 * 64, 0, 64));
        // Longer rows add halving rounds, two lanes' worth per round.
        assert_eq!(binary_add_params(64 * 64 * 4, 64), (64 * 64 * 2, 1, 64));
        assert_eq!(binary_add_params(64 * 64 * 8, 64), (64 * 64 * 4, 2, 64));
        // Degenerate single-element row.
        assert_eq!(binary_add_params(1, 64), (1, 0, 0));
    }

    #[test]
    fn row_tiles_cover_shares() {
        let caps = HardwareCaps::default();
        let p = ProblemDescriptor {
            outer_left: 777,
            reduce_len: 1000,
            outer_right: 1,
            in_elem: ElemType::F16,
            out_elem: ElemType::F16,
        };
        assert!(capable(OpKind::Softmax, &p, &caps));
        let plan = plan(OpKind::Softmax, &p, &caps, None);
        let PlanFields::FullLoad(f) = plan.fields else {
            panic!("wrong field block");
        };
        assert_eq!(
            f.rows_per_tile * (f.main_loops - 1) + f.main_tail,
            plan.header.per_core_units
        );
        assert_eq!(
            f.rows_per_tile * (f.last_loops - 1) + f.last_tail,
            plan.header.tail_units
        );
        assert_eq!(f.binary_add_quotient, 512);
    }
}
