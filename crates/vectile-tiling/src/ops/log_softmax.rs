//! Log-softmax forward and gradient planning entry points.
//!
//! Shares every template with softmax; only the kernel math and therefore
//! the op code in the tiling key differ.

use crate::error::Result;
use crate::ops::OpKind;
use crate::problem::check_paired;
use crate::{PlanRequest, PlannedOp, Planner};
use vectile_api::ElemType;

/// Plan `log_softmax(x)` over `axis`.
pub fn plan_forward(
    planner: &Planner,
    shape: &[i64],
    axis: usize,
    elem: ElemType,
) -> Result<PlannedOp> {
    planner.plan(&PlanRequest::new(OpKind::LogSoftmax, shape, axis, elem))
}

/// Plan the backward pass from the forward output `y` and incoming `dy`.
pub fn plan_grad(
    planner: &Planner,
    y_shape: &[i64],
    dy_shape: &[i64],
    axis: usize,
    elem: ElemType,
) -> Result<PlannedOp> {
    check_paired("dy", y_shape, dy_shape)?;
    planner.plan(&PlanRequest::new(
        OpKind::LogSoftmaxGrad,
        y_shape,
        axis,
        elem,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HardwareCaps, PlanCache};
    use std::sync::Arc;

    #[test]
    fn forward_and_softmax_pick_identical_geometry() {
        let planner =
            Planner::with_cache(HardwareCaps::default(), Arc::new(PlanCache::new())).unwrap();
        let ls = plan_forward(&planner, &[32, 1000], 1, ElemType::F16).expect("plan");
        let sm =
            super::super::softmax::plan_forward(&planner, &[32, 1000], 1, ElemType::F16)
                .expect("plan");
        // Same templates and loop bounds; the keys differ only in op code.
        assert_eq!(ls.blob, sm.blob);
        assert_eq!(ls.launch.used_cores, sm.launch.used_cores);
        assert_eq!(
            ls.launch.tiling_key % 10_000_000,
            sm.launch.tiling_key % 10_000_000
        );
        assert_ne!(ls.launch.tiling_key, sm.launch.tiling_key);
    }
}
