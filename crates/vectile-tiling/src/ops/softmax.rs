//! Softmax forward and gradient planning entry points.

use crate::error::Result;
use crate::ops::OpKind;
use crate::problem::check_paired;
use crate::{PlanRequest, PlannedOp, Planner};
use vectile_api::ElemType;

/// Plan `softmax(x)` over `axis`.
pub fn plan_forward(
    planner: &Planner,
    shape: &[i64],
    axis: usize,
    elem: ElemType,
) -> Result<PlannedOp> {
    planner.plan(&PlanRequest::new(OpKind::Softmax, shape, axis, elem))
}

/// Plan the backward pass. `y` is the forward output; `dy` must match it
/// exactly since the gradient is computed from the pair.
pub fn plan_grad(
    planner: &Planner,
    y_shape: &[i64],
    dy_shape: &[i64],
    axis: usize,
    elem: ElemType,
) -> Result<PlannedOp> {
    check_paired("dy", y_shape, dy_shape)?;
    planner.plan(&PlanRequest::new(OpKind::SoftmaxGrad, y_shape, axis, elem))
}
