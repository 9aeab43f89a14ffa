//! RMS-norm forward and gradient planning entry points.

use crate::error::Result;
use crate::ops::{check_norm_param, OpKind};
use crate::problem::check_paired;
use crate::{PlanRequest, PlannedOp, Planner};
use vectile_api::ElemType;

/// Plan `rms_norm(x, gamma)` over `axis`. Narrow inputs may store f32
/// output (cast-on-store); otherwise `out_elem` must equal `in_elem`.
pub fn plan_forward(
    planner: &Planner,
    shape: &[i64],
    axis: usize,
    gamma_shape: &[i64],
    in_elem: ElemType,
    out_elem: ElemType,
    epsilon: f32,
) -> Result<PlannedOp> {
    check_norm_param("gamma", shape, axis, gamma_shape)?;
    planner.plan(
        &PlanRequest::new(OpKind::RmsNorm, shape, axis, in_elem)
            .with_out_elem(out_elem)
            .with_epsilon(epsilon),
    )
}

/// Plan the backward pass producing dx and dgamma. `dy` pairs with `x`;
/// the per-core dgamma partials are staged in workspace.
pub fn plan_grad(
    planner: &Planner,
    x_shape: &[i64],
    dy_shape: &[i64],
    axis: usize,
    gamma_shape: &[i64],
    elem: ElemType,
    epsilon: f32,
) -> Result<PlannedOp> {
    check_paired("dy", x_shape, dy_shape)?;
    check_norm_param("gamma", x_shape, axis, gamma_shape)?;
    planner.plan(
        &PlanRequest::new(OpKind::RmsNormGrad, x_shape, axis, elem).with_epsilon(epsilon),
    )
}
