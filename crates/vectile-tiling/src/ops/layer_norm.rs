//! Layer-norm forward and gradient planning entry points.

use crate::error::Result;
use crate::ops::{check_norm_param, OpKind};
use crate::problem::check_paired;
use crate::{PlanRequest, PlannedOp, Planner};
use vectile_api::ElemType;

/// Plan `layer_norm(x, gamma, beta)` over `axis`. `beta` is optional; when
/// present it must span the normalized axis like `gamma`.
pub fn plan_forward(
    planner: &Planner,
    shape: &[i64],
    axis: usize,
    gamma_shape: &[i64],
    beta_shape: Option<&[i64]>,
    in_elem: ElemType,
    out_elem: ElemType,
    epsilon: f32,
) -> Result<PlannedOp> {
    check_norm_param("gamma", shape, axis, gamma_shape)?;
    if let Some(beta) = beta_shape {
        check_norm_param("beta", shape, axis, beta)?;
    }
    planner.plan(
        &PlanRequest::new(OpKind::LayerNorm, shape, axis, in_elem)
            .with_out_elem(out_elem)
            .with_epsilon(epsilon),
    )
}

/// Plan the backward pass producing dx, dgamma and dbeta. Per-core partials
/// for the axis-extent gradients are staged in workspace.
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
        &PlanRequest::new(OpKind::LayerNormGrad, x_shape, axis, elem).with_epsilon(epsilon),
    )
}
