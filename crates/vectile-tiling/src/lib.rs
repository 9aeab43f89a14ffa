//! VecTile tiling planner.
//!
//! Host-side planning for the softmax / log-softmax / layernorm / RMS-norm
//! operator family on a fixed-function parallel accelerator. One planning
//! call turns (operator, tensor shape, reduced axis, dtypes, attrs) plus the
//! target's capability numbers into:
//!
//! - a tiling key selecting the precompiled device kernel variant,
//! - launch scalars (grid size, workspace size, zero-init requirement),
//! - a serialized plan blob the kernel reads its loop bounds from.
//!
//! Planning is deterministic and pure; results are memoized in a structural
//! hash cache so steady-state launches skip straight to the blob.

pub mod accumulator;
pub mod cache;
pub mod error;
pub mod ops;
pub mod partition;
pub mod plan;
pub mod problem;
pub mod sizer;
pub mod strategy;

pub use cache::{CacheEntry, PlanCache, PlanCacheKey};
pub use error::{Result, TilingError};
pub use ops::OpKind;
pub use partition::{partition_units, CorePartition, CoreRange, MAX_CORES};
pub use plan::{compose_tiling_key, TilingPlan, PLAN_BLOB_CAP};
pub use problem::{normalize, ProblemDescriptor, ShapeDims, MAX_RANK};
pub use strategy::{select, StrategyKind};
pub use vectile_api::{ElemType, HardwareCaps, LaunchParams};

use std::sync::Arc;

/// One planning request: the operator instance as the graph compiler sees it.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub op: OpKind,
    pub shape: ShapeDims,
    /// Index of the reduced (normalized) axis in `shape`.
    pub axis: usize,
    pub in_elem: ElemType,
    pub out_elem: ElemType,
    /// Variance-stabilizing epsilon; `None` for the softmax family.
    pub epsilon: Option<f32>,
}

impl PlanRequest {
    pub fn new(op: OpKind, shape: &[i64], axis: usize, elem: ElemType) -> Self {
        Self {
            op,
            shape: ShapeDims::from_slice(shape),
            axis,
            in_elem: elem,
            out_elem: elem,
            epsilon: None,
        }
    }

    pub fn with_out_elem(mut self, out_elem: ElemType) -> Self {
        self.out_elem = out_elem;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = Some(epsilon);
        self
    }
}

/// A finished plan, ready for dispatch.
#[derive(Debug, Clone)]
pub struct PlannedOp {
    pub launch: LaunchParams,
    pub blob: Vec<u8>,
    /// Whether the blob came from the decision cache.
    pub from_cache: bool,
}

/// Planner bound to one target's capability numbers.
///
/// Construction validates the descriptor once; planning calls after that
/// cannot fail on capability grounds, only on shapes no strategy accepts.
pub struct Planner {
    caps: HardwareCaps,
    cache: Arc<PlanCache>,
    use_cache: bool,
}

fn cache_disabled_by_env() -> bool {
    std::env::var("VECTILE_DISABLE_PLAN_CACHE")
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}

impl Planner {
    /// Planner over an explicit capability descriptor, sharing the
    /// process-wide decision cache.
    pub fn new(caps: HardwareCaps) -> Result<Self> {
        Self::with_cache(caps, Arc::clone(&cache::GLOBAL_PLAN_CACHE))
    }

    /// Planner with its own cache; tests and ahead-of-time compilers use
    /// this to keep runs isolated.
    pub fn with_cache(caps: HardwareCaps, cache: Arc<PlanCache>) -> Result<Self> {
        caps.validate()
            .map_err(|e| TilingError::Caps(e.to_string()))?;
        partition::check_core_bound(caps.core_count)?;
        Ok(Self {
            caps,
            cache,
            use_cache: !cache_disabled_by_env(),
        })
    }

    /// Planner over the effective target capabilities (registered provider
    /// plus environment overrides).
    pub fn from_env() -> Result<Self> {
        let caps =
            vectile_api::effective_caps().map_err(|e| TilingError::Caps(e.to_string()))?;
        Self::new(caps)
    }

    pub fn caps(&self) -> &HardwareCaps {
        &self.caps
    }

    /// Plan one operator instance.
    ///
    /// Flow: dtype rules, shape validation and fusion, cache probe,
    /// strategy selection, serialization, cache publish.
    pub fn plan(&self, req: &PlanRequest) -> Result<PlannedOp> {
        req.op.validate_dtypes(req.in_elem, req.out_elem)?;
        let problem = problem::normalize(&req.shape, req.axis, req.in_elem, req.out_elem)?;

        let hash = PlanCacheKey::new(
            req.op,
            &req.shape,
            req.axis,
            req.in_elem,
            req.out_elem,
            req.epsilon,
        )
        .structural_hash();

        if self.use_cache {
            if let Some(entry) = self.cache.lookup(hash) {
                entry.verify(hash)?;
                log::trace!("{}: plan cache hit for {:#018x}", req.op.as_str(), hash);
                return Ok(PlannedOp {
                    launch: LaunchParams {
                        tiling_key: entry.tiling_key,
                        used_cores: entry.used_cores,
                        workspace_bytes: entry.workspace_bytes,
                        needs_zero_init: entry.needs_zero_init,
                        tiling_data_len: entry.blob.len(),
                    },
                    blob: entry.blob.clone(),
                    from_cache: true,
                });
            }
        }

        let plan = strategy::select(req.op, &problem, &self.caps, req.epsilon)?;
        let blob = plan.serialize()?;
        let launch = plan.launch_params(blob.len());

        if self.use_cache {
            self.cache.store(
                hash,
                CacheEntry {
                    tiling_key: plan.tiling_key,
                    used_cores: plan.used_cores,
                    workspace_bytes: plan.workspace_bytes,
                    needs_zero_init: plan.needs_zero_init,
                    blob: blob.clone(),
                },
            );
        }

        Ok(PlannedOp {
            launch,
            blob,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated_planner() -> Planner {
        Planner::with_cache(HardwareCaps::default(), Arc::new(PlanCache::new()))
            .expect("default caps")
    }

    #[test]
    fn plan_then_replan_hits_cache() {
        let planner = isolated_planner();
        let req = PlanRequest::new(OpKind::Softmax, &[32, 1000], 1, ElemType::F16);
        let first = planner.plan(&req).expect("plan");
        assert!(!first.from_cache);
        let second = planner.plan(&req).expect("plan");
        assert!(second.from_cache);
        assert_eq!(first.launch, second.launch);
        assert_eq!(first.blob, second.blob);
    }

    #[test]
    fn rejects_bad_caps_at_construction() {
        let mut caps = HardwareCaps::default();
        caps.core_count = MAX_CORES + 1;
        assert!(Planner::with_cache(caps, Arc::new(PlanCache::new())).is_err());
        caps.core_count = 0;
        assert!(Planner::with_cache(caps, Arc::new(PlanCache::new())).is_err());
    }

    #[test]
    fn dtype_rule_enforced_before_planning() {
        let planner = isolated_planner();
        let req = PlanRequest::new(OpKind::Softmax, &[32, 1000], 1, ElemType::F16)
            .with_out_elem(ElemType::F32);
        assert!(matches!(planner.plan(&req), Err(TilingError::Shape(_))));
    }

    #[test]
    fn epsilon_lands_in_the_blob_header() {
        let planner = isolated_planner();
        let req = PlanRequest::new(OpKind::RmsNorm, &[64, 4096], 1, ElemType::Bf16)
            .with_epsilon(1e-6);
        let planned = planner.plan(&req).expect("plan");
        // epsilon_bits is the seventh u64 of the header.
        let bits = u64::from_le_bytes(planned.blob[48..56].try_into().unwrap());
        assert_eq!(bits, 1e-6f32.to_bits() as u64);
    }
}
