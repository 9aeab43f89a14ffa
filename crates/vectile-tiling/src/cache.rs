//! Tiling decision cache.
//!
//! Plans are pure functions of (op, shape, axis, dtypes, attrs, caps), so
//! repeated launches of the same operator instance reuse the serialized blob
//! instead of re-planning. Entries are `Arc`-published; readers never hold
//! the map lock while using a plan.

use crate::error::{Result, TilingError};
use crate::ops::OpKind;
use crate::plan::{expected_blob_len, PLAN_BLOB_CAP};
use crate::problem::MAX_RANK;
use once_cell::sync::Lazy;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use vectile_api::ElemType;

/// Everything that determines a plan, before normalization. The original
/// shape (zero-padded to the rank bound) is hashed rather than the fused
/// descriptor so distinct shapes that fuse identically still get distinct
/// keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanCacheKey {
    op_code: u64,
    in_elem: u64,
    out_elem: u64,
    axis: u32,
    dims: [i64; MAX_RANK],
    epsilon_bits: u32,
}

impl PlanCacheKey {
    pub fn new(
        op: OpKind,
        shape: &[i64],
        axis: usize,
        in_elem: ElemType,
        out_elem: ElemType,
        epsilon: Option<f32>,
    ) -> Self {
        let mut dims = [0i64; MAX_RANK];
        dims[..shape.len()].copy_from_slice(shape);
        Self {
            op_code: op.code(),
            in_elem: in_elem.code(),
            out_elem: out_elem.code(),
            axis: axis as u32,
            dims,
            epsilon_bits: epsilon.map(f32::to_bits).unwrap_or(0),
        }
    }

    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// One cached planning result: the launch scalars plus the serialized blob.
#[derive(Debug)]
pub struct CacheEntry {
    pub tiling_key: u64,
    pub used_cores: usize,
    pub workspace_bytes: u64,
    pub needs_zero_init: bool,
    pub blob: Vec<u8>,
}

impl CacheEntry {
    /// Verify the stored blob against the length its tiling key implies.
    /// A mismatch means a hash collision or a layout change under a live
    /// cache; either way the entry must not be trusted.
    pub fn verify(&self, hash: u64) -> Result<()> {
        let expected = expected_blob_len(self.tiling_key).unwrap_or(0);
        if self.blob.len() != expected {
            return Err(TilingError::CacheCorruption {
                key: hash,
                stored: self.blob.len(),
                expected,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PlanCache {
    entries: Mutex<HashMap<u64, Arc<CacheEntry>>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, hash: u64) -> Option<Arc<CacheEntry>> {
        self.entries.lock().unwrap().get(&hash).cloned()
    }

    /// Insert or replace. Blobs over the capacity are not stored; the plan
    /// is still valid for the launch that produced it.
    pub fn store(&self, hash: u64, entry: CacheEntry) -> Option<Arc<CacheEntry>> {
        if entry.blob.len() > PLAN_BLOB_CAP {
            log::trace!(
                "plan blob {}B over {}B cap, skipping cache store",
                entry.blob.len(),
                PLAN_BLOB_CAP
            );
            return None;
        }
        let entry = Arc::new(entry);
        self.entries
            .lock()
            .unwrap()
            .insert(hash, Arc::clone(&entry));
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Process-wide cache shared by planners that do not bring their own.
pub static GLOBAL_PLAN_CACHE: Lazy<Arc<PlanCache>> = Lazy::new(|| Arc::new(PlanCache::new()));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::compose_tiling_key;
    use crate::strategy::StrategyKind;

    fn key_for(shape: &[i64], axis: usize) -> PlanCacheKey {
        PlanCacheKey::new(
            OpKind::Softmax,
            shape,
            axis,
            ElemType::F16,
            ElemType::F16,
            None,
        )
    }

    #[test]
    fn keys_separate_shapes_axes_and_attrs() {
        let base = key_for(&[32, 1000], 1).structural_hash();
        assert_ne!(base, key_for(&[32, 1001], 1).structural_hash());
        assert_ne!(base, key_for(&[32, 1000], 0).structural_hash());
        assert_ne!(base, key_for(&[32, 1000, 1], 1).structural_hash());
        let eps = PlanCacheKey::new(
            OpKind::LayerNorm,
            &[32, 1000],
            1,
            ElemType::F16,
            ElemType::F16,
            Some(1e-5),
        );
        let eps2 = PlanCacheKey::new(
            OpKind::LayerNorm,
            &[32, 1000],
            1,
            ElemType::F16,
            ElemType::F16,
            Some(1e-6),
        );
        assert_ne!(eps.structural_hash(), eps2.structural_hash());
    }

    #[test]
    fn store_and_lookup_round_trip() {
        let cache = PlanCache::new();
        let hash = key_for(&[32, 1000], 1).structural_hash();
        assert!(cache.lookup(hash).is_none());
        let tiling_key = compose_tiling_key(
            OpKind::Softmax,
            StrategyKind::FullLoadAlongReduce,
            ElemType::F16,
            ElemType::F16,
        );
        let blob = vec![0u8; expected_blob_len(tiling_key).unwrap()];
        cache.store(
            hash,
            CacheEntry {
                tiling_key,
                used_cores: 32,
                workspace_bytes: 0,
                needs_zero_init: false,
                blob,
            },
        );
        let entry = cache.lookup(hash).expect("stored entry");
        assert!(entry.verify(hash).is_ok());
        assert_eq!(entry.used_cores, 32);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn oversize_blob_is_not_stored() {
        let cache = PlanCache::new();
        let stored = cache.store(
            1,
            CacheEntry {
                tiling_key: 12_000_011,
                used_cores: 1,
                workspace_bytes: 0,
                needs_zero_init: false,
                blob: vec![0u8; PLAN_BLOB_CAP + 1],
            },
        );
        assert!(stored.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn size_mismatch_is_corruption() {
        let tiling_key = compose_tiling_key(
            OpKind::Softmax,
            StrategyKind::RecomputeAlongReduce,
            ElemType::F32,
            ElemType::F32,
        );
        let entry = CacheEntry {
            tiling_key,
            used_cores: 4,
            workspace_bytes: 0,
            needs_zero_init: false,
            blob: vec![0u8; 3],
        };
        let err = entry.verify(0xdead).unwrap_err();
        assert!(matches!(err, TilingError::CacheCorruption { .. }));
    }
}
