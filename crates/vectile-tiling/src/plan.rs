//! Tiling plan and its serialized form.
//!
//! The blob handed to the device is a flat, versionless run of fixed-width
//! little-endian fields: a common header followed by the selected strategy's
//! field block. No tag is stored; the variant is implied by the tiling key,
//! which also selects the compiled kernel.

use crate::accumulator::ChunkSchedule;
use crate::error::{Result, TilingError};
use crate::ops::OpKind;
use crate::partition::{CorePartition, CoreRange};
use crate::strategy::StrategyKind;
use bytemuck::{bytes_of, Pod, Zeroable};
use vectile_api::{ElemType, LaunchParams};

/// Serialized plans above this size are still used for the launch but are
/// not cached.
pub const PLAN_BLOB_CAP: usize = 64 * 1024;

/// Geometry and first-level work distribution, common to every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PlanHeader {
    pub outer_left: u64,
    pub reduce_len: u64,
    pub outer_right: u64,
    /// Work units per non-tail core.
    pub per_core_units: u64,
    /// Last used core's share.
    pub tail_units: u64,
    pub used_cores: u64,
    /// Operator epsilon as f32 bits; zero for the softmax family.
    pub epsilon_bits: u64,
}

/// Second-level column split used by the column-parallel variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ColTileFields {
    pub col_tile: u64,
    pub main_loops: u64,
    pub main_tail: u64,
    pub last_loops: u64,
    pub last_tail: u64,
}

/// Row split plus in-register pairwise-add parameters for full-load rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RowTileFields {
    pub rows_per_tile: u64,
    pub main_loops: u64,
    pub main_tail: u64,
    pub last_loops: u64,
    pub last_tail: u64,
    pub binary_add_quotient: u64,
    pub binary_add_k: u64,
    pub binary_add_last: u64,
}

/// Streaming accumulator schedule fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkFields {
    pub chunk_factor: u64,
    pub total_chunks: u64,
    pub tail_chunk_len: u64,
    pub basic_block: u64,
    pub fold_count: u64,
    pub cache_slots: u64,
    pub result_slot: u64,
}

impl From<ChunkSchedule> for ChunkFields {
    fn from(s: ChunkSchedule) -> Self {
        Self {
            chunk_factor: s.chunk_factor,
            total_chunks: s.total_chunks,
            tail_chunk_len: s.tail_chunk_len,
            basic_block: s.basic_block,
            fold_count: s.fold_count,
            cache_slots: s.cache_slots as u64,
            result_slot: s.result_slot as u64,
        }
    }
}

/// Variant-specific field block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFields {
    SmallReduce(ColTileFields),
    FullLoad(RowTileFields),
    Recompute(ChunkFields),
    OuterFullLoad(ColTileFields),
    OuterRecompute(ColTileFields, ChunkFields),
}

impl PlanFields {
    fn byte_len(&self) -> usize {
        match self {
            PlanFields::SmallReduce(_) | PlanFields::OuterFullLoad(_) => {
                std::mem::size_of::<ColTileFields>()
            }
            PlanFields::FullLoad(_) => std::mem::size_of::<RowTileFields>(),
            PlanFields::Recompute(_) => std::mem::size_of::<ChunkFields>(),
            PlanFields::OuterRecompute(_, _) => {
                std::mem::size_of::<ColTileFields>() + std::mem::size_of::<ChunkFields>()
            }
        }
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        match self {
            PlanFields::SmallReduce(f) | PlanFields::OuterFullLoad(f) => {
                out.extend_from_slice(bytes_of(f))
            }
            PlanFields::FullLoad(f) => out.extend_from_slice(bytes_of(f)),
            PlanFields::Recompute(f) => out.extend_from_slice(bytes_of(f)),
            PlanFields::OuterRecompute(c, f) => {
                out.extend_from_slice(bytes_of(c));
                out.extend_from_slice(bytes_of(f));
            }
        }
    }
}

/// Tiling key layout: op code scaled to the ten-millions, variant offset in
/// the millions, dtype pair in the low digits. Unique per compiled kernel
/// variant and stable across runs.
pub fn compose_tiling_key(
    op: OpKind,
    strategy: StrategyKind,
    in_elem: ElemType,
    out_elem: ElemType,
) -> u64 {
    op.code() * 10_000_000 + strategy.offset() * 1_000_000 + in_elem.code() * 10 + out_elem.code()
}

/// Variant implied by a tiling key; used to size the expected blob.
pub fn strategy_from_key(key: u64) -> Option<StrategyKind> {
    StrategyKind::from_offset((key / 1_000_000) % 10)
}

/// Expected serialized length for a key's variant, for cache verification.
pub fn expected_blob_len(key: u64) -> Option<usize> {
    let header = std::mem::size_of::<PlanHeader>();
    let fields = match strategy_from_key(key)? {
        StrategyKind::SmallReduceTail | StrategyKind::OuterTiledFullLoad => {
            std::mem::size_of::<ColTileFields>()
        }
        StrategyKind::FullLoadAlongReduce => std::mem::size_of::<RowTileFields>(),
        StrategyKind::RecomputeAlongReduce => std::mem::size_of::<ChunkFields>(),
        StrategyKind::OuterTiledRecompute => {
            std::mem::size_of::<ColTileFields>() + std::mem::size_of::<ChunkFields>()
        }
    };
    Some(header + fields)
}

/// One planning result, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingPlan {
    pub op: OpKind,
    pub strategy: StrategyKind,
    pub tiling_key: u64,
    pub used_cores: usize,
    pub workspace_bytes: u64,
    pub needs_zero_init: bool,
    pub header: PlanHeader,
    pub fields: PlanFields,
}

impl TilingPlan {
    pub fn serialized_len(&self) -> usize {
        std::mem::size_of::<PlanHeader>() + self.fields.byte_len()
    }

    /// Serialize into a fresh blob, enforcing the fixed capacity.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let needed = self.serialized_len();
        if needed > PLAN_BLOB_CAP {
            return Err(TilingError::SerializationOverflow {
                needed,
                cap: PLAN_BLOB_CAP,
            });
        }
        let mut out = Vec::with_capacity(needed);
        out.extend_from_slice(bytes_of(&self.header));
        self.fields.write_into(&mut out);
        debug_assert_eq!(out.len(), needed);
        Ok(out)
    }

    /// Per-core (start, len) table over the plan's work units, sized at
    /// `used_cores`.
    pub fn core_ranges(&self) -> Vec<CoreRange> {
        CorePartition {
            per_core: self.header.per_core_units,
            used_cores: self.used_cores,
            tail: self.header.tail_units,
        }
        .ranges()
    }

    pub fn launch_params(&self, blob_len: usize) -> LaunchParams {
        LaunchParams {
            tiling_key: self.tiling_key,
            used_cores: self.used_cores,
            workspace_bytes: self.workspace_bytes,
            needs_zero_init: self.needs_zero_init,
            tiling_data_len: blob_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_variant() {
        for strategy in [
            StrategyKind::SmallReduceTail,
            StrategyKind::FullLoadAlongReduce,
            StrategyKind::RecomputeAlongReduce,
            StrategyKind::OuterTiledFullLoad,
            StrategyKind::OuterTiledRecompute,
        ] {
            let key =
                compose_tiling_key(OpKind::LayerNorm, strategy, ElemType::Bf16, ElemType::F32);
            assert_eq!(strategy_from_key(key), Some(strategy));
        }
    }

    #[test]
    fn keys_distinct_across_ops_and_dtypes() {
        let a = compose_tiling_key(
            OpKind::Softmax,
            StrategyKind::FullLoadAlongReduce,
            ElemType::F16,
            ElemType::F16,
        );
        let b = compose_tiling_key(
            OpKind::LogSoftmax,
            StrategyKind::FullLoadAlongReduce,
            ElemType::F16,
            ElemType::F16,
        );
        let c = compose_tiling_key(
            OpKind::Softmax,
            StrategyKind::FullLoadAlongReduce,
            ElemType::F32,
            ElemType::F32,
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serialized_len_matches_expectation() {
        let header = PlanHeader {
            outer_left: 4,
            reduce_len: 128,
            outer_right: 1,
            per_core_units: 1,
            tail_units: 1,
            used_cores: 4,
            epsilon_bits: 0,
        };
        let plan = TilingPlan {
            op: OpKind::Softmax,
            strategy: StrategyKind::RecomputeAlongReduce,
            tiling_key: compose_tiling_key(
                OpKind::Softmax,
                StrategyKind::RecomputeAlongReduce,
                ElemType::F32,
                ElemType::F32,
            ),
            used_cores: 4,
            workspace_bytes: 0,
            needs_zero_init: false,
            header,
            fields: PlanFields::Recompute(ChunkFields::from(ChunkSchedule::for_reduce(128, 32))),
        };
        let blob = plan.serialize().expect("fits");
        assert_eq!(blob.len(), plan.serialized_len());
        assert_eq!(Some(blob.len()), expected_blob_len(plan.tiling_key));

        let ranges = plan.core_ranges();
        assert_eq!(ranges.len(), plan.used_cores);
        assert_eq!(ranges.iter().map(|r| r.len).sum::<u64>(), 4);
    }
}
