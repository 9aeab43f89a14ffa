//! Outer-tiled templates for strided reductions (the reduce axis is not
//! innermost). Contiguity lives along the trailing outer extent, so tiles
//! are column blocks; the full-load variant keeps the whole reduce extent
//! per block, the recompute variant streams it.

use crate::accumulator::ChunkSchedule;
use crate::ops::{buffer_cost, OpKind};
use crate::partition::split_loops;
use crate::plan::{ChunkFields, ColTileFields, PlanFields, TilingPlan};
use crate::problem::ProblemDescriptor;
use crate::sizer::max_tile_len;
use crate::strategy::{distribute, finish_plan, StrategyKind};
use vectile_api::HardwareCaps;

pub(super) fn full_load_capable(op: OpKind, p: &ProblemDescriptor, caps: &HardwareCaps) -> bool {
    !p.reduce_is_last()
        && buffer_cost(op, StrategyKind::OuterTiledFullLoad, p, caps).fits(caps.scratch_bytes, 1)
}

pub(super) fn full_load_plan(
    op: OpKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
    epsilon: Option<f32>,
) -> TilingPlan {
    let kind = StrategyKind::OuterTiledFullLoad;
    let part = distribute(p.total_outer(), caps);
    let cost = buffer_cost(op, kind, p, caps);
    let col_tile = max_tile_len(
        caps.scratch_bytes,
        &cost,
        caps.align_elems(p.in_elem),
        part.per_core,
    );
    let main = split_loops(part.per_core, col_tile);
    let last = split_loops(part.tail, col_tile);
    finish_plan(
        op,
        kind,
        p,
        part,
        epsilon,
        PlanFields::OuterFullLoad(ColTileFields {
            col_tile,
            main_loops: main.loops,
            main_tail: main.tail,
            last_loops: last.loops,
            last_tail: last.tail,
        }),
    )
}

pub(super) fn recompute_capable(op: OpKind, p: &ProblemDescriptor, caps: &HardwareCaps) -> bool {
    let align = caps.align_elems(p.in_elem) as u64;
    !p.reduce_is_last()
        && buffer_cost(op, StrategyKind::OuterTiledRecompute, p, caps)
            .fits(caps.scratch_bytes, align)
}

pub(super) fn recompute_plan(
    op: OpKind,
    p: &ProblemDescriptor,
    caps: &HardwareCaps,
    epsilon: Option<f32>,
) -> TilingPlan {
    let kind = StrategyKind::OuterTiledRecompute;
    let part = distribute(p.total_outer(), caps);
    let cost = buffer_cost(op, kind, p, caps);
    let align = caps.align_elems(p.in_elem) as u64;
    // One transfer-aligned column block at a time; the reduce axis streams.
    let col_tile = align.min(part.per_core);
    let main = split_loops(part.per_core, col_tile);
    let last = split_loops(part.tail, col_tile);
    let chunk_factor = max_tile_len(
        caps.scratch_bytes,
        &cost,
        caps.align_elems(p.in_elem),
        p.reduce_len,
    );
    let schedule = ChunkSchedule::for_reduce(p.reduce_len, chunk_factor);
    finish_plan(
        op,
        kind,
        p,
        part,
        epsilon,
        PlanFields::OuterRecompute(
            ColTileFields {
                col_tile,
                main_loops: main.loops,
                main_tail: main.tail,
                last_loops: last.loops,
                last_tail: last.tail,
            },
            ChunkFields::from(schedule),
        ),
    )
}
