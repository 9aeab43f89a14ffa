//! Capacity-constrained tile sizer.
//!
//! Strategies describe what lives in scratch while one tile is processed as a
//! [`BufferCost`]: a per-element byte cost over the tiled axis plus a fixed
//! region (reduction temps, side buffers resident for the whole launch). The
//! sizer turns that and the scratch budget into the largest aligned tile.

/// Buffers simultaneously live during one tile's processing.
///
/// Built per (operator, strategy, problem); the per-element unit is one
/// element of the axis being tiled, which for column- and row-tiled
/// strategies already includes the full reduce extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCost {
    bytes_per_elem: usize,
    fixed_bytes: usize,
}

/// Transfer/compute overlap keeps two instances of every streamed buffer.
pub const DOUBLE_BUFFER: usize = 2;

impl BufferCost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `buffers` streamed buffers of `elem_bytes`-wide elements, each
    /// kept in two instances for transfer/compute overlap.
    pub fn double_buffered(mut self, buffers: usize, elem_bytes: usize) -> Self {
        self.bytes_per_elem += buffers * DOUBLE_BUFFER * elem_bytes;
        self
    }

    /// Add `buffers` single-instance buffers of `elem_bytes`-wide elements.
    pub fn single(mut self, buffers: usize, elem_bytes: usize) -> Self {
        self.bytes_per_elem += buffers * elem_bytes;
        self
    }

    /// Scale the per-element cost; used when one tiled-axis element spans a
    /// whole reduce-extent row or an aligned column block.
    pub fn per_elem_span(mut self, span: u64) -> Self {
        self.bytes_per_elem = (self.bytes_per_elem as u64 * span) as usize;
        self
    }

    /// Add a constant-size region independent of the tile length.
    pub fn fixed(mut self, bytes: usize) -> Self {
        self.fixed_bytes += bytes;
        self
    }

    pub fn bytes_per_elem(&self) -> usize {
        self.bytes_per_elem
    }

    pub fn fixed_bytes(&self) -> usize {
        self.fixed_bytes
    }

    /// Whether a tile of `elems` elements fits in `scratch_bytes`. Used by
    /// capability predicates with the minimum viable tile.
    pub fn fits(&self, scratch_bytes: usize, elems: u64) -> bool {
        let Some(avail) = scratch_bytes.checked_sub(self.fixed_bytes) else {
            return false;
        };
        elems.checked_mul(self.bytes_per_elem as u64).is_some_and(|need| need <= avail as u64)
    }
}

/// Largest tile length that fits the budget, floor-aligned to `align_elems`
/// and clamped to `axis_len`.
///
/// Callers invoke this only after the strategy's capability predicate
/// accepted the minimum tile, so a zero result is a predicate bug.
pub fn max_tile_len(
    scratch_bytes: usize,
    cost: &BufferCost,
    align_elems: usize,
    axis_len: u64,
) -> u64 {
    debug_assert!(align_elems >= 1 && cost.bytes_per_elem() > 0);
    let avail = scratch_bytes.saturating_sub(cost.fixed_bytes()) as u64;
    let raw = avail / cost.bytes_per_elem() as u64;
    let aligned = raw - raw % align_elems as u64;
    let tile = if aligned == 0 { raw.min(align_elems as u64) } else { aligned };
    tile.min(axis_len)
}

pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align >= 1);
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_accumulates_buffers() {
        // One f16 input + one f16 output double buffered, one f32 work copy.
        let cost = BufferCost::new()
            .double_buffered(2, 2)
            .single(1, 4)
            .fixed(512);
        assert_eq!(cost.bytes_per_elem(), 2 * 2 * 2 + 4);
        assert_eq!(cost.fixed_bytes(), 512);
    }

    #[test]
    fn tile_is_floor_aligned_and_clamped() {
        let cost = BufferCost::new().double_buffered(2, 4); // 16 B/elem
        // 1000 B budget -> 62 raw elems -> 56 at align 8.
        assert_eq!(max_tile_len(1000, &cost, 8, 10_000), 56);
        // Clamp to the axis length when the whole axis fits.
        assert_eq!(max_tile_len(1000, &cost, 8, 40), 40);
    }

    #[test]
    fn fixed_overhead_subtracted_up_front() {
        let cost = BufferCost::new().double_buffered(1, 4).fixed(900); // 8 B/elem
        assert_eq!(max_tile_len(1000, &cost, 4, 10_000), 12);
        assert!(!cost.fits(900, 1));
        assert!(cost.fits(1000, 12));
        assert!(!cost.fits(1000, 13));
    }

    #[test]
    fn sub_alignment_budget_degrades_to_raw() {
        let cost = BufferCost::new().double_buffered(2, 4); // 16 B/elem
        // Budget for 3 elems, align 8: keep the raw count rather than 0.
        assert_eq!(max_tile_len(48, &cost, 8, 10_000), 3);
    }

    #[test]
    fn span_scales_per_element_cost() {
        let cost = BufferCost::new().double_buffered(1, 4).per_elem_span(128);
        assert_eq!(cost.bytes_per_elem(), 8 * 128);
    }

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(1000, 64), 1024);
        assert_eq!(align_up(1024, 64), 1024);
        assert_eq!(align_up(1, 8), 8);
    }
}
