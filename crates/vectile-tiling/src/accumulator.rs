//! Streaming pairwise reduction accumulator.
//!
//! When the reduce axis does not fit in scratch in one pass, it is consumed
//! as `total_chunks` sub-ranges of up to `chunk_factor` elements. Each chunk
//! is reduced to one partial value on chip and then merged through a small
//! bank of cache slots that behaves like a binary counter: the partial sum
//! arriving for chunk `i` carries through occupied slots exactly as an
//! increment carries through set bits, so every merge adds two partial sums
//! built from the same number of chunks. That keeps magnitudes pairwise
//! balanced (better float stability than a running sum) while never holding
//! more than `cache_slots` live partials.
//!
//! Ragged chunk counts are squared off first: the `fold_count` chunks beyond
//! the largest power of two are added into the same-index leading chunks
//! before the counter runs, so the tree only ever sees a power-of-two count.

use crate::partition::ceil_div;

/// Largest power of two less than or equal to `n` (`n >= 1`).
pub(crate) fn floor_pow2(n: u64) -> u64 {
    debug_assert!(n >= 1);
    1u64 << (63 - n.leading_zeros())
}

fn ceil_log2(n: u64) -> u32 {
    debug_assert!(n >= 1);
    64 - (n - 1).leading_zeros()
}

/// Bounded-memory schedule for summing a chunked reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSchedule {
    /// Reduce-axis elements consumed per chunk (the tile length along R).
    pub chunk_factor: u64,
    /// Number of chunks covering the reduce axis.
    pub total_chunks: u64,
    /// Elements in the final chunk; `1..=chunk_factor`.
    pub tail_chunk_len: u64,
    /// Largest power of two at most `total_chunks`.
    pub basic_block: u64,
    /// Chunks beyond the basic block, folded into the leading chunks.
    pub fold_count: u64,
    /// Scratch slots needed for pending partial sums.
    pub cache_slots: u32,
    /// Slot holding the final value once every chunk is consumed.
    pub result_slot: u32,
}

impl ChunkSchedule {
    /// Schedule for a reduce axis of `reduce_len` consumed `chunk_factor`
    /// elements at a time. Both arguments must be at least 1.
    pub fn for_reduce(reduce_len: u64, chunk_factor: u64) -> Self {
        debug_assert!(reduce_len >= 1 && chunk_factor >= 1);
        let total_chunks = ceil_div(reduce_len, chunk_factor);
        let tail_chunk_len = reduce_len - chunk_factor * (total_chunks - 1);
        Self::from_chunks(total_chunks, chunk_factor, tail_chunk_len)
    }

    /// Schedule for an explicit chunk count; used when the consumer caps the
    /// chunks it can stage per pass below the natural `ceil(R / factor)`.
    pub fn from_chunks(total_chunks: u64, chunk_factor: u64, tail_chunk_len: u64) -> Self {
        debug_assert!(total_chunks >= 1);
        debug_assert!(tail_chunk_len >= 1 && tail_chunk_len <= chunk_factor);
        let basic_block = floor_pow2(total_chunks);
        let fold_count = total_chunks - basic_block;
        let cache_slots = ceil_log2(basic_block).max(1);
        let result_slot = if basic_block <= 1 {
            0
        } else {
            (basic_block - 1).count_ones() - 1
        };
        Self {
            chunk_factor,
            total_chunks,
            tail_chunk_len,
            basic_block,
            fold_count,
            cache_slots,
            result_slot,
        }
    }

    /// Cache slot receiving the partial sum of basic-block chunk `idx`.
    ///
    /// The raw pattern is the number of trailing one-bits of `idx` (equal to
    /// `popcount(idx ^ (idx + 1)) - 1`): slot 0 takes every other chunk,
    /// slot k takes partials that already combine 2^k chunks. The final
    /// carry, which would address one slot past the bank, lands in the top
    /// slot instead; that top slot is `result_slot`.
    pub fn slot_for_chunk(&self, idx: u64) -> u32 {
        debug_assert!(idx < self.basic_block);
        (idx.trailing_ones()).min(self.cache_slots - 1)
    }

    /// Scratch floats needed for the slot bank, `stats_width` floats per slot.
    pub fn slot_bank_floats(&self, stats_width: u64) -> u64 {
        self.cache_slots as u64 * stats_width
    }

    /// Reduce-axis elements covered by basic-block chunk `idx` after folding.
    pub fn chunk_len(&self, idx: u64) -> u64 {
        debug_assert!(idx < self.basic_block);
        let main = if idx == self.total_chunks - 1 {
            self.tail_chunk_len
        } else {
            self.chunk_factor
        };
        if idx < self.fold_count {
            let folded = self.basic_block + idx;
            let extra = if folded == self.total_chunks - 1 {
                self.tail_chunk_len
            } else {
                self.chunk_factor
            };
            main + extra
        } else {
            main
        }
    }
}

/// Replays a schedule over concrete per-chunk values. Tests use it to check
/// that the slot discipline reproduces the plain sum and that the number of
/// pending partials never exceeds the planned bank size.
#[derive(Debug)]
pub struct ScheduleWalker {
    slots: Vec<Option<f32>>,
    consumed: u64,
    basic_block: u64,
    result_slot: u32,
    /// High-water mark of simultaneously pending slots.
    pub max_live: usize,
}

impl ScheduleWalker {
    pub fn new(schedule: &ChunkSchedule) -> Self {
        Self {
            slots: vec![None; schedule.cache_slots as usize],
            consumed: 0,
            basic_block: schedule.basic_block,
            result_slot: schedule.result_slot,
            max_live: 0,
        }
    }

    /// Feed the partial sum of the next basic-block chunk (values must be
    /// pre-folded; see [`fold_chunk_values`]). Returns the slot the merged
    /// partial came to rest in.
    pub fn consume(&mut self, value: f32) -> u32 {
        assert!(self.consumed < self.basic_block, "walker overfed");
        let mut acc = value;
        let top = self.slots.len() - 1;
        let mut k = 0usize;
        while k < top {
            match self.slots[k].take() {
                Some(pending) => {
                    acc += pending;
                    k += 1;
                }
                None => break,
            }
        }
        if k == top {
            if let Some(pending) = self.slots[top].take() {
                acc += pending;
            }
        }
        self.slots[k] = Some(acc);
        self.consumed += 1;
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        self.max_live = self.max_live.max(live);
        k as u32
    }

    /// Final value; panics unless every chunk was consumed and exactly the
    /// planned result slot is occupied.
    pub fn finish(self) -> f32 {
        assert_eq!(self.consumed, self.basic_block, "walker underfed");
        for (i, slot) in self.slots.iter().enumerate() {
            if i != self.result_slot as usize {
                assert!(slot.is_none(), "slot {i} still pending at finish");
            }
        }
        self.slots[self.result_slot as usize].expect("result slot empty")
    }
}

/// Apply the fold step: chunks beyond the basic block are added into the
/// same-index leading chunks, shrinking the stream to `basic_block` values.
pub fn fold_chunk_values(schedule: &ChunkSchedule, chunk_values: &[f32]) -> Vec<f32> {
    assert_eq!(chunk_values.len() as u64, schedule.total_chunks);
    let bb = schedule.basic_block as usize;
    let mut folded = chunk_values[..bb].to_vec();
    for (i, &extra) in chunk_values[bb..].iter().enumerate() {
        folded[i] += extra;
    }
    folded
}
