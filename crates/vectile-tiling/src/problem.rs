//! Problem normalizer: fuses a tensor shape around the reduced axis into a
//! three-axis descriptor the strategies plan against.

use crate::error::{Result, TilingError};
use smallvec::SmallVec;
use vectile_api::ElemType;

/// Maximum tensor rank accepted by the planner.
pub const MAX_RANK: usize = 8;

/// Dimension list bounded by [`MAX_RANK`].
pub type ShapeDims = SmallVec<[i64; MAX_RANK]>;

/// Normalized problem description, immutable for the duration of one
/// planning call. All lengths are element counts, never bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemDescriptor {
    /// Product of dimensions strictly before the reduced axis.
    pub outer_left: u64,
    /// Extent of the reduced axis.
    pub reduce_len: u64,
    /// Product of dimensions strictly after the reduced axis.
    pub outer_right: u64,
    pub in_elem: ElemType,
    pub out_elem: ElemType,
}

impl ProblemDescriptor {
    /// Number of independent reductions in the problem.
    pub fn total_outer(&self) -> u64 {
        self.outer_left * self.outer_right
    }

    /// True when the reduced axis is innermost (rows are contiguous).
    pub fn reduce_is_last(&self) -> bool {
        self.outer_right == 1
    }

    /// Total element count of the fused problem.
    pub fn total_elems(&self) -> u64 {
        self.outer_left * self.reduce_len * self.outer_right
    }
}

/// Validate rank and dimension positivity for one tensor shape.
pub fn check_shape(name: &str, shape: &[i64]) -> Result<()> {
    if shape.len() > MAX_RANK {
        return Err(TilingError::Shape(format!(
            "{name} has rank {}, supported maximum is {MAX_RANK}",
            shape.len()
        )));
    }
    for (i, &d) in shape.iter().enumerate() {
        if d <= 0 {
            return Err(TilingError::Shape(format!(
                "{name} dim[{i}] = {d}, dimensions must be positive"
            )));
        }
    }
    Ok(())
}

/// Validate that two semantically paired tensors (e.g. forward output and
/// incoming gradient) agree exactly.
pub fn check_paired(name: &str, expected: &[i64], actual: &[i64]) -> Result<()> {
    check_shape(name, actual)?;
    if expected != actual {
        return Err(TilingError::Shape(format!(
            "{name} shape {actual:?} disagrees with primary shape {expected:?}"
        )));
    }
    Ok(())
}

/// Fuse `shape` around `axis` into (outer_left, reduce, outer_right).
///
/// A unit reduce axis degenerates to an elementwise problem: the whole outer
/// extent is folded into `outer_right` and `outer_left` becomes 1, so the
/// cheap column-parallel strategies handle it.
pub fn normalize(
    shape: &[i64],
    axis: usize,
    in_elem: ElemType,
    out_elem: ElemType,
) -> Result<ProblemDescriptor> {
    check_shape("input", shape)?;
    if shape.is_empty() {
        // Scalars reduce over a virtual unit axis.
        return Ok(ProblemDescriptor {
            outer_left: 1,
            reduce_len: 1,
            outer_right: 1,
            in_elem,
            out_elem,
        });
    }
    if axis >= shape.len() {
        return Err(TilingError::Shape(format!(
            "reduce axis {axis} out of range for rank {}",
            shape.len()
        )));
    }

    let mut outer_left: u64 = 1;
    for &d in &shape[..axis] {
        outer_left *= d as u64;
    }
    let reduce_len = shape[axis] as u64;
    let mut outer_right: u64 = 1;
    for &d in &shape[axis + 1..] {
        outer_right *= d as u64;
    }

    if reduce_len == 1 {
        outer_right *= outer_left;
        outer_left = 1;
    }

    Ok(ProblemDescriptor {
        outer_left,
        reduce_len,
        outer_right,
        in_elem,
        out_elem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuses_around_middle_axis() {
        let p = normalize(&[4, 8, 128, 16], 2, ElemType::F32, ElemType::F32).expect("ok");
        assert_eq!(p.outer_left, 32);
        assert_eq!(p.reduce_len, 128);
        assert_eq!(p.outer_right, 16);
        assert!(!p.reduce_is_last());
        assert_eq!(p.total_outer(), 512);
        assert_eq!(p.total_elems(), 4 * 8 * 128 * 16);
    }

    #[test]
    fn last_axis_reduction_has_unit_outer_right() {
        let p = normalize(&[32, 1000], 1, ElemType::F16, ElemType::F16).expect("ok");
        assert_eq!((p.outer_left, p.reduce_len, p.outer_right), (32, 1000, 1));
        assert!(p.reduce_is_last());
    }

    #[test]
    fn unit_reduce_axis_degenerates_to_elementwise() {
        let p = normalize(&[6, 1, 50], 1, ElemType::F32, ElemType::F32).expect("ok");
        assert_eq!(p.outer_left, 1);
        assert_eq!(p.reduce_len, 1);
        assert_eq!(p.outer_right, 300);
    }

    #[test]
    fn rejects_rank_above_max() {
        let shape = [2i64; 9];
        let err = normalize(&shape, 0, ElemType::F32, ElemType::F32).unwrap_err();
        assert!(matches!(err, TilingError::Shape(_)));
    }

    #[test]
    fn rejects_non_positive_dims_and_bad_axis() {
        assert!(normalize(&[4, 0, 3], 1, ElemType::F32, ElemType::F32).is_err());
        assert!(normalize(&[4, -2], 0, ElemType::F32, ElemType::F32).is_err());
        assert!(normalize(&[4, 2], 2, ElemType::F32, ElemType::F32).is_err());
    }

    #[test]
    fn paired_shape_must_agree() {
        assert!(check_paired("grad", &[2, 3], &[2, 3]).is_ok());
        assert!(check_paired("grad", &[2, 3], &[3, 2]).is_err());
        assert!(check_paired("grad", &[2, 3], &[2, -3]).is_err());
    }
}
