//! Fused-path eligibility.
//!
//! One predicate per operator family, evaluated on `LayoutDescriptor`s, plus
//! the destination check shared by every operator that has a fused path.

use serde::Serialize;

use super::LayoutDescriptor;
use crate::core::types::DType;
use crate::error::{Error, Result};

/// Highest rank the fused primitives accept.
pub const MAX_FUSED_RANK: usize = 6;

const FORWARD_DTYPES: &[DType] = &[DType::F32, DType::BF16, DType::F16, DType::I32, DType::I8, DType::U8];
const BACKWARD_DTYPES: &[DType] = &[DType::F32, DType::BF16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EligibilityPredicate {
    /// Unary forward primitives.
    EltwiseForward,
    /// Primitives consuming (src, diff_dst) pairs.
    EltwiseBackward,
}

impl EligibilityPredicate {
    pub fn dtypes(&self) -> &'static [DType] {
        match self {
            EligibilityPredicate::EltwiseForward => FORWARD_DTYPES,
            EligibilityPredicate::EltwiseBackward => BACKWARD_DTYPES,
        }
    }

    /// Per-operand check: supported dtype, rank <= 6, and opaque, dense or
    /// one-dimensional memory. Backward pairs may also be channels-last.
    pub fn operand_valid(&self, desc: &LayoutDescriptor) -> bool {
        let dense = desc.opaque
            || desc.contiguous
            || desc.rank() == 1
            || (*self == EligibilityPredicate::EltwiseBackward && desc.channels_last);
        self.dtypes().contains(&desc.dtype) && desc.rank() <= MAX_FUSED_RANK && dense
    }

    pub fn accepts(&self, operands: &[LayoutDescriptor]) -> bool {
        match self {
            EligibilityPredicate::EltwiseForward => {
                operands.first().is_some_and(|d| self.operand_valid(d))
            }
            EligibilityPredicate::EltwiseBackward => {
                !operands.is_empty()
                    && operands.iter().all(|d| self.operand_valid(d))
                    && pair_compatible(operands)
            }
        }
    }
}

/// Equal rank and dtype, `other` equal to or expandable to `self`, and both
/// dense in the same memory format.
fn pair_compatible(operands: &[LayoutDescriptor]) -> bool {
    let [lhs, rhs] = operands else {
        return operands.len() == 1;
    };
    if lhs.rank() == 0 || lhs.rank() != rhs.rank() || lhs.dtype != rhs.dtype {
        return false;
    }
    // broadcasting an opaque tensor would need a reorder first
    if lhs.shape != rhs.shape && (rhs.opaque || !is_expandable_to(&rhs.shape, &lhs.shape)) {
        return false;
    }
    (lhs.contiguous && rhs.contiguous) || (lhs.channels_last && rhs.channels_last)
}

/// Broadcast rule: trailing-aligned dims must match or be 1.
pub fn is_expandable_to(shape: &[usize], target: &[usize]) -> bool {
    if shape.len() > target.len() {
        return false;
    }
    shape
        .iter()
        .rev()
        .zip(target.iter().rev())
        .all(|(&s, &t)| s == t || s == 1)
}

/// Common broadcast shape of two operands.
pub fn broadcast_shape(op: &str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut shape = vec![0; rank];
    for i in 0..rank {
        let a = if i < lhs.len() { lhs[lhs.len() - 1 - i] } else { 1 };
        let b = if i < rhs.len() { rhs[rhs.len() - 1 - i] } else { 1 };
        shape[rank - 1 - i] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(Error::ShapeMismatch {
                    op: op.to_string(),
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                });
            }
        };
    }
    Ok(shape)
}

/// Whether a caller-supplied destination can take a fused result.
///
/// No destination, or a dense non-view one of the input dtype, is fine. Any
/// other plain destination only rules the fused path out; an opaque one
/// cannot be demoted and is a hard error.
pub fn destination_eligible(op: &str, out: Option<&LayoutDescriptor>, input_dtype: DType) -> Result<bool> {
    let Some(out) = out else {
        return Ok(true);
    };
    if !out.is_view && out.contiguous && out.dtype == input_dtype {
        return Ok(true);
    }
    if out.opaque {
        return Err(Error::LayoutConflict { op: op.to_string() });
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(dtype: DType, shape: &[usize], opaque: bool, contiguous: bool) -> LayoutDescriptor {
        LayoutDescriptor {
            dtype,
            shape: shape.to_vec(),
            opaque,
            contiguous,
            channels_last: false,
            is_view: false,
        }
    }

    #[test]
    fn test_forward_predicate() {
        let p = EligibilityPredicate::EltwiseForward;
        assert!(p.accepts(&[desc(DType::I8, &[2, 3], false, true)]));
        assert!(p.accepts(&[desc(DType::F32, &[7], false, false)]));
        assert!(p.accepts(&[desc(DType::F16, &[2, 3], true, true)]));
        assert!(!p.accepts(&[desc(DType::F64, &[2, 3], true, true)]));
        assert!(!p.accepts(&[desc(DType::F32, &[2, 3], false, false)]));
        assert!(!p.accepts(&[desc(DType::F32, &[1; 7], true, true)]));
    }

    #[test]
    fn test_backward_predicate_pairs() {
        let p = EligibilityPredicate::EltwiseBackward;
        let a = desc(DType::F32, &[2, 3], true, true);
        assert!(p.accepts(&[a.clone(), desc(DType::F32, &[2, 3], false, true)]));
        assert!(p.accepts(&[a.clone(), desc(DType::F32, &[1, 3], false, true)]));
        assert!(!p.accepts(&[a.clone(), desc(DType::BF16, &[2, 3], false, true)]));
        assert!(!p.accepts(&[a.clone(), desc(DType::F32, &[1, 3], true, true)]));
        assert!(!p.accepts(&[desc(DType::F16, &[2, 3], true, true), a.clone()]));
        assert!(!p.accepts(&[a, desc(DType::F32, &[3], false, true)]));
    }

    #[test]
    fn test_channels_last_pairs() {
        let channels_last = |shape: &[usize]| LayoutDescriptor {
            channels_last: true,
            ..desc(DType::F32, shape, false, false)
        };
        let backward = EligibilityPredicate::EltwiseBackward;
        assert!(backward.accepts(&[channels_last(&[2, 3, 4, 4]), channels_last(&[2, 3, 4, 4])]));
        assert!(!backward.accepts(&[channels_last(&[2, 3, 4, 4]), desc(DType::F32, &[2, 3, 4, 4], false, true)]));
        assert!(!EligibilityPredicate::EltwiseForward.accepts(&[channels_last(&[2, 3, 4, 4])]));
    }

    #[test]
    fn test_destination_check() {
        let plain_view = LayoutDescriptor {
            is_view: true,
            ..desc(DType::F32, &[4], false, true)
        };
        assert!(destination_eligible("relu", None, DType::F32).unwrap());
        assert!(!destination_eligible("relu", Some(&plain_view), DType::F32).unwrap());
        let opaque_other_dtype = desc(DType::BF16, &[4], true, true);
        assert!(matches!(
            destination_eligible("relu", Some(&opaque_other_dtype), DType::F32),
            Err(Error::LayoutConflict { .. })
        ));
    }

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape("t", &[2, 1, 4], &[3, 1]).unwrap(), vec![2, 3, 4]);
        assert!(broadcast_shape("t", &[2, 3], &[4]).is_err());
        assert!(is_expandable_to(&[1, 4], &[3, 4]));
        assert!(!is_expandable_to(&[2, 4], &[3, 4]));
    }
}
