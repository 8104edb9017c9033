//! Input validation utilities.
//!
//! Small shape checks shared by the container readers, the processors and the
//! domain types so malformed inputs surface as errors instead of panics deep
//! inside ndarray.

use crate::core::SegError;

/// Validates that `shape` is three-dimensional with non-zero extents.
pub fn validate_volume_shape(shape: &[usize], context: &str) -> Result<(), SegError> {
    if shape.len() != 3 {
        return Err(SegError::InvalidInput {
            message: format!("{}: expected a 3D volume, got shape {:?}", context, shape),
        });
    }
    if shape.contains(&0) {
        return Err(SegError::InvalidInput {
            message: format!("{}: volume extents must be positive, got {:?}", context, shape),
        });
    }
    Ok(())
}

/// Validates that two shapes are identical.
pub fn validate_same_shape(
    expected: &[usize],
    actual: &[usize],
    context: &str,
) -> Result<(), SegError> {
    if expected != actual {
        return Err(SegError::shape_mismatch(context, expected, actual));
    }
    Ok(())
}
