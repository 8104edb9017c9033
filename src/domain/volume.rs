//! Volumes, probability maps and segmentation masks.
//!
//! All arrays are indexed `[z, y, x]` with x varying fastest, which is the
//! on-disk order of both supported container formats.

use crate::core::validation::validate_same_shape;
use crate::core::{SegResult, Tensor3D, Tensor4D};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

/// Absolute tolerance used when comparing geometries read from different files.
pub const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// Pixel type of a volume as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    #[default]
    F32,
    F64,
}

impl ScalarType {
    /// Size of one voxel in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Whether values are stored as integers.
    pub fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }

    /// Converts an f32 voxel value to this type's range, rounding integers.
    pub fn quantize(self, value: f32) -> f64 {
        let v = value as f64;
        let (lo, hi) = match self {
            Self::U8 => (u8::MIN as f64, u8::MAX as f64),
            Self::I8 => (i8::MIN as f64, i8::MAX as f64),
            Self::U16 => (u16::MIN as f64, u16::MAX as f64),
            Self::I16 => (i16::MIN as f64, i16::MAX as f64),
            Self::U32 => (u32::MIN as f64, u32::MAX as f64),
            Self::I32 => (i32::MIN as f64, i32::MAX as f64),
            Self::F32 | Self::F64 => return v,
        };
        if v.is_nan() { 0.0 } else { v.round().clamp(lo, hi) }
    }
}

/// Physical placement of a voxel grid in LPS world coordinates.
///
/// `direction[row][col]`: column `c` is the world direction of index axis `c`
/// (x, y, z order). `spacing` and `origin` are also in x, y, z order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub direction: [[f64; 3]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl Geometry {
    /// Creates a geometry with identity direction cosines.
    pub fn new(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            spacing,
            origin,
            ..Self::default()
        }
    }

    /// Sets the direction cosine matrix.
    pub fn with_direction(mut self, direction: [[f64; 3]; 3]) -> Self {
        self.direction = direction;
        self
    }

    /// Compares two geometries within [`GEOMETRY_TOLERANCE`].
    pub fn approx_eq(&self, other: &Geometry) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= GEOMETRY_TOLERANCE * (1.0 + a.abs().max(b.abs()));
        (0..3).all(|i| {
            close(self.spacing[i], other.spacing[i])
                && close(self.origin[i], other.origin[i])
                && (0..3).all(|j| close(self.direction[i][j], other.direction[i][j]))
        })
    }

    /// World (LPS) position of voxel index `(i, j, k)` in x, y, z order.
    pub fn index_to_world(&self, index: [f64; 3]) -> [f64; 3] {
        let mut world = self.origin;
        for (row, w) in world.iter_mut().enumerate() {
            for (col, &idx) in index.iter().enumerate() {
                *w += self.direction[row][col] * self.spacing[col] * idx;
            }
        }
        world
    }
}

/// A scalar volume with its geometry. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Tensor3D,
    geometry: Geometry,
    scalar_type: ScalarType,
}

impl Volume {
    /// Creates an `f32` volume.
    pub fn new(data: Tensor3D, geometry: Geometry) -> Self {
        Self {
            data,
            geometry,
            scalar_type: ScalarType::F32,
        }
    }

    /// Creates a volume filled with `value`.
    pub fn filled(shape: [usize; 3], value: f32, geometry: Geometry) -> Self {
        Self::new(Array3::from_elem(shape, value), geometry)
    }

    /// Records the on-disk pixel type used when the volume is saved.
    pub fn with_scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.scalar_type = scalar_type;
        self
    }

    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    /// Shape as `[z, y, x]`.
    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Tensor3D {
        self.data
    }

    /// Fails with `ShapeMismatch` unless `other` has the same shape, and logs a
    /// warning when the geometries differ beyond tolerance.
    pub fn ensure_paired(&self, other: &Volume, context: &str) -> SegResult<()> {
        validate_same_shape(&self.shape(), &other.shape(), context)?;
        if !self.geometry.approx_eq(&other.geometry) {
            tracing::warn!("{}: volumes share a shape but not a geometry", context);
        }
        Ok(())
    }
}

/// Per-voxel class scores `[classes, z, y, x]` sharing a volume's geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    data: Tensor4D,
    geometry: Geometry,
}

impl ProbabilityMap {
    pub fn new(data: Tensor4D, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    pub fn data(&self) -> &Tensor4D {
        &self.data
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Number of class channels.
    pub fn classes(&self) -> usize {
        self.data.shape()[0]
    }

    /// Spatial shape as `[z, y, x]`.
    pub fn spatial_shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[1], s[2], s[3]]
    }

    pub fn into_parts(self) -> (Tensor4D, Geometry) {
        (self.data, self.geometry)
    }
}

/// Final label volume.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    labels: Array3<u8>,
    geometry: Geometry,
}

impl SegmentationMask {
    pub fn new(labels: Array3<u8>, geometry: Geometry) -> Self {
        Self { labels, geometry }
    }

    pub fn labels(&self) -> &Array3<u8> {
        &self.labels
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.labels.shape();
        [s[0], s[1], s[2]]
    }

    /// Number of voxels with a non-zero label.
    pub fn foreground_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l != 0).count()
    }

    /// Converts the mask into a `u8` volume for writing.
    pub fn to_volume(&self) -> Volume {
        Volume::new(self.labels.mapv(f32::from), self.geometry).with_scalar_type(ScalarType::U8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_quantize_clamps_and_rounds() {
        assert_eq!(ScalarType::U8.quantize(300.0), 255.0);
        assert_eq!(ScalarType::I16.quantize(-1.6), -2.0);
        assert_eq!(ScalarType::F32.quantize(0.25), 0.25);
        assert_eq!(ScalarType::U16.quantize(f32::NAN), 0.0);
    }

    #[test]
    fn test_index_to_world_uses_spacing_and_direction() {
        let geometry = Geometry::new([2.0, 3.0, 4.0], [10.0, 20.0, 30.0])
            .with_direction([[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert_eq!(geometry.index_to_world([1.0, 1.0, 1.0]), [8.0, 17.0, 34.0]);
    }

    #[test]
    fn test_ensure_paired_rejects_different_shapes() {
        let a = Volume::filled([2, 3, 4], 0.0, Geometry::default());
        let b = Volume::filled([2, 3, 5], 0.0, Geometry::default());
        assert!(a.ensure_paired(&b, "pair").unwrap_err().is_shape_mismatch());
        assert!(a.ensure_paired(&a.clone(), "pair").is_ok());
    }

    #[test]
    fn test_mask_to_volume() {
        let mut labels = Array3::<u8>::zeros((2, 2, 2));
        labels[[1, 1, 1]] = 1;
        let mask = SegmentationMask::new(labels, Geometry::default());
        assert_eq!(mask.foreground_count(), 1);
        let volume = mask.to_volume();
        assert_eq!(volume.scalar_type(), ScalarType::U8);
        assert_eq!(volume.data()[[1, 1, 1]], 1.0);
    }

    #[test]
    fn test_probability_map_shapes() {
        let map = ProbabilityMap::new(Array4::zeros((2, 3, 4, 5)), Geometry::default());
        assert_eq!(map.classes(), 2);
        assert_eq!(map.spatial_shape(), [3, 4, 5]);
    }
}
