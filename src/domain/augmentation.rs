//! Test-time augmentation variants.
//!
//! A variant is a flip along a subset of the three spatial axes, encoded as a
//! bitmask (bit 0 = x, bit 1 = y, bit 2 = z). Flips are involutions, so the
//! inverse of a variant is the variant itself.

use crate::core::config::TtaConfig;
use ndarray::{Array, Axis, Dimension};
use std::fmt;

/// Upper bound on the variant pool, identity included.
pub const MAX_VARIANTS: usize = 8;

/// A reversible spatial flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AugmentationVariant(u8);

impl AugmentationVariant {
    /// The identity transform.
    pub const IDENTITY: Self = Self(0);

    /// Creates a variant from a flip bitmask; masks above `0b111` are rejected.
    pub fn from_mask(mask: u8) -> Option<Self> {
        (mask < MAX_VARIANTS as u8).then_some(Self(mask))
    }

    pub fn mask(self) -> u8 {
        self.0
    }

    pub fn is_identity(self) -> bool {
        self.0 == 0
    }

    pub fn flips_x(self) -> bool {
        self.0 & 0b001 != 0
    }

    pub fn flips_y(self) -> bool {
        self.0 & 0b010 != 0
    }

    pub fn flips_z(self) -> bool {
        self.0 & 0b100 != 0
    }

    /// Flips never change shape.
    pub fn preserves_shape(self) -> bool {
        true
    }

    /// The inverse transform.
    pub fn inverse(self) -> Self {
        self
    }

    /// Array axes to flip for an array whose trailing three axes are `[z, y, x]`.
    fn flipped_axes(self, ndim: usize) -> impl Iterator<Item = Axis> {
        let base = ndim.saturating_sub(3);
        [
            (self.flips_z(), base),
            (self.flips_y(), base + 1),
            (self.flips_x(), base + 2),
        ]
        .into_iter()
        .filter_map(|(flip, axis)| flip.then_some(Axis(axis)))
    }

    /// Applies the flip to the trailing three (spatial) axes of `array`.
    pub fn apply<D: Dimension>(self, array: &Array<f32, D>) -> Array<f32, D> {
        if self.is_identity() {
            return array.clone();
        }
        let mut view = array.view();
        for axis in self.flipped_axes(array.ndim()) {
            view.invert_axis(axis);
        }
        view.as_standard_layout().into_owned()
    }

    /// Undoes [`apply`](Self::apply).
    pub fn invert<D: Dimension>(self, array: &Array<f32, D>) -> Array<f32, D> {
        self.inverse().apply(array)
    }
}

impl fmt::Display for AugmentationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            return f.write_str("identity");
        }
        let axes: Vec<&str> = [(self.flips_x(), "x"), (self.flips_y(), "y"), (self.flips_z(), "z")]
            .into_iter()
            .filter_map(|(on, name)| on.then_some(name))
            .collect();
        write!(f, "flip({})", axes.join(","))
    }
}

/// Ordered set of candidate variants: identity first, then ascending bitmask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPool {
    variants: Vec<AugmentationVariant>,
}

impl VariantPool {
    /// The first `max_variants` variants in canonical order (at least identity).
    pub fn new(max_variants: usize) -> Self {
        let count = max_variants.clamp(1, MAX_VARIANTS);
        let variants = (0..count as u8).map(AugmentationVariant).collect();
        Self { variants }
    }

    /// The full pool of eight variants.
    pub fn full() -> Self {
        Self::new(MAX_VARIANTS)
    }

    /// A pool holding only identity.
    pub fn identity_only() -> Self {
        Self::new(1)
    }

    /// Builds the pool from TTA settings; disabled TTA yields identity only.
    pub fn from_config(config: &TtaConfig) -> Self {
        if config.enabled {
            Self::new(config.max_variants)
        } else {
            Self::identity_only()
        }
    }

    /// Builds a pool from explicit variants, forcing identity to the front and
    /// dropping duplicates and shape-changing variants.
    pub fn from_variants(variants: impl IntoIterator<Item = AugmentationVariant>) -> Self {
        let mut ordered = vec![AugmentationVariant::IDENTITY];
        for variant in variants {
            if variant.preserves_shape() && !ordered.contains(&variant) {
                ordered.push(variant);
            }
        }
        ordered.truncate(MAX_VARIANTS);
        Self { variants: ordered }
    }

    pub fn variants(&self) -> &[AugmentationVariant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AugmentationVariant> {
        self.variants.iter()
    }
}

impl Default for VariantPool {
    fn default() -> Self {
        Self::full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn ramp() -> Array3<f32> {
        Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as f32)
    }

    #[test]
    fn test_pool_order_is_identity_then_lexicographic() {
        let pool = VariantPool::new(4);
        let names: Vec<String> = pool.iter().map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["identity", "flip(x)", "flip(y)", "flip(x,y)"]);
        assert_eq!(VariantPool::new(100).len(), MAX_VARIANTS);
        assert_eq!(VariantPool::new(0).len(), 1);
    }

    #[test]
    fn test_flip_x_reverses_last_axis() {
        let flipped = AugmentationVariant::from_mask(0b001).unwrap().apply(&ramp());
        assert_eq!(flipped[[0, 0, 0]], 3.0);
        assert_eq!(flipped[[1, 2, 3]], 120.0);
        assert!(flipped.is_standard_layout());
    }

    #[test]
    fn test_flips_are_involutions() {
        let data = ramp();
        for variant in VariantPool::full().iter() {
            let once = variant.apply(&data);
            assert_eq!(once.shape(), data.shape());
            assert_eq!(variant.invert(&once), data, "{} is not an involution", variant);
        }
    }

    #[test]
    fn test_flip_skips_channel_axis() {
        let data = Array4::from_shape_fn((2, 1, 1, 2), |(c, _, _, x)| (c * 10 + x) as f32);
        let flipped = AugmentationVariant::from_mask(0b111).unwrap().apply(&data);
        assert_eq!(flipped[[0, 0, 0, 0]], 1.0);
        assert_eq!(flipped[[1, 0, 0, 0]], 11.0);
    }

    #[test]
    fn test_disabled_tta_is_identity_only() {
        let config = TtaConfig::default().with_enabled(false);
        assert_eq!(
            VariantPool::from_config(&config).variants(),
            &[AugmentationVariant::IDENTITY]
        );
    }

    #[test]
    fn test_from_variants_puts_identity_first() {
        let x = AugmentationVariant::from_mask(1).unwrap();
        let pool = VariantPool::from_variants([x, AugmentationVariant::IDENTITY, x]);
        assert_eq!(pool.variants(), &[AugmentationVariant::IDENTITY, x]);
        assert!(AugmentationVariant::from_mask(8).is_none());
    }
}
