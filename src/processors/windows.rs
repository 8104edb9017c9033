//! Sliding-window grid computation and blending weights.
//!
//! Windows tile a volume with a fixed step per axis. The last window on each
//! axis is shifted inward so it ends exactly at the volume border; windows
//! never extend past the end of the volume.

use crate::core::config::BlendMode;
use crate::core::{SegError, SegResult, Tensor3D};
use itertools::iproduct;
use ndarray::{Array3, Slice};

/// Start offsets of windows of size `window` along an axis of length `dim`.
///
/// The step is `max(1, floor(window * (1 - overlap)))`. When `dim <= window`
/// a single window at offset 0 is returned.
pub fn window_starts(dim: usize, window: usize, overlap: f64) -> Vec<usize> {
    if window == 0 || dim <= window {
        return vec![0];
    }
    let step = window_step(window, overlap);
    let last = dim - window;
    let mut starts = Vec::with_capacity(last / step + 2);
    let mut start = 0;
    while start < last {
        starts.push(start);
        start += step;
    }
    starts.push(last);
    starts
}

/// Distance between consecutive window starts.
pub fn window_step(window: usize, overlap: f64) -> usize {
    ((window as f64 * (1.0 - overlap)).floor() as usize).max(1)
}

/// One window position inside a volume, `[z, y, x]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: [usize; 3],
    pub size: [usize; 3],
}

impl Window {
    /// Per-axis slices selecting this window.
    pub fn slices(&self) -> [Slice; 3] {
        [0, 1, 2].map(|axis| {
            let start = self.start[axis];
            Slice::from(start..start + self.size[axis])
        })
    }

    /// Whether the voxel `[z, y, x]` lies inside this window.
    pub fn contains(&self, voxel: [usize; 3]) -> bool {
        (0..3).all(|a| voxel[a] >= self.start[a] && voxel[a] < self.start[a] + self.size[a])
    }
}

/// The full set of windows covering a volume, in z-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowGrid {
    shape: [usize; 3],
    window: [usize; 3],
    windows: Vec<Window>,
}

impl WindowGrid {
    /// Builds the grid for a volume of `shape` (which must be at least `window`
    /// on every axis).
    pub fn new(shape: [usize; 3], window: [usize; 3], overlap: f64) -> SegResult<Self> {
        if window.contains(&0) {
            return Err(SegError::config_error(format!(
                "Window size must be positive on every axis, got {:?}",
                window
            )));
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(SegError::config_error_with_context(
                "overlap",
                &overlap.to_string(),
                "must be in [0, 1)",
            ));
        }
        if (0..3).any(|a| shape[a] < window[a]) {
            return Err(SegError::shape_mismatch(
                "volume smaller than window (pad before tiling)",
                &window,
                &shape,
            ));
        }

        let starts: [Vec<usize>; 3] = [0, 1, 2].map(|a| window_starts(shape[a], window[a], overlap));
        let windows = iproduct!(&starts[0], &starts[1], &starts[2])
            .map(|(&z, &y, &x)| Window {
                start: [z, y, x],
                size: window,
            })
            .collect();

        Ok(Self {
            shape,
            window,
            windows,
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn window(&self) -> [usize; 3] {
        self.window
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Blending weights for one window.
///
/// The Gaussian map peaks at 1 in the window center, uses
/// `sigma = sigma_scale * window` per axis and is floored at its smallest
/// positive value so no voxel gets zero weight.
pub fn importance_map(window: [usize; 3], mode: BlendMode) -> Tensor3D {
    match mode {
        BlendMode::Constant => Array3::ones(window),
        BlendMode::Gaussian { sigma_scale } => {
            let profile = |n: usize| -> Vec<f64> {
                let center = (n as f64 - 1.0) / 2.0;
                let sigma = (sigma_scale * n as f64).max(f64::EPSILON);
                (0..n)
                    .map(|i| {
                        let d = i as f64 - center;
                        (-(d * d) / (2.0 * sigma * sigma)).exp()
                    })
                    .collect()
            };
            let (pz, py, px) = (profile(window[0]), profile(window[1]), profile(window[2]));
            let mut map =
                Array3::from_shape_fn(window, |(z, y, x)| (pz[z] * py[y] * px[x]) as f32);

            let max = map.iter().copied().fold(0.0f32, f32::max);
            if max > 0.0 {
                map.mapv_inplace(|v| v / max);
            }
            let min_positive = map
                .iter()
                .copied()
                .filter(|&v| v > 0.0)
                .fold(f32::INFINITY, f32::min);
            let floor = if min_positive.is_finite() { min_positive } else { 1.0 };
            map.mapv_inplace(|v| if v > 0.0 { v } else { floor });
            map
        }
    }
}
