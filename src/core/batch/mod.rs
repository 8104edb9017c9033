//! Batch processing utilities for the segmentation pipeline.
//!
//! This module provides the tensor aliases used throughout the crate and the
//! sampler that groups sliding windows into model batches.

/// A 3-dimensional tensor `[z, y, x]` of f32 values.
pub type Tensor3D = ndarray::Array3<f32>;

/// A 4-dimensional tensor `[channels, z, y, x]` of f32 values.
pub type Tensor4D = ndarray::Array4<f32>;

/// A 5-dimensional tensor `[batch, channels, z, y, x]` of f32 values.
pub type Tensor5D = ndarray::Array5<f32>;

/// A sampler that creates batches of data with a specified batch size.
///
/// The final batch may be smaller than `batch_size`. A batch size of 0 yields
/// no batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchSampler {
    /// The size of each batch.
    batch_size: usize,
}

impl BatchSampler {
    /// Creates a new BatchSampler with the specified batch size.
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Creates an iterator over batches of data.
    ///
    /// # Arguments
    ///
    /// * `data` - A slice of data to be batched.
    ///
    /// # Returns
    ///
    /// An iterator over batches of data.
    pub fn batches<'a, T>(&self, data: &'a [T]) -> impl Iterator<Item = &'a [T]> {
        let take_count = if self.batch_size == 0 { 0 } else { usize::MAX };
        data.chunks(self.batch_size.max(1)).take(take_count)
    }

    /// Creates an iterator over batches of data together with the index of
    /// their first element in `data`.
    pub fn batches_with_offsets<'a, T>(
        &self,
        data: &'a [T],
    ) -> impl Iterator<Item = (usize, &'a [T])> {
        let step = self.batch_size.max(1);
        self.batches(data)
            .enumerate()
            .map(move |(batch_idx, chunk)| (batch_idx * step, chunk))
    }

    /// Returns the number of batches `len` items split into.
    pub fn batch_count(&self, len: usize) -> usize {
        if self.batch_size == 0 {
            0
        } else {
            len.div_ceil(self.batch_size)
        }
    }
}
