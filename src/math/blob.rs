use rand::prelude::*;
use serde::{Serialize, Deserialize};

use crate::error::{LossError, LossResult};

/// Shape-tagged contiguous buffer, the tensor type loss layers read and write.
///
/// Axis 0 is the batch axis. `data` holds the values and `diff` holds the
/// gradient with respect to them; both always have `count()` elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    shape: Vec<usize>,
    data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    diff: Vec<f64>,
}

impl Blob {
    pub fn zeros(shape: &[usize]) -> LossResult<Blob> {
        let count = volume(shape)?;
        Ok(Blob {
            shape: shape.to_vec(),
            data: vec![0.0; count],
            diff: vec![0.0; count],
        })
    }

    /// Uniform samples in [-1, 1).
    pub fn random<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> LossResult<Blob> {
        let mut res = Blob::zeros(shape)?;
        for x in res.data.iter_mut() {
            *x = rng.gen::<f64>() * 2.0 - 1.0;
        }
        Ok(res)
    }

    /// Builds a blob from flat row-major data; `diff` starts zeroed.
    pub fn from_data(shape: &[usize], data: Vec<f64>) -> LossResult<Blob> {
        let expected = volume(shape)?;
        if data.len() != expected {
            return Err(LossError::DataLength { expected, got: data.len() });
        }
        Ok(Blob {
            shape: shape.to_vec(),
            diff: vec![0.0; data.len()],
            data,
        })
    }

    /// Checks that the buffers agree with the shape. Needed for blobs that
    /// came from serde rather than `from_data`.
    pub fn validate(&self) -> LossResult<()> {
        let expected = volume(&self.shape)?;
        if self.data.len() != expected {
            return Err(LossError::DataLength { expected, got: self.data.len() });
        }
        Ok(())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Number of elements spanned by the axes starting at `axis`.
    pub fn count_from(&self, axis: usize) -> LossResult<usize> {
        count_from(&self.shape, axis)
    }

    /// Batch size (extent of axis 0); 0 for a shapeless blob.
    pub fn num(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn diff(&self) -> &[f64] {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut [f64] {
        // Blobs deserialized without a diff get one on first write.
        if self.diff.len() != self.data.len() {
            self.diff = vec![0.0; self.data.len()];
        }
        &mut self.diff
    }

    /// Resizes both buffers to `shape`, zero-filling them. On error the blob
    /// is left as it was.
    pub fn reshape(&mut self, shape: &[usize]) -> LossResult<()> {
        let count = volume(shape)?;
        self.shape = shape.to_vec();
        self.data.clear();
        self.data.resize(count, 0.0);
        self.diff.clear();
        self.diff.resize(count, 0.0);
        Ok(())
    }

    pub fn reshape_like(&mut self, other: &Blob) -> LossResult<()> {
        self.reshape(other.shape())
    }
}

impl Default for Blob {
    fn default() -> Self {
        Blob { shape: vec![], data: vec![], diff: vec![] }
    }
}

/// Total element count of `shape`.
pub fn volume(shape: &[usize]) -> LossResult<usize> {
    count_from(shape, 0)
}

/// Element count of `shape` from `axis` onwards. An empty tail counts as 1,
/// matching the scalar convention.
pub fn count_from(shape: &[usize], axis: usize) -> LossResult<usize> {
    shape
        .iter()
        .skip(axis)
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| LossError::ShapeOverflow { shape: shape.to_vec() })
}
