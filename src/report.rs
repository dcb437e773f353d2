use std::fmt;

use ndarray::{Array2, ArrayView1};

use crate::error::{Error, Result};
use crate::utils;

/// Probability vectors returned by a classifier, one row per input image.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    probs: Array2<f32>,
}

impl Prediction {
    pub fn from_output(probs: Array2<f32>) -> Result<Self> {
        if probs.nrows() == 0 || probs.ncols() == 0 {
            return Err(Error::EmptyBatch);
        }
        Ok(Self { probs })
    }

    /// `(images, classes)`.
    pub fn shape(&self) -> (usize, usize) {
        self.probs.dim()
    }

    pub fn row(&self, index: usize) -> Option<ArrayView1<f32>> {
        (index < self.probs.nrows()).then(|| self.probs.row(index))
    }

    /// Most probable class of image `index`.
    pub fn argmax(&self, index: usize) -> Option<usize> {
        self.row(index).and_then(|row| utils::argmax(&row))
    }

    /// The `k` most probable classes of image `index` with their probabilities.
    pub fn top_k(&self, index: usize, k: usize) -> Vec<(usize, f32)> {
        self.row(index)
            .map(|row| {
                utils::top_k(&row, k)
                    .into_iter()
                    .map(|i| (i, row[i]))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn probabilities(&self) -> &Array2<f32> {
        &self.probs
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.probs
    }

    /// The two summary lines printed for the first image.
    pub fn summary(&self) -> Summary {
        Summary {
            len: self.probs.ncols(),
            class: self.argmax(0),
        }
    }
}

/// Length of the first probability vector and its most probable class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub len: usize,
    pub class: Option<usize>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "prediction shape: ({},)", self.len)?;
        match self.class {
            Some(class) => write!(f, "predicted class: {class}"),
            None => write!(f, "predicted class: none"),
        }
    }
}
