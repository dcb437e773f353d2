//! # Overview
//!
//! Runs a pretrained region-based convolutional network classifier on an image through
//! onnxruntime (bindings via [ort](https://github.com/pykeio/ort)), reports the resulting
//! class-probability vector and plots it.
//!
//! Preprocessing follows the conventions of classifiers trained on mean-subtracted 0-255 BGR
//! crops: resize, ten-crop oversampling, channel swap, raw scaling and mean subtraction.
//! [`view`] decodes outputs of viewpoint classifiers that enumerate object classes times
//! azimuth bins.

mod classifier;
pub mod config;
mod error;
pub mod io;
pub mod plot;
mod report;
mod transformer;
mod utils;
pub mod view;

pub use classifier::{default_session_builder, Classifier, ModelFiles};
pub use error::{Error, Result};
pub use report::{Prediction, Summary};
pub use transformer::PreprocessConfig;
pub use utils::{argmax, top_k};

// re-exports
pub use geo_types;
pub use image;
pub use ndarray;
pub use ort;

#[cfg(feature = "save")]
pub use utils::save;
