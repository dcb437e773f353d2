use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ort (onnxruntime) error: {0}")]
    Ort(#[from] ort::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("npy: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),
    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "save")]
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("plot: {0}")]
    Plot(String),
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("no images to classify")]
    EmptyBatch,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
