use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::classifier::ModelFiles;
use crate::error::Result;
use crate::io;
use crate::transformer::PreprocessConfig;

/// Everything a single classification run needs, loadable from JSON.
///
/// Missing fields fall back to [`DemoConfig::default`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub model: PathBuf,
    pub weights: Option<PathBuf>,
    pub image: PathBuf,
    pub mean: Option<PathBuf>,
    pub channel_swap: Option<Vec<usize>>,
    pub raw_scale: Option<f32>,
    pub input_scale: Option<f32>,
    /// `[height, width]`
    pub image_dims: [usize; 2],
    /// `[height, width]`
    pub crop_dims: [usize; 2],
    pub oversample: bool,
    pub color: bool,
    pub out_dir: PathBuf,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/rcnn_view/deploy.onnx"),
            weights: None,
            image: PathBuf::from("images/demo.jpg"),
            mean: Some(PathBuf::from("models/ilsvrc_2012_mean.npy")),
            channel_swap: Some(vec![2, 1, 0]),
            raw_scale: Some(255.0),
            input_scale: None,
            image_dims: [256, 256],
            crop_dims: [227, 227],
            oversample: true,
            color: true,
            out_dir: PathBuf::from("plots"),
        }
    }
}

impl DemoConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(config)
    }

    pub fn model_files(&self) -> ModelFiles {
        let files = ModelFiles::new(&self.model);
        match &self.weights {
            Some(weights) => files.with_weights(weights),
            None => files,
        }
    }

    /// Build the preprocessing configuration, reading the mean file if one is set.
    pub fn preprocess(&self) -> Result<PreprocessConfig> {
        let mut config = PreprocessConfig::default()
            .with_image_dims(self.image_dims[0], self.image_dims[1])
            .with_crop_dims(self.crop_dims[0], self.crop_dims[1])
            .with_oversample(self.oversample);
        if let Some(mean) = &self.mean {
            config = config.with_mean(io::load_mean(mean)?);
        }
        if let Some(order) = &self.channel_swap {
            config = config.with_channel_swap(order);
        }
        if let Some(scale) = self.raw_scale {
            config = config.with_raw_scale(scale);
        }
        if let Some(scale) = self.input_scale {
            config = config.with_input_scale(scale);
        }
        Ok(config)
    }
}
