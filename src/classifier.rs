use std::path::{Path, PathBuf};

use geo_types::Rect;
use ndarray::{Array2, Array3, ArrayViewD};
use ort::{CPUExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder, ValueType};

pub use crate::error::{Error, Result};
use crate::io::{self, OVERSAMPLE_CROPS};
use crate::transformer::PreprocessConfig;

/// Tolerance used when checking that an output row is a probability distribution.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Files making up a pretrained model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    /// ONNX graph.
    pub definition: PathBuf,
    /// ONNX external-data blob holding the trained parameters, if they are not embedded in
    /// the graph. onnxruntime resolves it relative to `definition`, so both must share a
    /// directory.
    pub weights: Option<PathBuf>,
}

impl ModelFiles {
    pub fn new(definition: impl Into<PathBuf>) -> Self {
        Self {
            definition: definition.into(),
            weights: None,
        }
    }

    pub fn with_weights(mut self, weights: impl Into<PathBuf>) -> Self {
        self.weights = Some(weights.into());
        self
    }

    /// Fail early when any of the files is missing or misplaced.
    pub fn check(&self) -> Result<()> {
        if !self.definition.is_file() {
            return Err(Error::MissingFile(self.definition.clone()));
        }
        if let Some(weights) = &self.weights {
            if !weights.is_file() {
                return Err(Error::MissingFile(weights.clone()));
            }
            let def_dir = parent_dir(&self.definition)?;
            let weights_dir = parent_dir(weights)?;
            if def_dir != weights_dir {
                return Err(Error::InvalidConfig(format!(
                    "weights {} must sit next to the model definition in {}",
                    weights.display(),
                    def_dir.display()
                )));
            }
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    let canonical = path.canonicalize()?;
    Ok(canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or(canonical))
}

/// Session builder for the inference phase on CPU.
///
/// A single intra-op thread and sequential execution keep repeated runs bit-identical.
pub fn default_session_builder() -> Result<SessionBuilder> {
    Ok(Session::builder()?
        .with_execution_providers([CPUExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(1)?
        .with_parallel_execution(false)?)
}

/// An image classifier backed by an onnxruntime session.
pub struct Classifier {
    model: ort::Session,
    input_name: String,
    class_count: Option<usize>,
    channels: usize,
    config: PreprocessConfig,
}

impl Classifier {
    /// Construct a [`Classifier`] running on CPU with [`default_session_builder`].
    pub fn new(files: &ModelFiles, config: PreprocessConfig) -> Result<Self> {
        files.check()?;
        Self::commit(files, config, default_session_builder()?)
    }

    /// Construct a [`Classifier`] from model files and a configured session builder.
    ///
    /// When the network declares a fixed input size, it replaces `config.crop_dims`.
    pub fn new_from_file(
        files: &ModelFiles,
        config: PreprocessConfig,
        session_builder: SessionBuilder,
    ) -> Result<Self> {
        files.check()?;
        Self::commit(files, config, session_builder)
    }

    fn commit(
        files: &ModelFiles,
        mut config: PreprocessConfig,
        session_builder: SessionBuilder,
    ) -> Result<Self> {
        let model = session_builder.commit_from_file(&files.definition)?;

        let input = model.inputs.first().ok_or_else(|| {
            Error::InvalidConfig("model declares no inputs".to_string())
        })?;
        let input_name = input.name.clone();

        let mut channels = 3;
        if let ValueType::Tensor { dimensions, .. } = &input.input_type {
            if dimensions.len() != 4 {
                return Err(Error::ShapeMismatch {
                    expected: "NCHW input".to_string(),
                    found: format!("{dimensions:?}"),
                });
            }
            if dimensions[1] > 0 {
                channels = dimensions[1] as usize;
            }
            if dimensions[2] > 0 && dimensions[3] > 0 {
                let dims = (dimensions[2] as usize, dimensions[3] as usize);
                if dims != config.crop_dims {
                    tracing::debug!(
                        "network input is {}x{}, overriding crop dims {:?}",
                        dims.0,
                        dims.1,
                        config.crop_dims
                    );
                    config.crop_dims = dims;
                }
            }
        }
        config.validate(channels)?;

        let class_count = model.outputs.first().and_then(|o| match &o.output_type {
            ValueType::Tensor { dimensions, .. } => dimensions
                .iter()
                .skip(1)
                .try_fold(1_usize, |acc, &d| (d > 0).then(|| acc * d as usize)),
            _ => None,
        });

        tracing::debug!(
            "loaded {} (input `{}`, {} channels, classes: {:?})",
            files.definition.display(),
            input_name,
            channels,
            class_count
        );

        Ok(Self {
            model,
            input_name,
            class_count,
            channels,
            config,
        })
    }

    /// Name of the network input the batch is bound to.
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Class count declared by the model, if its output shape is static.
    pub fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Classify `images`, each `(H, W, C)` in `[0, 1]`, in one forward pass.
    ///
    /// Returns an `(images.len(), classes)` array, one probability vector per image.
    pub fn predict(&self, images: &[Array3<f32>]) -> Result<Array2<f32>> {
        if images.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let resized = images
            .iter()
            .map(|img| io::resize_image(img.view(), self.config.image_dims))
            .collect::<Result<Vec<_>>>()?;

        let crops = if self.config.oversample {
            io::oversample(&resized, self.config.crop_dims)?
        } else {
            resized
                .iter()
                .map(|img| io::center_crop(img.view(), self.config.crop_dims))
                .collect::<Result<Vec<_>>>()?
        };

        let inputs = crops
            .iter()
            .map(|crop| self.config.preprocess(crop.view()))
            .collect::<Result<Vec<_>>>()?;
        let batch = io::batch(&inputs)?;
        tracing::debug!("forward pass on batch {:?}", batch.shape());

        let input_name = &self.input_name;
        let outputs = self.model.run(ort::inputs![input_name => batch]?)?;
        let raw = outputs[0].try_extract_tensor::<f32>()?;

        let crops_per_image = if self.config.oversample {
            OVERSAMPLE_CROPS
        } else {
            1
        };
        postprocess(raw, images.len(), crops_per_image, self.class_count)
    }

    /// Classify regions of interest cut out of a single image.
    pub fn predict_regions(&self, image: &Array3<f32>, regions: &[Rect<f32>]) -> Result<Array2<f32>> {
        let crops = regions
            .iter()
            .map(|region| io::crop_region(image.view(), region))
            .collect::<Result<Vec<_>>>()?;
        self.predict(&crops)
    }
}

/// Flatten the raw network output to one row per crop, check the class count and average the
/// crops of each image.
fn postprocess(
    raw: ArrayViewD<f32>,
    images: usize,
    crops_per_image: usize,
    declared: Option<usize>,
) -> Result<Array2<f32>> {
    let rows = images * crops_per_image;
    if rows == 0 {
        return Err(Error::EmptyBatch);
    }
    if raw.is_empty() || raw.len() % rows != 0 {
        return Err(Error::ShapeMismatch {
            expected: format!("{rows} output rows"),
            found: format!("{:?}", raw.shape()),
        });
    }
    let classes = raw.len() / rows;
    if let Some(declared) = declared {
        if declared != classes {
            return Err(Error::ShapeMismatch {
                expected: format!("{declared} classes"),
                found: format!("{classes} classes"),
            });
        }
    }

    let per_crop = raw.to_shape((rows, classes))?.to_owned();
    let predictions = io::average_crops(per_crop, crops_per_image)?;

    for (i, row) in predictions.outer_iter().enumerate() {
        let sum = row.sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            tracing::warn!("prediction {i} sums to {sum}; the model output may not be a softmax");
        }
    }

    Ok(predictions)
}
