use itertools::Itertools;
use ndarray::{Array1, Array3, ArrayView3, Axis};

use crate::error::{Error, Result};
use crate::io;

/// Preprocessing applied to every image before it is fed to the network.
///
/// Mirrors the usual conventions of classifiers trained on 0-255 BGR data with a mean image
/// subtracted: images come in as `(H, W, C)` in `[0, 1]` and leave as `(C, H, W)` network input.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Per-channel mean, in the channel order *after* `channel_swap`.
    pub mean: Option<Array1<f32>>,
    /// `channel_swap[i]` is the source channel placed at position `i`.
    pub channel_swap: Option<Vec<usize>>,
    /// Multiplier applied before mean subtraction, e.g. `255.0` for models trained on 0-255 data.
    pub raw_scale: Option<f32>,
    /// Multiplier applied after mean subtraction.
    pub input_scale: Option<f32>,
    /// `(height, width)` images are resized to before cropping.
    pub image_dims: (usize, usize),
    /// `(height, width)` of the network input.
    pub crop_dims: (usize, usize),
    /// Average predictions over ten crops instead of using a single center crop.
    pub oversample: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            mean: None,
            channel_swap: None,
            raw_scale: None,
            input_scale: None,
            image_dims: (256, 256),
            crop_dims: (227, 227),
            oversample: true,
        }
    }
}

impl PreprocessConfig {
    pub fn with_mean(mut self, mean: Array1<f32>) -> Self {
        self.mean = Some(mean);
        self
    }

    pub fn with_channel_swap(mut self, order: &[usize]) -> Self {
        self.channel_swap = Some(order.to_vec());
        self
    }

    pub fn with_raw_scale(mut self, scale: f32) -> Self {
        self.raw_scale = Some(scale);
        self
    }

    pub fn with_input_scale(mut self, scale: f32) -> Self {
        self.input_scale = Some(scale);
        self
    }

    pub fn with_image_dims(mut self, height: usize, width: usize) -> Self {
        self.image_dims = (height, width);
        self
    }

    pub fn with_crop_dims(mut self, height: usize, width: usize) -> Self {
        self.crop_dims = (height, width);
        self
    }

    pub fn with_oversample(mut self, oversample: bool) -> Self {
        self.oversample = oversample;
        self
    }

    /// Check the configuration against a channel count.
    pub fn validate(&self, channels: usize) -> Result<()> {
        if let Some(order) = &self.channel_swap {
            let mut sorted = order.clone();
            sorted.sort_unstable();
            if sorted != (0..channels).collect::<Vec<_>>() {
                return Err(Error::InvalidConfig(format!(
                    "channel swap {order:?} is not a permutation of {channels} channels"
                )));
            }
        }
        if let Some(mean) = &self.mean {
            if mean.len() != channels {
                return Err(Error::InvalidConfig(format!(
                    "mean has {} values for {channels} channels",
                    mean.len()
                )));
            }
        }
        let (ih, iw) = self.image_dims;
        let (ch, cw) = self.crop_dims;
        if ch == 0 || cw == 0 || ih == 0 || iw == 0 {
            return Err(Error::InvalidConfig("zero-sized dimensions".to_string()));
        }
        if ch > ih || cw > iw {
            return Err(Error::InvalidConfig(format!(
                "crop {ch}x{cw} is larger than image dims {ih}x{iw}"
            )));
        }
        Ok(())
    }

    /// Turn an `(H, W, C)` image in `[0, 1]` into a `(C, crop_h, crop_w)` network input.
    pub fn preprocess(&self, image: ArrayView3<f32>) -> Result<Array3<f32>> {
        let channels = image.dim().2;
        self.validate(channels)?;

        let resized = io::resize_image(image, self.crop_dims)?;
        let mut chw = resized.permuted_axes([2, 0, 1]);

        if let Some(order) = &self.channel_swap {
            chw = chw.select(Axis(0), order);
        } else {
            chw = chw.as_standard_layout().into_owned();
        }
        if let Some(scale) = self.raw_scale {
            chw *= scale;
        }
        if let Some(mean) = &self.mean {
            for (mut plane, m) in chw.axis_iter_mut(Axis(0)).zip_eq(mean.iter()) {
                plane -= *m;
            }
        }
        if let Some(scale) = self.input_scale {
            chw *= scale;
        }
        Ok(chw)
    }

    /// Undo [`preprocess`](Self::preprocess): `(C, H, W)` network input back to `(H, W, C)`.
    pub fn deprocess(&self, input: ArrayView3<f32>) -> Result<Array3<f32>> {
        let channels = input.dim().0;
        self.validate(channels)?;

        let mut chw = input.to_owned();
        if let Some(scale) = self.input_scale {
            chw /= scale;
        }
        if let Some(mean) = &self.mean {
            for (mut plane, m) in chw.axis_iter_mut(Axis(0)).zip_eq(mean.iter()) {
                plane += *m;
            }
        }
        if let Some(scale) = self.raw_scale {
            chw /= scale;
        }
        if let Some(order) = &self.channel_swap {
            let mut inverse = vec![0; order.len()];
            for (i, &src) in order.iter().enumerate() {
                inverse[src] = i;
            }
            chw = chw.select(Axis(0), &inverse);
        }
        Ok(chw.permuted_axes([1, 2, 0]).as_standard_layout().into_owned())
    }
}
