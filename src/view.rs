//! Viewpoint decoding for classifiers whose outputs enumerate object classes times azimuth bins.
//!
//! The standard layout is 12 object classes with 360 one-degree azimuth bins each, so class
//! index `c` and azimuth `a` live at position `c * 360 + a`. Class index 12 is background.

use itertools::Itertools;
use ndarray::{s, Array1, ArrayView1, ArrayView2, Axis};

use crate::error::{Error, Result};
use crate::utils;

/// Azimuth bins per object class.
pub const AZIMUTH_BINS: usize = 360;
/// Number of object classes (excluding background).
pub const OBJECT_CLASSES: usize = 12;
/// Class index used for background.
pub const BACKGROUND_CLASS: usize = OBJECT_CLASSES;
/// Width of a viewpoint probability vector.
pub const VIEW_VECTOR_LEN: usize = OBJECT_CLASSES * AZIMUTH_BINS;
/// Offset added to labels of real (as opposed to rendered) training images.
pub const REAL_IMAGE_OFFSET: u32 = 10000;

/// PASCAL3D class index (0-11, 12 = background) to PASCAL VOC class index (1-20, 0 = background).
pub const PASCAL3D_TO_VOC: [u32; OBJECT_CLASSES + 1] = [1, 2, 4, 5, 6, 7, 9, 11, 14, 18, 19, 20, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewLabel {
    pub class: usize,
    pub azimuth: usize,
}

impl ViewLabel {
    pub fn from_label(label: u32) -> Self {
        let label = label as usize;
        Self {
            class: label / AZIMUTH_BINS,
            azimuth: label % AZIMUTH_BINS,
        }
    }

    pub fn to_label(self) -> u32 {
        (self.class * AZIMUTH_BINS + self.azimuth) as u32
    }

    pub fn is_background(&self) -> bool {
        self.class == BACKGROUND_CLASS
    }
}

/// Shortest distance between two azimuths on the 360-degree circle.
pub fn angular_error(a: usize, b: usize) -> usize {
    let d = a.abs_diff(b) % AZIMUTH_BINS;
    d.min(AZIMUTH_BINS - d)
}

/// Most probable azimuth within `class`'s slice of a viewpoint probability vector.
pub fn predict_azimuth(probs: ArrayView1<f32>, class: usize) -> Result<usize> {
    if probs.len() != VIEW_VECTOR_LEN {
        return Err(Error::ShapeMismatch {
            expected: format!("{VIEW_VECTOR_LEN} probabilities"),
            found: format!("{}", probs.len()),
        });
    }
    if class >= OBJECT_CLASSES {
        return Err(Error::InvalidConfig(format!("no azimuth bins for class {class}")));
    }
    let start = class * AZIMUTH_BINS;
    let bins = probs.slice(s![start..start + AZIMUTH_BINS]);
    Ok(utils::argmax(&bins).unwrap_or(0))
}

/// Class and azimuth of the single most probable bin.
pub fn decode(probs: ArrayView1<f32>) -> Result<ViewLabel> {
    if probs.len() != VIEW_VECTOR_LEN {
        return Err(Error::ShapeMismatch {
            expected: format!("{VIEW_VECTOR_LEN} probabilities"),
            found: format!("{}", probs.len()),
        });
    }
    let best = utils::argmax(&probs).unwrap_or(0);
    Ok(ViewLabel::from_label(best as u32))
}

/// Fraction of non-background rows whose predicted azimuth is within `tol_angle` of the label.
///
/// The azimuth is predicted inside the labelled class's bins only. Returns `None` when every
/// label is background.
pub fn view_accuracy(probs: ArrayView2<f32>, labels: &[u32], tol_angle: usize) -> Result<Option<f32>> {
    let (rows, width) = probs.dim();
    if rows != labels.len() {
        return Err(Error::ShapeMismatch {
            expected: format!("{} rows", labels.len()),
            found: format!("{rows}"),
        });
    }
    if width != VIEW_VECTOR_LEN {
        return Err(Error::ShapeMismatch {
            expected: format!("{VIEW_VECTOR_LEN} columns"),
            found: format!("{width}"),
        });
    }

    let mut hits = 0;
    let mut counted = 0;
    for (row, &label) in probs.axis_iter(Axis(0)).zip_eq(labels) {
        let label = ViewLabel::from_label(label);
        if label.is_background() {
            continue;
        }
        counted += 1;
        let predicted = predict_azimuth(row, label.class)?;
        if angular_error(predicted, label.azimuth) <= tol_angle {
            hits += 1;
        }
    }

    Ok((counted > 0).then(|| hits as f32 / counted as f32))
}

/// Split a periodic label into a coarse bin and the offset inside it.
///
/// Labels range over `0..label_max` and are first rescaled to `0..period`.
/// E.g. with `period = 360`, `split_num = 4`: `124 -> (1, 34)`.
pub fn label_split(label: f32, period: f32, split_num: u32, label_max: f32) -> (u32, f32) {
    let unit = period / split_num as f32;
    let label = label / (label_max / period);
    ((label / unit).floor() as u32, label % unit)
}

/// Fraction of predictions falling into the same quantization bin as their labels.
///
/// `0..in_period` is cut into `out_num` bins centred on 0, so both ends of the period share
/// bin 0. Labels are rescaled from `0..label_max` first.
pub fn quantized_accuracy(
    preds: &[f32],
    labels: &[f32],
    in_period: f32,
    out_num: u32,
    label_max: f32,
) -> Result<f32> {
    if preds.len() != labels.len() {
        return Err(Error::ShapeMismatch {
            expected: format!("{} predictions", labels.len()),
            found: format!("{}", preds.len()),
        });
    }
    if preds.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let width = in_period / out_num as f32;
    let bin = |v: f32| -> i64 { ((v + width / 2.0).rem_euclid(in_period) / width).floor() as i64 };

    let hits = preds
        .iter()
        .zip(labels)
        .filter(|&(&p, &l)| {
            let (p, l) = (bin(p), bin(l / (label_max / in_period)));
            tracing::trace!("quantized pred {p}, label {l}");
            p == l
        })
        .count();
    Ok(hits as f32 / preds.len() as f32)
}

/// Combine a bin classifier with per-bin offset regressors.
///
/// `bin_probs` is `(N, bins)`, `offsets` is `(N, bins)` with one regressed offset per bin.
/// The offset of the most probable bin is clamped to `[0, period / bins]` and added to the bin
/// start.
pub fn mixed_prediction(bin_probs: ArrayView2<f32>, offsets: ArrayView2<f32>, period: f32) -> Result<Array1<f32>> {
    if bin_probs.dim() != offsets.dim() {
        return Err(Error::ShapeMismatch {
            expected: format!("{:?}", bin_probs.dim()),
            found: format!("{:?}", offsets.dim()),
        });
    }
    let bins = bin_probs.ncols();
    if bins == 0 {
        return Err(Error::EmptyBatch);
    }
    if !(period.is_finite() && period > 0.0) {
        return Err(Error::InvalidConfig(format!("period must be positive, got {period}")));
    }
    let unit = period / bins as f32;

    Ok(bin_probs
        .axis_iter(Axis(0))
        .zip_eq(offsets.axis_iter(Axis(0)))
        .map(|(probs, offs)| {
            let best = utils::argmax(&probs).unwrap_or(0);
            let offset = match offs[best] {
                o if o.is_nan() => 0.0,
                o => o.min(unit).max(0.0),
            };
            offset + best as f32 * unit
        })
        .collect())
}

/// Detection and viewpoint labels derived from a joint label.
///
/// Input: `0` is background, `1..=4320` are rendered objects (shifted by one) and
/// `10000..14320` are real-image objects. Outputs the PASCAL VOC detection label (with the
/// real-image offset kept) and the view label, where background maps to `14320`.
pub fn det_view_split(label: u32) -> (u32, u32) {
    if label == 0 {
        return (0, REAL_IMAGE_OFFSET + VIEW_VECTOR_LEN as u32);
    }
    if label < REAL_IMAGE_OFFSET {
        let view = label - 1;
        let det = PASCAL3D_TO_VOC[(view as usize / AZIMUTH_BINS).min(BACKGROUND_CLASS)];
        (det, view)
    } else {
        let class = ((label - REAL_IMAGE_OFFSET) as usize / AZIMUTH_BINS).min(BACKGROUND_CLASS);
        (PASCAL3D_TO_VOC[class] + REAL_IMAGE_OFFSET, label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripleView {
    pub class: u32,
    pub azimuth: u32,
    pub elevation: u32,
    pub tilt: u32,
}

/// Decode a label over `classes x 360 azimuth x 180 elevation x 180 tilt`.
///
/// The angles are multiplied by the class index, which zeroes them for class 0.
pub fn triple_view_split(label: u32) -> TripleView {
    const ELEVATION_TILT: u32 = 180 * 180;
    const PER_CLASS: u32 = AZIMUTH_BINS as u32 * ELEVATION_TILT;

    let class = label / PER_CLASS;
    let rest = label % PER_CLASS;
    let azimuth = rest / ELEVATION_TILT;
    let rest = rest % ELEVATION_TILT;
    let (elevation, tilt) = (rest / 180, rest % 180);

    TripleView {
        class,
        azimuth: azimuth * class,
        elevation: elevation * class,
        tilt: tilt * class,
    }
}
