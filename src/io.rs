//! Image and auxiliary array loading, resizing and cropping.
//!
//! Images are carried around as `(height, width, channels)` arrays of `f32` in `[0, 1]`.

use std::path::Path;

use geo_types::Rect;
use image::{imageops, DynamicImage, ImageBuffer, Luma, RgbImage};
use ndarray::{s, stack, Array1, Array2, Array3, ArrayD, ArrayView3, Axis};
use ndarray_npy::ReadNpyError;

use crate::error::{Error, Result};

/// Number of crops [`oversample`] produces per image.
pub const OVERSAMPLE_CROPS: usize = 10;

fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingFile(path.to_path_buf()))
    }
}

/// Load an image as an `(H, W, C)` array with values in `[0, 1]`.
///
/// With `color` set the result always has three RGB channels; greyscale sources are tiled.
/// Otherwise the result has a single luminance channel.
pub fn load_image(path: impl AsRef<Path>, color: bool) -> Result<Array3<f32>> {
    let path = path.as_ref();
    ensure_exists(path)?;
    let img = image::open(path)?;
    tracing::debug!(
        "loaded {} ({}x{}, {:?})",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );
    Ok(image_to_array(&img, color))
}

/// Convert a decoded image to an `(H, W, C)` array with values in `[0, 1]`.
pub fn image_to_array(img: &DynamicImage, color: bool) -> Array3<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    if color {
        let rgb = img.to_rgb32f();
        // UNWRAP SAFETY: an Rgb32F buffer always holds width * height * 3 samples
        Array3::from_shape_vec((height, width, 3), rgb.into_raw()).unwrap()
    } else {
        let luma = img.to_luma32f();
        Array3::from_shape_vec((height, width, 1), luma.into_raw()).unwrap()
    }
}

/// Convert an `(H, W, C)` array in `[0, 1]` back to an 8-bit RGB image.
pub fn to_image(array: ArrayView3<f32>) -> Result<DynamicImage> {
    let (height, width, channels) = array.dim();
    if channels != 1 && channels != 3 {
        return Err(Error::ShapeMismatch {
            expected: "1 or 3 channels".to_string(),
            found: format!("{channels} channels"),
        });
    }

    let mut out = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = array[[y, x, c.min(channels - 1)]];
            pixel.0[c] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    Ok(DynamicImage::ImageRgb8(out))
}

/// Resize every channel of `image` to `(height, width)` with a triangle (bilinear) filter.
///
/// Values are expected to lie in `[0, 1]`; the resampler clamps to that range.
pub fn resize_image(image: ArrayView3<f32>, dims: (usize, usize)) -> Result<Array3<f32>> {
    let (height, width, channels) = image.dim();
    if (height, width) == dims {
        return Ok(image.to_owned());
    }
    if dims.0 == 0 || dims.1 == 0 {
        return Err(Error::InvalidConfig(format!(
            "cannot resize to {}x{}",
            dims.0, dims.1
        )));
    }

    let mut planes = Vec::with_capacity(channels);
    for c in 0..channels {
        let plane: Vec<f32> = image.slice(s![.., .., c]).iter().copied().collect();
        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(width as u32, height as u32, plane).ok_or_else(|| {
                Error::ShapeMismatch {
                    expected: format!("{} samples", width * height),
                    found: "short plane".to_string(),
                }
            })?;
        let resized = imageops::resize(
            &buffer,
            dims.1 as u32,
            dims.0 as u32,
            imageops::FilterType::Triangle,
        );
        planes.push(Array3::from_shape_vec((dims.0, dims.1, 1), resized.into_raw())?);
    }

    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    Ok(ndarray::concatenate(Axis(2), &views)?)
}

fn check_crop(image: &ArrayView3<f32>, crop: (usize, usize)) -> Result<()> {
    let (height, width, _) = image.dim();
    if crop.0 > height || crop.1 > width || crop.0 == 0 || crop.1 == 0 {
        return Err(Error::ShapeMismatch {
            expected: format!("crop within {height}x{width}"),
            found: format!("{}x{}", crop.0, crop.1),
        });
    }
    Ok(())
}

/// Take the centered `(height, width)` window of `image`.
pub fn center_crop(image: ArrayView3<f32>, crop: (usize, usize)) -> Result<Array3<f32>> {
    check_crop(&image, crop)?;
    let (height, width, _) = image.dim();
    let y = (height - crop.0) / 2;
    let x = (width - crop.1) / 2;
    Ok(image.slice(s![y..y + crop.0, x..x + crop.1, ..]).to_owned())
}

/// Ten-crop augmentation: four corners and the center, then the horizontal mirror of each,
/// for every image in order.
pub fn oversample(images: &[Array3<f32>], crop: (usize, usize)) -> Result<Vec<Array3<f32>>> {
    let mut crops = Vec::with_capacity(images.len() * OVERSAMPLE_CROPS);
    for image in images {
        let view = image.view();
        check_crop(&view, crop)?;
        let (height, width, _) = view.dim();
        let origins = [
            (0, 0),
            (0, width - crop.1),
            (height - crop.0, 0),
            (height - crop.0, width - crop.1),
            ((height - crop.0) / 2, (width - crop.1) / 2),
        ];

        let start = crops.len();
        for (y, x) in origins {
            crops.push(view.slice(s![y..y + crop.0, x..x + crop.1, ..]).to_owned());
        }
        for i in start..start + origins.len() {
            let mirrored = crops[i].slice(s![.., ..;-1, ..]).to_owned();
            crops.push(mirrored);
        }
    }
    Ok(crops)
}

/// Average consecutive groups of `crops_per_image` rows, as laid out by [`oversample`].
pub fn average_crops(per_crop: Array2<f32>, crops_per_image: usize) -> Result<Array2<f32>> {
    let (rows, classes) = per_crop.dim();
    if crops_per_image == 0 || rows == 0 {
        return Err(Error::EmptyBatch);
    }
    if crops_per_image == 1 {
        return Ok(per_crop);
    }
    if rows % crops_per_image != 0 {
        return Err(Error::ShapeMismatch {
            expected: format!("a multiple of {crops_per_image} rows"),
            found: format!("{rows}"),
        });
    }
    per_crop
        .into_shape((rows / crops_per_image, crops_per_image, classes))?
        .mean_axis(Axis(1))
        .ok_or(Error::EmptyBatch)
}

/// Cut a region of interest out of `image`, clamped to the image bounds.
pub fn crop_region(image: ArrayView3<f32>, region: &Rect<f32>) -> Result<Array3<f32>> {
    let (height, width, _) = image.dim();
    let x1 = (region.min().x.max(0.0) as usize).min(width);
    let y1 = (region.min().y.max(0.0) as usize).min(height);
    let x2 = (region.max().x.max(0.0).ceil() as usize).min(width);
    let y2 = (region.max().y.max(0.0).ceil() as usize).min(height);
    if x2 <= x1 || y2 <= y1 {
        return Err(Error::InvalidConfig(format!(
            "region {:?} does not overlap the {width}x{height} image",
            region
        )));
    }
    Ok(image.slice(s![y1..y2, x1..x2, ..]).to_owned())
}

/// Read a mean array from an `.npy` file and reduce it to one value per channel.
///
/// Accepts a `C` vector or a `C x H x W` mean image, stored as `f32` or `f64`. A mean image is
/// not resized and subtracted pixel by pixel; it is averaged over its spatial axes, so only its
/// per-channel means reach [`PreprocessConfig`](crate::PreprocessConfig).
pub fn load_mean(path: impl AsRef<Path>) -> Result<Array1<f32>> {
    let path = path.as_ref();
    ensure_exists(path)?;
    let raw: ArrayD<f32> = match ndarray_npy::read_npy::<_, ArrayD<f32>>(path) {
        Ok(a) => a,
        Err(ReadNpyError::WrongDescriptor(_)) => {
            ndarray_npy::read_npy::<_, ArrayD<f64>>(path)?.mapv(|v| v as f32)
        }
        Err(err) => return Err(err.into()),
    };
    let mean = channel_mean(raw)?;
    tracing::debug!("per-channel mean from {}: {:?}", path.display(), mean);
    Ok(mean)
}

/// Reduce a mean array to per-channel values.
pub fn channel_mean(raw: ArrayD<f32>) -> Result<Array1<f32>> {
    match raw.ndim() {
        1 => Ok(raw.into_dimensionality()?),
        3 => {
            let raw = raw.into_dimensionality::<ndarray::Ix3>()?;
            raw.mean_axis(Axis(2))
                .and_then(|a| a.mean_axis(Axis(1)))
                .ok_or_else(|| Error::InvalidConfig("empty mean image".to_string()))
        }
        n => Err(Error::ShapeMismatch {
            expected: "1-D or 3-D mean array".to_string(),
            found: format!("{n}-D"),
        }),
    }
}

/// Stack `(C, H, W)` tensors into one `(N, C, H, W)` batch.
pub(crate) fn batch(tensors: &[Array3<f32>]) -> Result<ndarray::Array4<f32>> {
    let views: Vec<_> = tensors.iter().map(|t| t.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::coord;
    use ndarray::{array, Array};

    fn ramp(h: usize, w: usize, c: usize) -> Array3<f32> {
        let n = (h * w * c) as f32;
        Array::from_shape_fn((h, w, c), |(y, x, z)| ((y * w + x) * c + z) as f32 / n)
    }

    #[test]
    fn center_crop_takes_middle() {
        let img = ramp(5, 5, 1);
        let crop = center_crop(img.view(), (3, 3)).unwrap();
        assert_eq!(crop.dim(), (3, 3, 1));
        assert_eq!(crop[[0, 0, 0]], img[[1, 1, 0]]);
        assert_eq!(crop[[2, 2, 0]], img[[3, 3, 0]]);
    }

    #[test]
    fn crop_larger_than_image_fails() {
        let img = ramp(4, 4, 3);
        assert!(matches!(
            center_crop(img.view(), (5, 4)),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn oversample_produces_corners_center_and_mirrors() {
        let img = ramp(4, 6, 3);
        let crops = oversample(&[img.clone(), img.clone()], (2, 3)).unwrap();
        assert_eq!(crops.len(), 2 * OVERSAMPLE_CROPS);

        assert_eq!(crops[0], img.slice(s![0..2, 0..3, ..]));
        assert_eq!(crops[1], img.slice(s![0..2, 3..6, ..]));
        assert_eq!(crops[2], img.slice(s![2..4, 0..3, ..]));
        assert_eq!(crops[3], img.slice(s![2..4, 3..6, ..]));
        assert_eq!(crops[4], img.slice(s![1..3, 1..4, ..]));
        for i in 0..5 {
            assert_eq!(crops[i + 5], crops[i].slice(s![.., ..;-1, ..]));
        }
        assert_eq!(crops[10], crops[0]);
    }

    #[test]
    fn average_crops_groups_consecutive_rows() {
        // two images, two crops each: rows 0-1 belong to the first image, rows 2-3 to the second
        let per_crop = array![[1.0_f32, 0.0], [0.0, 1.0], [0.8, 0.2], [0.6, 0.4]];
        let averaged = average_crops(per_crop, 2).unwrap();
        assert_eq!(averaged.dim(), (2, 2));
        assert!((averaged[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((averaged[[1, 0]] - 0.7).abs() < 1e-6);
        assert!((averaged[[1, 1]] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn average_crops_matches_oversample_layout() {
        // each of the ten crops of image i gets a one-hot row at class i
        let mut per_crop = Array2::<f32>::zeros((2 * OVERSAMPLE_CROPS, 3));
        for r in 0..OVERSAMPLE_CROPS {
            per_crop[[r, 0]] = 1.0;
            per_crop[[OVERSAMPLE_CROPS + r, 2]] = 1.0;
        }
        per_crop[[OVERSAMPLE_CROPS - 1, 0]] = 0.0;
        per_crop[[OVERSAMPLE_CROPS - 1, 1]] = 1.0;

        let averaged = average_crops(per_crop, OVERSAMPLE_CROPS).unwrap();
        assert_eq!(averaged.dim(), (2, 3));
        assert!((averaged[[0, 0]] - 0.9).abs() < 1e-6);
        assert!((averaged[[0, 1]] - 0.1).abs() < 1e-6);
        assert!((averaged[[1, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn average_crops_rejects_partial_groups() {
        let per_crop = Array2::<f32>::zeros((3, 4));
        assert!(matches!(
            average_crops(per_crop.clone(), 2),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(average_crops(per_crop.clone(), 1).unwrap(), per_crop);
        assert!(matches!(average_crops(per_crop, 0), Err(Error::EmptyBatch)));
    }

    #[test]
    fn resize_keeps_constant_image_constant() {
        let img = Array3::from_elem((8, 10, 3), 0.5_f32);
        let out = resize_image(img.view(), (4, 5)).unwrap();
        assert_eq!(out.dim(), (4, 5, 3));
        assert!(out.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn resize_to_same_dims_is_identity() {
        let img = ramp(3, 4, 3);
        assert_eq!(resize_image(img.view(), (3, 4)).unwrap(), img);
    }

    #[test]
    fn mean_image_reduces_per_channel() {
        let mut raw = Array3::<f32>::zeros((3, 2, 2));
        raw.slice_mut(s![0, .., ..]).fill(1.0);
        raw.slice_mut(s![1, .., ..]).assign(&array![[0.0, 2.0], [2.0, 0.0]]);
        raw.slice_mut(s![2, .., ..]).fill(3.0);
        let mean = channel_mean(raw.into_dyn()).unwrap();
        assert_eq!(mean, array![1.0, 1.0, 3.0]);
    }

    #[test]
    fn mean_rejects_2d() {
        let raw = Array::<f32, _>::zeros((3, 3)).into_dyn();
        assert!(channel_mean(raw).is_err());
    }

    #[test]
    fn load_mean_reads_f64_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mean.npy");
        let raw = Array3::<f64>::from_elem((3, 4, 4), 0.25);
        ndarray_npy::write_npy(&path, &raw).unwrap();
        let mean = load_mean(&path).unwrap();
        assert_eq!(mean, array![0.25_f32, 0.25, 0.25]);
    }

    #[test]
    fn load_missing_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.png");
        assert!(matches!(load_image(&path, true), Err(Error::MissingFile(_))));
    }

    #[test]
    fn load_undecodable_image_fails_with_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(load_image(&path, true), Err(Error::Image(_))));
    }

    #[cfg(feature = "png")]
    #[test]
    fn load_image_scales_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 51]));
        img.put_pixel(1, 0, image::Rgb([0, 255, 0]));
        img.save(&path).unwrap();

        let arr = load_image(&path, true).unwrap();
        assert_eq!(arr.dim(), (1, 2, 3));
        assert!((arr[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((arr[[0, 0, 2]] - 0.2).abs() < 1e-6);
        assert!((arr[[0, 1, 1]] - 1.0).abs() < 1e-6);

        let grey = load_image(&path, false).unwrap();
        assert_eq!(grey.dim(), (1, 2, 1));
    }

    #[test]
    fn to_image_round_trips_rgb8_values() {
        let arr = array![[[1.0_f32, 0.0, 0.2]]];
        let img = to_image(arr.view()).unwrap().into_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 51]);
    }

    #[test]
    fn crop_region_is_clamped() {
        let img = ramp(10, 10, 3);
        let region = Rect::new(coord! { x: -5.0, y: 2.0 }, coord! { x: 4.0, y: 20.0 });
        let out = crop_region(img.view(), &region).unwrap();
        assert_eq!(out.dim(), (8, 4, 3));
        assert_eq!(out[[0, 0, 0]], img[[2, 0, 0]]);

        let outside = Rect::new(coord! { x: 20.0, y: 20.0 }, coord! { x: 30.0, y: 30.0 });
        assert!(crop_region(img.view(), &outside).is_err());
    }
}
