//! Rendering of the classified image and its probability vector.

use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView1};
use plotters::prelude::*;

use crate::error::{Error, Result};
use crate::{io, utils};

const PLOT_SIZE: (u32, u32) = (960, 480);

fn plot_err(e: impl std::fmt::Display) -> Error {
    Error::Plot(e.to_string())
}

/// Write the input image to `path`. The format follows the file extension.
pub fn save_input_image(image: &Array3<f32>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    io::to_image(image.view())?.save(path)?;
    tracing::debug!("wrote input image to {}", path.display());
    Ok(path.to_path_buf())
}

/// Draw `probs` as a line over class indices into an SVG file, marking the argmax.
pub fn plot_probabilities(
    probs: ArrayView1<f32>,
    path: impl AsRef<Path>,
    caption: &str,
) -> Result<PathBuf> {
    let path = path.as_ref();
    if probs.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let y_max = probs
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f32, f32::max)
        .max(f32::EPSILON)
        * 1.05;
    let x_max = probs.len().max(2) - 1;

    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    {
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(caption, ("sans-serif", 20))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(0..x_max, 0.0_f32..y_max)
            .map_err(plot_err)?;

        chart
            .configure_mesh()
            .x_desc("class")
            .y_desc("probability")
            .draw()
            .map_err(plot_err)?;

        chart
            .draw_series(LineSeries::new(
                probs.iter().enumerate().map(|(i, &p)| (i, p)),
                &BLUE,
            ))
            .map_err(plot_err)?;

        if let Some(best) = utils::argmax(&probs) {
            chart
                .draw_series(std::iter::once(Circle::new(
                    (best, probs[best]),
                    4,
                    RED.filled(),
                )))
                .map_err(plot_err)?;
        }
    }

    root.present().map_err(plot_err)?;
    tracing::debug!("wrote probability plot to {}", path.display());
    Ok(path.to_path_buf())
}
