use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rcnn_classify::{
    config::DemoConfig,
    geo_types::{coord, Rect},
    io, plot, view, Classifier, Prediction,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Classify an image with a pretrained region-based CNN and plot its class probabilities.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON run configuration; flags below override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// ONNX model definition
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// External weights file next to the model definition
    #[arg(long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// Image to classify
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Per-channel mean (.npy)
    #[arg(long, value_name = "FILE")]
    mean: Option<PathBuf>,

    /// Directory the plots are written to
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Classify a single center crop instead of averaging ten crops
    #[arg(long)]
    no_oversample: bool,

    /// Classify only this region of the image: x1,y1,x2,y2
    #[arg(long, value_name = "BOX", value_parser = parse_region)]
    region: Option<Rect<f32>>,

    /// Number of most probable classes to log
    #[arg(long, default_value = "5", value_name = "K")]
    top_k: usize,

    /// Decode the output as class x azimuth bins
    #[arg(long)]
    view: bool,

    /// Also write the probability vectors as CSV
    #[cfg(feature = "save")]
    #[arg(long)]
    save_csv: bool,
}

fn parse_region(s: &str) -> Result<Rect<f32>, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [x1, y1, x2, y2] => Ok(Rect::new(coord! { x: *x1, y: *y1 }, coord! { x: *x2, y: *y2 })),
        _ => Err(format!("expected x1,y1,x2,y2, got {} values", values.len())),
    }
}

fn load_config(args: &Args) -> Result<DemoConfig> {
    let mut config = match &args.config {
        Some(path) => DemoConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DemoConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(weights) = &args.weights {
        config.weights = Some(weights.clone());
    }
    if let Some(image) = &args.image {
        config.image = image.clone();
    }
    if let Some(mean) = &args.mean {
        config.mean = Some(mean.clone());
    }
    if let Some(out_dir) = &args.out_dir {
        config.out_dir = out_dir.clone();
    }
    if args.no_oversample {
        config.oversample = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("model: {}", config.model.display());
    info!("image: {}", config.image.display());

    let files = config.model_files();
    let preprocess = config.preprocess().context("building preprocessing")?;
    let classifier = Classifier::new(&files, preprocess)
        .with_context(|| format!("loading model {}", config.model.display()))?;

    let image = io::load_image(&config.image, config.color)
        .with_context(|| format!("loading image {}", config.image.display()))?;
    let input = match &args.region {
        Some(region) => io::crop_region(image.view(), region)?,
        None => image,
    };

    let now = std::time::Instant::now();
    let probs = classifier.predict(std::slice::from_ref(&input))?;
    info!("inference took {:.2?}", now.elapsed());
    let prediction = Prediction::from_output(probs)?;

    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("creating {}", config.out_dir.display()))?;
    let image_path = plot::save_input_image(&input, config.out_dir.join("input.png"))?;
    let row = prediction
        .row(0)
        .context("classifier returned no prediction")?;
    let caption = format!(
        "{} ({})",
        config.image.display(),
        config.model.file_name().unwrap_or_default().to_string_lossy()
    );
    let plot_path = plot::plot_probabilities(row, config.out_dir.join("probabilities.svg"), &caption)?;
    info!("plots: {}, {}", image_path.display(), plot_path.display());

    println!("{}", prediction.summary());

    for (class, prob) in prediction.top_k(0, args.top_k) {
        info!("class {class}: {prob:.4}");
    }

    if args.view {
        let decoded = view::decode(row)
            .context("--view needs a class x azimuth probability vector")?;
        println!(
            "viewpoint: class {} azimuth {}",
            decoded.class, decoded.azimuth
        );
    }

    #[cfg(feature = "save")]
    if args.save_csv {
        let csv_path = config.out_dir.join("probabilities.csv");
        rcnn_classify::save::savetxt(prediction.probabilities(), &csv_path)?;
        info!("probabilities: {}", csv_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses() {
        let r = parse_region("1, 2,30,40.5").unwrap();
        assert_eq!(r.min(), coord! { x: 1.0, y: 2.0 });
        assert_eq!(r.max(), coord! { x: 30.0, y: 40.5 });
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("a,b,c,d").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "rcnn-classify",
            "--model",
            "net.onnx",
            "--no-oversample",
            "--out-dir",
            "out",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.model, PathBuf::from("net.onnx"));
        assert!(!config.oversample);
        assert_eq!(config.out_dir, PathBuf::from("out"));
        assert_eq!(config.image, DemoConfig::default().image);
    }
}
