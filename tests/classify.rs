use std::path::PathBuf;

use rcnn_classify::{io, Classifier, Error, ModelFiles, Prediction, PreprocessConfig};

fn model_and_image() -> Option<(PathBuf, PathBuf)> {
    let model = std::env::var_os("RCNN_CLASSIFY_MODEL")?;
    let image = std::env::var_os("RCNN_CLASSIFY_IMAGE")?;
    Some((model.into(), image.into()))
}

#[test]
fn missing_model_aborts_before_inference() {
    let dir = tempfile::tempdir().unwrap();
    let files = ModelFiles::new(dir.path().join("missing.onnx"));
    match Classifier::new(&files, PreprocessConfig::default()) {
        Err(Error::MissingFile(path)) => assert!(path.ends_with("missing.onnx")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("classifier built from a missing file"),
    }
}

#[test]
fn undecodable_image_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.jpg");
    std::fs::write(&path, [0_u8, 1, 2, 3, 4, 5]).unwrap();
    assert!(matches!(io::load_image(&path, true), Err(Error::Image(_))));
}

#[test]
#[ignore = "needs RCNN_CLASSIFY_MODEL and RCNN_CLASSIFY_IMAGE"]
fn prediction_is_deterministic_distribution() {
    let (model, image) = model_and_image().expect("RCNN_CLASSIFY_MODEL/RCNN_CLASSIFY_IMAGE");
    let config = PreprocessConfig::default()
        .with_channel_swap(&[2, 1, 0])
        .with_raw_scale(255.0);
    let classifier = Classifier::new(&ModelFiles::new(model), config).unwrap();
    let img = io::load_image(image, true).unwrap();

    let first = classifier.predict(std::slice::from_ref(&img)).unwrap();
    let second = classifier.predict(std::slice::from_ref(&img)).unwrap();
    assert_eq!(first, second);

    let prediction = Prediction::from_output(first).unwrap();
    let (rows, classes) = prediction.shape();
    assert_eq!(rows, 1);
    if let Some(declared) = classifier.class_count() {
        assert_eq!(classes, declared);
    }
    let row = prediction.row(0).unwrap();
    assert!((row.sum() - 1.0).abs() < 1e-3);

    let class = prediction.argmax(0).unwrap();
    assert!(row.iter().all(|&p| p <= row[class]));
}

#[test]
#[ignore = "needs RCNN_CLASSIFY_MODEL and RCNN_CLASSIFY_IMAGE"]
fn batch_returns_one_row_per_image() {
    let (model, image) = model_and_image().expect("RCNN_CLASSIFY_MODEL/RCNN_CLASSIFY_IMAGE");
    let classifier = Classifier::new(
        &ModelFiles::new(model),
        PreprocessConfig::default().with_oversample(false),
    )
    .unwrap();
    let img = io::load_image(image, true).unwrap();
    let probs = classifier.predict(&[img.clone(), img]).unwrap();
    assert_eq!(probs.nrows(), 2);
    assert_eq!(probs.row(0), probs.row(1));
    assert!(matches!(classifier.predict(&[]), Err(Error::EmptyBatch)));
}
