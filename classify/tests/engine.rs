use std::cell::Cell;
use std::path::Path;

use approx::assert_abs_diff_eq;
use image::{Rgb, RgbImage};
use tract_classify::errors::{Context, Result, bail};
use tract_classify::prelude::*;

thread_local! {
    static FORWARD_CALLS: Cell<usize> = const { Cell::new(0) };
    static RELEASED: Cell<usize> = const { Cell::new(0) };
}

/// Model whose behavior is read from the "artifact" file:
/// - `fail`: every forward pass errors,
/// - `means`: outputs the mean of each of the 3 input channels,
/// - anything else: whitespace separated scores, returned as is.
#[derive(Debug)]
enum StubModel {
    Fail,
    Means,
    Fixed(Vec<f32>),
}

impl Model for StubModel {
    fn load(config: &EngineConfig) -> Result<StubModel> {
        let content = std::fs::read_to_string(&config.model_path)
            .with_context(|| format!("reading {:?}", config.model_path))?;
        Ok(match content.trim() {
            "fail" => StubModel::Fail,
            "means" => StubModel::Means,
            scores => StubModel::Fixed(
                scores.split_whitespace().map(|s| s.parse::<f32>()).collect::<Result<_, _>>()?,
            ),
        })
    }

    fn forward(&self, input: Tensor) -> Result<Tensor> {
        FORWARD_CALLS.with(|c| c.set(c.get() + 1));
        if input.shape() != [1, 3, 64, 64] {
            bail!("unexpected input shape {:?}", input.shape())
        }
        let scores = match self {
            StubModel::Fail => bail!("device on fire"),
            StubModel::Means => {
                let pixels = input.as_slice::<f32>()?;
                pixels.chunks(64 * 64).map(|c| c.iter().sum::<f32>() / c.len() as f32).collect()
            }
            StubModel::Fixed(scores) => scores.clone(),
        };
        Ok(Tensor::from_shape(&[1, scores.len()], &scores)?)
    }
}

impl Drop for StubModel {
    fn drop(&mut self) {
        RELEASED.with(|c| c.set(c.get() + 1));
    }
}

fn forward_calls() -> usize {
    FORWARD_CALLS.with(|c| c.get())
}

fn released() -> usize {
    RELEASED.with(|c| c.get())
}

fn stub_artifact(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("stub.model");
    std::fs::write(&path, content).unwrap();
    path
}

fn gradient(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8]))
}

#[test]
fn landscape_jpeg_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("summer-landscape.jpg");
    gradient(1330, 860).save(&image_path).unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "0.7 0.3"));
    let engine = Engine::<StubModel>::open(config).unwrap();
    let result = engine.predict_path(&image_path).unwrap();
    assert_eq!(
        result.items(),
        &[
            Classification { label: "class_0".into(), probability: 0.7 },
            Classification { label: "class_1".into(), probability: 0.3 },
        ]
    );
    let lines: Vec<String> = result.iter().map(|c| c.to_string()).collect();
    assert_eq!(lines, ["class_0: 0.7", "class_1: 0.3"]);
}

#[test]
fn lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "0.1 0.9"));
    let translator = config.translator().unwrap();
    let image = gradient(100, 50);

    let mut engine = Engine::<StubModel>::new(config).unwrap();
    assert_eq!(engine.state(), EngineState::Unloaded);
    let err = engine.predict(&image).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_invalid_state());
    let err = engine.bind(translator.clone()).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_invalid_state());
    assert_eq!(engine.state(), EngineState::Unloaded);

    engine.load().unwrap();
    assert_eq!(engine.state(), EngineState::Loaded);
    assert!(ClassifyError::of(&engine.load().unwrap_err()).unwrap().is_invalid_state());
    assert!(ClassifyError::of(&engine.predict(&image).unwrap_err()).unwrap().is_invalid_state());

    engine.bind(translator.clone()).unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.predict(&image).unwrap().best().unwrap().label, "class_1");
    assert_eq!(engine.predict(&image).unwrap().best().unwrap().label, "class_1");

    engine.bind(translator.with_labels(vec!["cat".to_string(), "dog".to_string()])).unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.predict(&image).unwrap().best().unwrap().label, "dog");
}

#[test]
fn close_is_idempotent_and_final() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "0.5 0.5"));
    let released_before = released();
    let mut engine = Engine::<StubModel>::open(config).unwrap();
    engine.predict(&gradient(64, 64)).unwrap();

    engine.close();
    assert_eq!(engine.state(), EngineState::Closed);
    assert_eq!(released(), released_before + 1);
    engine.close();
    assert_eq!(released(), released_before + 1);

    let calls = forward_calls();
    let err = engine.predict(&gradient(64, 64)).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_invalid_state());
    let err = engine.predict_path("/no/such/image.png").unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_invalid_state());
    assert_eq!(forward_calls(), calls);
    assert!(ClassifyError::of(&engine.load().unwrap_err()).unwrap().is_invalid_state());

    drop(engine);
    assert_eq!(released(), released_before + 1);
}

#[test]
fn drop_releases_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "1.0"));
    let released_before = released();
    {
        let engine = Engine::<StubModel>::open(config).unwrap();
        engine.predict(&gradient(10, 10)).unwrap();
    }
    assert_eq!(released(), released_before + 1);
}

#[test]
fn predictions_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "means"));
    let engine = Engine::<StubModel>::open(config).unwrap();
    let image = gradient(333, 217);
    let a = engine.predict(&image).unwrap();
    let b = engine.predict(&image).unwrap();
    assert_eq!(a.len(), 3);
    assert_eq!(a, b);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.probability.to_bits(), y.probability.to_bits());
    }
}

#[test]
fn failed_forward_keeps_engine_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "fail"));
    let engine = Engine::<StubModel>::open(config).unwrap();
    let err = engine.predict(&gradient(64, 64)).unwrap_err();
    assert_eq!(ClassifyError::of(&err), Some(&ClassifyError::Inference("forward")));
    assert_eq!(err.root_cause().to_string(), "device on fire");
    assert_eq!(engine.state(), EngineState::Ready);
}

#[test]
fn mismatched_translator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "0.2 0.8"));
    let good = config.translator().unwrap();
    let mut engine = Engine::<StubModel>::new(config).unwrap();
    engine.load().unwrap();

    let err = engine.bind(ImageTranslator::new(32, 32).unwrap()).unwrap_err();
    assert_eq!(
        ClassifyError::of(&err),
        Some(&ClassifyError::ShapeMismatch { expected: vec![1, 3, 64, 64], got: vec![1, 3, 32, 32] })
    );
    assert_eq!(engine.state(), EngineState::Loaded);

    engine.bind(good.clone()).unwrap();
    let nhwc = good.clone().with_layout(TensorLayout::Nhwc);
    let err = engine.bind(nhwc).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_shape_mismatch());
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.translator().unwrap().resolution(), (64, 64));

    let calls = forward_calls();
    assert_eq!(engine.predict(&gradient(64, 64)).unwrap().best().unwrap().label, "class_1");
    assert_eq!(forward_calls(), calls + 1);
}

#[test]
fn label_table_must_match_output() {
    let dir = tempfile::tempdir().unwrap();
    let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let config = EngineConfig::new(stub_artifact(dir.path(), "0.2 0.8")).with_labels(labels);
    let engine = Engine::<StubModel>::open(config).unwrap();
    let err = engine.predict(&gradient(64, 64)).unwrap_err();
    assert_eq!(ClassifyError::of(&err), Some(&ClassifyError::Inference("decode")));
    assert!(err.root_cause().downcast_ref::<ClassifyError>().unwrap().is_shape_mismatch());
}

#[test]
fn missing_image_is_resource_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "1.0"));
    let engine = Engine::<StubModel>::open(config).unwrap();
    let err = engine.predict_path(dir.path().join("missing.jpg")).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_resource());
}

#[test]
fn load_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine =
        Engine::<StubModel>::new(EngineConfig::new(dir.path().join("absent.model"))).unwrap();
    let err = engine.load().unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_model_load());
    assert_eq!(engine.state(), EngineState::Unloaded);

    let corrupt = stub_artifact(dir.path(), "0.5 zero-point-five");
    let err = Engine::<StubModel>::open(EngineConfig::new(corrupt)).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_model_load());
}

#[test]
fn invalid_config_rejected() {
    let err = Engine::<StubModel>::new(EngineConfig::new("x").with_target_size(64, 0)).unwrap_err();
    assert!(ClassifyError::of(&err).unwrap().is_invalid_argument());
}

#[test]
fn session_runs_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(stub_artifact(dir.path(), "0.25 0.75"));
    let released_before = released();
    let best = Engine::<StubModel>::with_session(config.clone(), |engine| {
        Ok(engine.predict(&gradient(80, 80))?.best().cloned())
    })
    .unwrap();
    assert_eq!(best.unwrap().label, "class_1");
    assert_eq!(released(), released_before + 1);

    let err = Engine::<StubModel>::with_session(config, |_| -> Result<()> { bail!("boom") })
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert_eq!(released(), released_before + 2);
}

#[test]
fn tract_nnef_channel_mean() {
    let config = EngineConfig::new("tests/channel_mean").with_score_policy(ScorePolicy::Raw);
    let engine = Engine::<TractModel>::open(config).unwrap();
    let image = RgbImage::from_pixel(120, 90, Rgb([200, 100, 50]));
    let result = engine.predict(&image).unwrap();
    let labels: Vec<&str> = result.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, ["class_0", "class_1", "class_2"]);
    assert_abs_diff_eq!(result.items()[0].probability, 200.0 / 255.0, epsilon = 1e-4);
    assert_abs_diff_eq!(result.items()[1].probability, 100.0 / 255.0, epsilon = 1e-4);
    assert_abs_diff_eq!(result.items()[2].probability, 50.0 / 255.0, epsilon = 1e-4);
}

#[test]
fn tract_onnx_channel_mean() {
    let config = EngineConfig::new("tests/channel_mean.onnx");
    let engine = Engine::<TractModel>::open(config).unwrap();
    let image = RgbImage::from_pixel(120, 90, Rgb([200, 100, 50]));
    let result = engine.predict(&image).unwrap();
    let labels: Vec<&str> = result.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, ["class_0", "class_1", "class_2"]);
    assert_abs_diff_eq!(result.items()[0].probability, 200.0 / 255.0, epsilon = 1e-4);
    assert_abs_diff_eq!(result.items()[1].probability, 100.0 / 255.0, epsilon = 1e-4);
    assert_abs_diff_eq!(result.items()[2].probability, 50.0 / 255.0, epsilon = 1e-4);
}

#[test]
fn tract_onnx_input_follows_target_size() {
    // the graph declares 1x3x64x64, the engine feeds 1x3x32x48
    let config = EngineConfig::new("tests/channel_mean.onnx").with_target_size(48, 32);
    let engine = Engine::<TractModel>::open(config).unwrap();
    let image = RgbImage::from_fn(96, 64, |x, _| if x < 48 { Rgb([0, 0, 0]) } else { Rgb([255, 0, 0]) });
    let result = engine.predict(&image).unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result.best().unwrap().label, "class_0");
    assert_abs_diff_eq!(result.best().unwrap().probability, 0.5, epsilon = 0.02);
}
