//! Translation between domain data and tensors.
//!
//! A `Translator` turns a resized RGB image into the tensor a model expects,
//! and the tensor the model produces into a ranked list of labeled
//! probabilities. `ImageTranslator` is the implementation for image
//! classifiers with a single flat score output.

use std::fmt;
use std::sync::Arc;

use image::RgbImage;
use tract_onnx::prelude::Tensor;
use tract_onnx::prelude::tract_ndarray::{self, IxDyn};

use crate::errors::*;

/// Per-channel mean of the ImageNet training set, on [0,1] pixel values.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation of the ImageNet training set.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Tolerance on the score sum for `ScorePolicy::Auto` to accept scores as a
/// distribution.
pub const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

pub trait Translator {
    /// Shape of the tensor produced by `encode`.
    fn input_shape(&self) -> Vec<usize>;

    fn encode(&self, image: &RgbImage) -> Result<Tensor>;

    fn decode(&self, output: &Tensor) -> Result<Classifications>;
}

/// Axis order of the encoded image. `N` is a batch axis of size 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
    Chw,
    Hwc,
}

impl TensorLayout {
    pub fn shape(&self, width: usize, height: usize) -> Vec<usize> {
        match self {
            TensorLayout::Nchw => vec![1, 3, height, width],
            TensorLayout::Nhwc => vec![1, height, width, 3],
            TensorLayout::Chw => vec![3, height, width],
            TensorLayout::Hwc => vec![height, width, 3],
        }
    }

    /// (y, x, channel) addressed by a tensor index in this layout.
    fn pixel_coords(&self, ix: &IxDyn) -> (usize, usize, usize) {
        match self {
            TensorLayout::Nchw => (ix[2], ix[3], ix[1]),
            TensorLayout::Nhwc => (ix[1], ix[2], ix[3]),
            TensorLayout::Chw => (ix[1], ix[2], ix[0]),
            TensorLayout::Hwc => (ix[0], ix[1], ix[2]),
        }
    }
}

/// Numeric range pixel values are mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelScale {
    /// [0, 1]
    #[default]
    Unit,
    /// [-1, 1]
    Symmetric,
    /// [0, 1] then standardized with `IMAGENET_MEAN` and `IMAGENET_STD`.
    ImageNet,
}

impl PixelScale {
    pub fn apply(&self, value: u8, channel: usize) -> f32 {
        match self {
            PixelScale::Unit => value as f32 / 255.0,
            PixelScale::Symmetric => value as f32 / 127.5 - 1.0,
            PixelScale::ImageNet => {
                (value as f32 / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            }
        }
    }
}

/// How raw model outputs become probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorePolicy {
    /// Keep the scores if they already form a distribution, softmax otherwise.
    /// The choice is made per output, so two close outputs can straddle
    /// `DISTRIBUTION_TOLERANCE` and be treated differently.
    Auto,
    /// Never normalize. Values may fall outside [0, 1].
    #[default]
    Raw,
    Softmax,
}

impl ScorePolicy {
    pub fn normalize(&self, scores: Vec<f32>) -> Vec<f32> {
        match self {
            ScorePolicy::Raw => scores,
            ScorePolicy::Softmax => softmax(&scores),
            ScorePolicy::Auto if is_distribution(&scores) => scores,
            ScorePolicy::Auto => softmax(&scores),
        }
    }
}

fn is_distribution(scores: &[f32]) -> bool {
    scores.iter().all(|s| (0.0..=1.0).contains(s))
        && (scores.iter().sum::<f32>() - 1.0).abs() <= DISTRIBUTION_TOLERANCE
}

/// Numerically stable softmax. Non finite inputs get a zero probability.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().filter(|v| v.is_finite()).fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> =
        logits.iter().map(|&v| if v.is_finite() { (v - max).exp() } else { 0.0 }).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub probability: f32,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.probability)
    }
}

/// Classifications ordered by descending probability.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classifications(Vec<Classification>);

impl Classifications {
    /// Sorts `items` by descending probability. Ties keep their order.
    pub fn ranked(mut items: Vec<Classification>) -> Classifications {
        items.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        Classifications(items)
    }

    pub fn items(&self) -> &[Classification] {
        &self.0
    }

    pub fn best(&self) -> Option<&Classification> {
        self.0.first()
    }

    pub fn top(&self, k: usize) -> &[Classification] {
        &self.0[..k.min(self.0.len())]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Classification> {
        self.0.iter()
    }
}

impl IntoIterator for Classifications {
    type Item = Classification;
    type IntoIter = std::vec::IntoIter<Classification>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Classifications {
    type Item = &'a Classification;
    type IntoIter = std::slice::Iter<'a, Classification>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Translator for image classifiers: f32 pixels in, one score per class out.
#[derive(Debug, Clone)]
pub struct ImageTranslator {
    width: u32,
    height: u32,
    layout: TensorLayout,
    scale: PixelScale,
    policy: ScorePolicy,
    labels: Option<Arc<[String]>>,
}

impl ImageTranslator {
    pub fn new(width: u32, height: u32) -> Result<ImageTranslator> {
        if width == 0 || height == 0 {
            bail!(ClassifyError::InvalidArgument(format!(
                "translator resolution must be positive, got {width}x{height}"
            )))
        }
        Ok(ImageTranslator {
            width,
            height,
            layout: TensorLayout::default(),
            scale: PixelScale::default(),
            policy: ScorePolicy::default(),
            labels: None,
        })
    }

    pub fn with_layout(self, layout: TensorLayout) -> ImageTranslator {
        ImageTranslator { layout, ..self }
    }

    pub fn with_scale(self, scale: PixelScale) -> ImageTranslator {
        ImageTranslator { scale, ..self }
    }

    pub fn with_score_policy(self, policy: ScorePolicy) -> ImageTranslator {
        ImageTranslator { policy, ..self }
    }

    pub fn with_labels(self, labels: impl Into<Arc<[String]>>) -> ImageTranslator {
        ImageTranslator { labels: Some(labels.into()), ..self }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    fn label(&self, ix: usize) -> String {
        match &self.labels {
            Some(labels) => labels[ix].clone(),
            None => format!("class_{ix}"),
        }
    }
}

impl Translator for ImageTranslator {
    fn input_shape(&self) -> Vec<usize> {
        self.layout.shape(self.width as usize, self.height as usize)
    }

    fn encode(&self, image: &RgbImage) -> Result<Tensor> {
        if image.dimensions() != (self.width, self.height) {
            bail!(ClassifyError::ShapeMismatch {
                expected: vec![self.height as usize, self.width as usize, 3],
                got: vec![image.height() as usize, image.width() as usize, 3],
            })
        }
        let shape = self.input_shape();
        let array = tract_ndarray::ArrayD::from_shape_fn(&*shape, |ix| {
            let (y, x, c) = self.layout.pixel_coords(&ix);
            self.scale.apply(image.get_pixel(x as u32, y as u32)[c], c)
        });
        Ok(array.into())
    }

    fn decode(&self, output: &Tensor) -> Result<Classifications> {
        let output = output
            .cast_to::<f32>()
            .with_context(|| format!("casting {:?} output to f32", output.datum_type()))?;
        let scores = output.as_slice::<f32>()?.to_vec();
        if scores.is_empty() {
            bail!(ClassifyError::InvalidArgument("model produced an empty output".into()))
        }
        if let Some(labels) = &self.labels {
            if labels.len() != scores.len() {
                bail!(ClassifyError::ShapeMismatch {
                    expected: vec![labels.len()],
                    got: vec![scores.len()],
                })
            }
        }
        trace!("raw scores: {scores:?}");
        let probabilities = self.policy.normalize(scores);
        let items = probabilities
            .into_iter()
            .enumerate()
            .map(|(ix, probability)| Classification { label: self.label(ix), probability })
            .collect();
        Ok(Classifications::ranked(items))
    }
}
