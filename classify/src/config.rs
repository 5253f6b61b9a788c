use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::*;
use crate::model::ModelFormat;
use crate::translator::{ImageTranslator, PixelScale, ScorePolicy, TensorLayout};

pub const DEFAULT_TARGET_WIDTH: u32 = 64;
pub const DEFAULT_TARGET_HEIGHT: u32 = 64;

/// Everything an engine needs to load its model and translate its inputs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    /// Detected from `model_path` when `None`.
    pub model_format: Option<ModelFormat>,
    pub target_width: u32,
    pub target_height: u32,
    pub layout: TensorLayout,
    pub scale: PixelScale,
    pub score_policy: ScorePolicy,
    pub labels: Option<Arc<[String]>>,
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> EngineConfig {
        EngineConfig {
            model_path: model_path.into(),
            model_format: None,
            target_width: DEFAULT_TARGET_WIDTH,
            target_height: DEFAULT_TARGET_HEIGHT,
            layout: TensorLayout::default(),
            scale: PixelScale::default(),
            score_policy: ScorePolicy::default(),
            labels: None,
        }
    }

    pub fn with_target_size(self, width: u32, height: u32) -> EngineConfig {
        EngineConfig { target_width: width, target_height: height, ..self }
    }

    pub fn with_model_format(self, format: ModelFormat) -> EngineConfig {
        EngineConfig { model_format: Some(format), ..self }
    }

    pub fn with_layout(self, layout: TensorLayout) -> EngineConfig {
        EngineConfig { layout, ..self }
    }

    pub fn with_scale(self, scale: PixelScale) -> EngineConfig {
        EngineConfig { scale, ..self }
    }

    pub fn with_score_policy(self, score_policy: ScorePolicy) -> EngineConfig {
        EngineConfig { score_policy, ..self }
    }

    pub fn with_labels(self, labels: impl Into<Arc<[String]>>) -> EngineConfig {
        EngineConfig { labels: Some(labels.into()), ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_width == 0 || self.target_height == 0 {
            bail!(ClassifyError::InvalidArgument(format!(
                "target size must be positive, got {}x{}",
                self.target_width, self.target_height
            )))
        }
        if self.model_path.as_os_str().is_empty() {
            bail!(ClassifyError::InvalidArgument("model path is required".into()))
        }
        Ok(())
    }

    /// Shape of the tensor the model is fed with.
    pub fn input_shape(&self) -> Vec<usize> {
        self.layout.shape(self.target_width as usize, self.target_height as usize)
    }

    /// The translator matching this configuration.
    pub fn translator(&self) -> Result<ImageTranslator> {
        let translator = ImageTranslator::new(self.target_width, self.target_height)?
            .with_layout(self.layout)
            .with_scale(self.scale)
            .with_score_policy(self.score_policy);
        Ok(match &self.labels {
            Some(labels) => translator.with_labels(labels.clone()),
            None => translator,
        })
    }
}
