//! The model seam.
//!
//! The engine only needs a model to be loadable from its configuration and to
//! map one input tensor to one output tensor. `TractModel` is the tract
//! implementation, for ONNX and NNEF artifacts.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tract_nnef::prelude::Framework;
use tract_onnx::prelude::*;

use crate::config::EngineConfig;
use crate::errors::{ClassifyError, Context, Result};

pub trait Model: Sized {
    fn load(config: &EngineConfig) -> Result<Self>;

    fn forward(&self, input: Tensor) -> Result<Tensor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Onnx,
    Nnef,
}

impl ModelFormat {
    /// Guesses the format from the artifact path: `.onnx` files are ONNX,
    /// directories and tar archives are NNEF.
    pub fn detect(path: impl AsRef<Path>) -> Result<ModelFormat> {
        let path = path.as_ref();
        let name = path.to_string_lossy();
        if path.extension().is_some_and(|ext| ext == "onnx") {
            Ok(ModelFormat::Onnx)
        } else if path.is_dir()
            || name.ends_with(".tar")
            || name.ends_with(".tar.gz")
            || path.extension().is_some_and(|ext| ext == "tgz")
        {
            Ok(ModelFormat::Nnef)
        } else {
            Err(ClassifyError::ModelLoad(format!("unsupported model format: {path:?}")).into())
        }
    }
}

impl FromStr for ModelFormat {
    type Err = ClassifyError;

    fn from_str(s: &str) -> std::result::Result<ModelFormat, ClassifyError> {
        match s.to_lowercase().as_str() {
            "onnx" => Ok(ModelFormat::Onnx),
            "nnef" => Ok(ModelFormat::Nnef),
            _ => Err(ClassifyError::InvalidArgument(format!("unknown model format `{s}'"))),
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::Onnx => write!(f, "onnx"),
            ModelFormat::Nnef => write!(f, "nnef"),
        }
    }
}

/// An optimized tract plan, ready to run.
pub struct TractModel {
    plan: TypedRunnableModel<TypedModel>,
    format: ModelFormat,
}

impl TractModel {
    pub fn format(&self) -> ModelFormat {
        self.format
    }

    fn plan_for(
        path: &Path,
        format: ModelFormat,
        input_shape: &[usize],
    ) -> TractResult<TypedRunnableModel<TypedModel>> {
        match format {
            ModelFormat::Onnx => tract_onnx::onnx()
                .model_for_path(path)?
                .with_input_fact(0, f32::fact(input_shape.to_vec()).into())?
                .into_optimized()?
                .into_runnable(),
            ModelFormat::Nnef => tract_nnef::nnef()
                .with_tract_core()
                .model_for_path(path)?
                .into_optimized()?
                .into_runnable(),
        }
    }
}

impl fmt::Debug for TractModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TractModel({})", self.format)
    }
}

impl Model for TractModel {
    fn load(config: &EngineConfig) -> Result<TractModel> {
        let path = config.model_path.as_path();
        if !path.exists() {
            return Err(ClassifyError::ModelLoad(format!("model not found: {path:?}")).into());
        }
        let format = match config.model_format {
            Some(format) => format,
            None => ModelFormat::detect(path)?,
        };
        let input_shape = config.input_shape();
        let plan = Self::plan_for(path, format, &input_shape).with_context(|| {
            ClassifyError::ModelLoad(format!("loading {format} model from {path:?}"))
        })?;
        info!("loaded {} model {:?} (input {:?})", format, path, input_shape);
        debug!("model outputs: {:?}", plan.model().output_outlets());
        Ok(TractModel { plan, format })
    }

    fn forward(&self, input: Tensor) -> Result<Tensor> {
        let mut outputs = self.plan.run(tvec!(input.into_tvalue()))?;
        if outputs.is_empty() {
            anyhow::bail!("model produced no output")
        }
        Ok(outputs.remove(0).into_tensor())
    }
}
