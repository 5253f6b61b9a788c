//! # tract-classify
//!
//! Single image classification on top of tract.
//!
//! An image file is decoded to RGB, resized to the model resolution, encoded
//! into a tensor by a `Translator`, run through the model, and the output
//! tensor decoded back into classifications ordered by decreasing
//! probability.
//!
//! ```no_run
//! use tract_classify::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = EngineConfig::new("mobilenetv2-7.onnx")
//!     .with_target_size(224, 224)
//!     .with_scale(PixelScale::ImageNet);
//! let engine = Engine::<TractModel>::open(config)?;
//! for classification in engine.predict_path("grace_hopper.jpg")?.top(5) {
//!     println!("{classification}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Scores are exposed according to the `ScorePolicy`: as produced by the
//! model by default, or through a softmax when asked for. Without a label table, labels are `class_<i>`, `i`
//! being the position in the model output.

#[macro_use]
extern crate log;

pub mod codec;
pub mod config;
pub mod engine;
pub mod errors;
pub mod labels;
pub mod model;
pub mod translator;

pub use tract_onnx::prelude::Tensor;

pub mod prelude {
    pub use crate::codec::{decode, resize};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, EngineState};
    pub use crate::errors::ClassifyError;
    pub use crate::labels::load_labels;
    pub use crate::model::{Model, ModelFormat, TractModel};
    pub use crate::translator::{
        Classification, Classifications, ImageTranslator, PixelScale, ScorePolicy, TensorLayout,
        Translator,
    };
    pub use crate::Tensor;
}
