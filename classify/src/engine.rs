//! Predictor lifecycle.
//!
//! ```text
//! Unloaded --load--> Loaded --bind--> Ready --predict--> Ready
//!                                       |  <--bind--
//! Loaded | Ready --close--> Closed
//! ```
//!
//! `close` is idempotent, and dropping an engine closes it. A failed
//! prediction leaves the engine `Ready`. Lifecycle transitions need `&mut`;
//! `predict` only borrows, so sharing an engine across threads is up to the
//! caller (a `Mutex`, typically).

use std::fmt;
use std::path::Path;

use image::RgbImage;

use crate::codec;
use crate::config::EngineConfig;
use crate::errors::*;
use crate::model::{Model, TractModel};
use crate::translator::{Classifications, ImageTranslator, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loaded,
    Ready,
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

enum Slot<M, T> {
    Unloaded,
    Loaded(M),
    Ready { model: M, translator: T },
    Closed,
}

impl<M, T> Slot<M, T> {
    fn state(&self) -> EngineState {
        match self {
            Slot::Unloaded => EngineState::Unloaded,
            Slot::Loaded(_) => EngineState::Loaded,
            Slot::Ready { .. } => EngineState::Ready,
            Slot::Closed => EngineState::Closed,
        }
    }
}

/// Owns a model and the translator bound to it.
pub struct Engine<M: Model = TractModel, T: Translator = ImageTranslator> {
    config: EngineConfig,
    slot: Slot<M, T>,
}

impl<M: Model, T: Translator> Engine<M, T> {
    /// An unloaded engine. Fails if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Engine<M, T>> {
        config.validate()?;
        Ok(Engine { config, slot: Slot::Unloaded })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.slot.state()
    }

    pub fn translator(&self) -> Option<&T> {
        match &self.slot {
            Slot::Ready { translator, .. } => Some(translator),
            _ => None,
        }
    }

    /// Loads the configured model. On failure the engine stays `Unloaded`.
    pub fn load(&mut self) -> Result<()> {
        if !matches!(self.slot, Slot::Unloaded) {
            bail!(ClassifyError::InvalidState(format!("can not load a {} engine", self.state())))
        }
        let model = M::load(&self.config).with_context(|| {
            ClassifyError::ModelLoad(format!("loading model {:?}", self.config.model_path))
        })?;
        self.slot = Slot::Loaded(model);
        Ok(())
    }

    /// Binds `translator` to the loaded model, replacing any previous one.
    /// The translator must encode to the configured input shape; otherwise
    /// the bind fails and the engine keeps its state and translator.
    pub fn bind(&mut self, translator: T) -> Result<()> {
        if matches!(self.slot, Slot::Loaded(_) | Slot::Ready { .. }) {
            let shape = translator.input_shape();
            let expected = self.config.input_shape();
            if shape != expected {
                bail!(ClassifyError::ShapeMismatch { expected, got: shape })
            }
        }
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Loaded(model) | Slot::Ready { model, .. } => {
                info!("translator bound, input shape {:?}", translator.input_shape());
                self.slot = Slot::Ready { model, translator };
                Ok(())
            }
            other => {
                let state = other.state();
                self.slot = other;
                bail!(ClassifyError::InvalidState(format!(
                    "can not bind a translator to a {state} engine"
                )))
            }
        }
    }

    /// Resizes, encodes, runs and decodes `image`. Every failure past the
    /// state check is an `Inference` error over its cause.
    pub fn predict(&self, image: &RgbImage) -> Result<Classifications> {
        let Slot::Ready { model, translator } = &self.slot else {
            bail!(self.not_ready())
        };
        let resized = codec::resize(image, self.config.target_width, self.config.target_height)
            .context(ClassifyError::Inference("resize"))?;
        let input = translator.encode(&resized).context(ClassifyError::Inference("encode"))?;
        debug!("encoded input {:?}", input.shape());
        let output = model.forward(input).context(ClassifyError::Inference("forward"))?;
        debug!("model output {:?}", output.shape());
        let classifications =
            translator.decode(&output).context(ClassifyError::Inference("decode"))?;
        debug!("decoded {} classifications", classifications.len());
        Ok(classifications)
    }

    /// Decodes the image file at `path` and predicts on it. Decoding errors
    /// are reported as `Resource` errors, not `Inference`.
    pub fn predict_path(&self, path: impl AsRef<Path>) -> Result<Classifications> {
        if !matches!(self.slot, Slot::Ready { .. }) {
            bail!(self.not_ready())
        }
        let image = codec::decode(path)?;
        self.predict(&image)
    }

    fn not_ready(&self) -> ClassifyError {
        ClassifyError::InvalidState(format!("can not predict on a {} engine", self.state()))
    }

    /// Releases the model and translator. Calling it again is a no-op.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Closed => (),
            Slot::Unloaded => debug!("closing an unloaded engine"),
            Slot::Loaded(model) | Slot::Ready { model, .. } => {
                drop(model);
                info!("engine closed, model {:?} released", self.config.model_path);
            }
        }
    }
}

impl<M: Model> Engine<M, ImageTranslator> {
    /// Loads the model and binds the translator described by `config`.
    pub fn open(config: EngineConfig) -> Result<Engine<M, ImageTranslator>> {
        let translator = config.translator()?;
        let mut engine = Engine::new(config)?;
        engine.load()?;
        engine.bind(translator)?;
        Ok(engine)
    }

    /// Opens an engine, runs `f` against it, and closes it whatever `f`
    /// returns.
    pub fn with_session<R>(
        config: EngineConfig,
        f: impl FnOnce(&Engine<M, ImageTranslator>) -> Result<R>,
    ) -> Result<R> {
        let mut engine = Self::open(config)?;
        let result = f(&engine);
        engine.close();
        result
    }
}

impl<M: Model, T: Translator> Drop for Engine<M, T> {
    fn drop(&mut self) {
        self.close()
    }
}

impl<M: Model, T: Translator> fmt::Debug for Engine<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("model_path", &self.config.model_path)
            .field("state", &self.state())
            .finish()
    }
}
