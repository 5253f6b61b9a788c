#[macro_use]
extern crate log;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tract_classify::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "tract-classify", version, about = "Classify an image with an ONNX or NNEF model")]
struct CliArgs {
    /// Model artifact (.onnx file, NNEF directory or tarball)
    #[arg(long)]
    model: PathBuf,

    /// Image to classify
    #[arg(long)]
    image: PathBuf,

    /// Width the image is resized to before encoding
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    width: u32,

    /// Height the image is resized to before encoding
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    height: u32,

    /// Label table, one label per line in model output order
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Model format, guessed from the model path if absent
    #[arg(long, value_enum)]
    format: Option<Format>,

    #[arg(long, value_enum, default_value_t = Layout::Nchw)]
    layout: Layout,

    /// Pixel encoding scale
    #[arg(long, value_enum, default_value_t = Scale::Unit)]
    scale: Scale,

    /// How model outputs are turned into probabilities
    #[arg(long, value_enum, default_value_t = Policy::Raw)]
    policy: Policy,

    /// Only print the k most probable classes
    #[arg(long)]
    top: Option<usize>,

    /// Sets the level of verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Onnx,
    Nnef,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Layout {
    Nchw,
    Nhwc,
    Chw,
    Hwc,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scale {
    Unit,
    Symmetric,
    Imagenet,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Policy {
    Auto,
    Raw,
    Softmax,
}

impl CliArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::new(&self.model)
            .with_target_size(self.width, self.height)
            .with_layout(match self.layout {
                Layout::Nchw => TensorLayout::Nchw,
                Layout::Nhwc => TensorLayout::Nhwc,
                Layout::Chw => TensorLayout::Chw,
                Layout::Hwc => TensorLayout::Hwc,
            })
            .with_scale(match self.scale {
                Scale::Unit => PixelScale::Unit,
                Scale::Symmetric => PixelScale::Symmetric,
                Scale::Imagenet => PixelScale::ImageNet,
            })
            .with_score_policy(match self.policy {
                Policy::Auto => ScorePolicy::Auto,
                Policy::Raw => ScorePolicy::Raw,
                Policy::Softmax => ScorePolicy::Softmax,
            });
        if let Some(format) = self.format {
            config = config.with_model_format(match format {
                Format::Onnx => ModelFormat::Onnx,
                Format::Nnef => ModelFormat::Nnef,
            });
        }
        if let Some(labels) = &self.labels {
            config = config.with_labels(load_labels(labels)?);
        }
        Ok(config)
    }
}

fn handle(args: CliArgs) -> Result<()> {
    let config = args.engine_config()?;
    let classifications = Engine::<TractModel>::with_session(config, |engine| {
        engine.predict_path(&args.image)
    })?;
    let shown = match args.top {
        Some(k) => classifications.top(k),
        None => classifications.items(),
    };
    for classification in shown {
        println!("{classification}");
    }
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level);
    env_logger::Builder::from_env(env).format_timestamp_nanos().init();

    if let Err(e) = handle(args) {
        let _ = report(&e, &mut io::stderr());
        process::exit(1)
    }
}

/// Logs `e` with its causes, or writes it to `out` when error logging is off.
fn report(e: &anyhow::Error, out: &mut impl Write) -> io::Result<()> {
    if log_enabled!(log::Level::Error) {
        error!("{e:?}");
        Ok(())
    } else {
        writeln!(out, "{e:?}")
    }
}
