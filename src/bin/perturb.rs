use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use perturb_rs::codec::DisplayFormat;
use perturb_rs::model::SequentialClassifier;
use perturb_rs::projection::linf_distance;
use perturb_rs::{
    encode_image, run_attack, AttackConfig, AttackKind, ClassScore, DisplayOptions,
    InMemoryModelProvider, ModelFamily, ModelHandle, ModelProvider,
};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

type DynError = Box<dyn Error>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImageFormat {
    Png,
    Jpeg,
}

/// Craft an adversarial example against an image classifier and print the
/// outcome as JSON.
#[derive(Parser, Debug)]
#[command(author, version)]
struct Cli {
    /// Network as JSON (a serialized `SequentialClassifier`)
    #[arg(long)]
    model: PathBuf,

    /// Input contract of the network: mnist, cifar10 or mobilenet_v2
    #[arg(long, default_value = "mnist")]
    family: String,

    /// PNG or JPEG image to perturb
    #[arg(long)]
    image: PathBuf,

    /// fgsm, bim or pgd
    #[arg(long, default_value = "pgd")]
    attack: String,

    /// JSON attack config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epsilon: Option<f64>,

    #[arg(long)]
    step_size: Option<f64>,

    #[arg(long)]
    iterations: Option<usize>,

    /// Stop iterating after this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Number of classes reported per prediction
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    #[arg(long, value_enum, default_value_t = ImageFormat::Png)]
    format: ImageFormat,

    /// Emit images at model resolution instead of 256x256
    #[arg(long)]
    no_upscale: bool,

    /// -v for debug, -vv for per-step trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct Report {
    model: String,
    attack: String,
    epsilon: f64,
    original: Vec<ClassScore>,
    adversarial: Vec<ClassScore>,
    success: bool,
    partial: bool,
    steps_completed: usize,
    linf: f64,
    original_image: String,
    adversarial_image: String,
}

fn init_logging(verbose: u8) -> Result<(), DynError> {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S%.3f)} {l} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn attack_config(cli: &Cli) -> Result<AttackConfig, DynError> {
    let mut config = match &cli.config {
        Some(path) => AttackConfig::from_json(&fs::read_to_string(path)?)?,
        None => AttackConfig::for_kind(cli.attack.parse::<AttackKind>()?),
    };
    if let Some(epsilon) = cli.epsilon {
        config.epsilon = epsilon;
    }
    if let Some(step_size) = cli.step_size {
        config.step_size = step_size;
    }
    if let Some(iterations) = cli.iterations {
        config.iterations = iterations;
    }
    if let Some(ms) = cli.deadline_ms {
        config.deadline = Some(Duration::from_millis(ms));
    }
    Ok(config)
}

fn main() -> Result<(), DynError> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let family = ModelFamily::preset(&cli.family)?;
    let classifier: SequentialClassifier = serde_json::from_str(&fs::read_to_string(&cli.model)?)?;
    let id = family.name.clone();
    let provider = InMemoryModelProvider::new();
    provider.register(id.clone(), ModelHandle::new(Arc::new(classifier), family)?);
    let handle = provider.load(&id)?;
    info!("loaded {} from {}", handle.model.input_shape(), cli.model.display());

    let mut config = attack_config(&cli)?.with_range(handle.family.valid_range()?);
    if let Some(channels) = handle.family.channel_ranges()? {
        config = config.with_channels(channels);
    }
    let tensor = handle.family.decode(&fs::read(&cli.image)?)?;
    let result = run_attack(&tensor.view(), handle.model.as_ref(), &config)?;

    let options = DisplayOptions {
        upscale: if cli.no_upscale {
            None
        } else {
            DisplayOptions::default().upscale
        },
        format: match cli.format {
            ImageFormat::Png => DisplayFormat::Png,
            ImageFormat::Jpeg => DisplayFormat::Jpeg { quality: 90 },
        },
    };
    let scheme = &handle.family.scheme;
    let names = &handle.family.class_names;
    let report = Report {
        model: handle.family.name.clone(),
        attack: config.kind.to_string(),
        epsilon: config.epsilon,
        original: result.original_prediction.top_k(cli.top_k, names),
        adversarial: result.adversarial_prediction.top_k(cli.top_k, names),
        success: result.success,
        partial: result.partial,
        steps_completed: result.steps_completed,
        linf: linf_distance(&result.adversarial_tensor.view(), &tensor.view()),
        original_image: encode_image(&tensor.view(), scheme, &options)?,
        adversarial_image: encode_image(&result.adversarial_tensor.view(), scheme, &options)?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
