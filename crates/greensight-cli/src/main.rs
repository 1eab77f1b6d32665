//! greensight CLI — offline detection and configuration tools.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use greensight::detector::{Detector, DetectorConfig, SearchMode};
use greensight_core::config::{expand_path, ConfigStore, ExportFormat};

#[derive(Parser)]
#[command(name = "greensight")]
#[command(about = "Strobe-based golf launch monitor tools")]
#[command(version)]
struct Cli {
    /// System configuration JSON file.
    #[arg(long, default_value = "golf_sim_config.json", global = true)]
    config_file: PathBuf,

    /// User overrides JSON file.
    #[arg(long, default_value = "~/.pitrac/config/user_settings.json", global = true)]
    user_file: String,

    /// Parameter mapping JSON file.
    #[arg(long, global = true)]
    mappings: Option<PathBuf>,

    /// Runtime overrides as key=value; repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DetectMode {
    Placed,
    Strobed,
    Putting,
}

impl From<DetectMode> for SearchMode {
    fn from(mode: DetectMode) -> Self {
        match mode {
            DetectMode::Placed => SearchMode::PlacedBall,
            DetectMode::Strobed => SearchMode::Strobed,
            DetectMode::Putting => SearchMode::Putting,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect ball circles in an image file.
    Detect {
        /// Input image.
        #[arg(long)]
        image: PathBuf,

        /// Write detections as JSON here (stdout when omitted).
        #[arg(long)]
        out: Option<PathBuf>,

        /// Scene assumption.
        #[arg(long, value_enum, default_value = "strobed")]
        mode: DetectMode,

        /// Expected ball radius in pixels.
        #[arg(long, default_value = "60.0")]
        expected_radius: f64,
    },

    /// Inspect and validate the layered configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective value of one key.
    Get {
        key: String,
        /// Fallback when the key is unset.
        #[arg(long, default_value = "")]
        default: String,
    },
    /// Print which tier supplies a key.
    Source { key: String },
    /// Check every mapped key against its validation metadata.
    Validate,
    /// Write the merged configuration to a file.
    Export {
        out: PathBuf,
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut overrides = BTreeMap::new();
    for entry in &cli.overrides {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("override '{entry}' is not key=value"))?;
        overrides.insert(key.to_string(), value.to_string());
    }

    let user_file = PathBuf::from(expand_path(&cli.user_file));
    let store = ConfigStore::initialize(&cli.config_file, &user_file, &overrides)
        .context("configuration failed to load")?;
    if let Some(mappings) = &cli.mappings {
        store.load_mappings(mappings)?;
    }

    match cli.command {
        Commands::Detect {
            image,
            out,
            mode,
            expected_radius,
        } => run_detect(&image, out.as_deref(), mode, expected_radius),
        Commands::Config { action } => run_config(&store, action),
    }
}

fn run_detect(
    image_path: &Path,
    out: Option<&Path>,
    mode: DetectMode,
    expected_radius: f64,
) -> anyhow::Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("failed to read {}", image_path.display()))?
        .to_rgb8();

    let mut config = DetectorConfig::default();
    config.expected_radius_px = expected_radius;
    let detector = Detector::new(config);
    let balls = detector
        .detect(&image, mode.into(), None)
        .with_context(|| "detection failed")?;

    let text = serde_json::to_string_pretty(&balls)?;
    match out {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{text}"),
    }
    println!("found {} ball(s)", balls.len());
    Ok(())
}

fn run_config(store: &ConfigStore, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key, default } => {
            println!("{}", store.get_string(&key, &default));
        }
        ConfigAction::Source { key } => {
            println!("{}", store.value_source(&key));
        }
        ConfigAction::Validate => {
            let errors = store.validate();
            if errors.is_empty() {
                println!("configuration is valid");
            } else {
                for error in &errors {
                    eprintln!("{error}");
                }
                bail!("{} validation error(s)", errors.len());
            }
        }
        ConfigAction::Export { out, format } => {
            let format = ExportFormat::parse(&format)
                .with_context(|| format!("unknown export format '{format}'"))?;
            store.export_effective(&out, format)?;
            println!("wrote {}", out.display());
        }
    }
    Ok(())
}
