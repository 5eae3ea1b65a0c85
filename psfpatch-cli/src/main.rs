use clap::Parser;
use psfpatch::io::load_gray_image;
use psfpatch::{
    regular_corners, AverageMode, CoordinateId, DetectConfig, FitConfig, FitResult, Gaussian2d,
    Moffat2d, PatchStore, PsfModel, PsfPatchResult, ThresholdDetector,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "psfpatch CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DetectConfigJson {
    threshold: f64,
    min_area: usize,
}

impl Default for DetectConfigJson {
    fn default() -> Self {
        let cfg = DetectConfig::default();
        Self {
            threshold: cfg.threshold,
            min_area: cfg.min_area,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AverageConfigJson {
    step: usize,
    size: usize,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    AverageMode::default().to_string()
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum ModelConfig {
    #[default]
    Gaussian,
    Moffat,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FitConfigJson {
    model: ModelConfig,
    initial: HashMap<String, f64>,
    max_iterations: usize,
    parallel: bool,
}

impl Default for FitConfigJson {
    fn default() -> Self {
        let cfg = FitConfig::default();
        Self {
            model: ModelConfig::Gaussian,
            initial: HashMap::new(),
            max_iterations: cfg.max_iterations,
            parallel: cfg.parallel,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    image_paths: Vec<String>,
    output_path: Option<String>,
    patch_size: usize,
    detect: DetectConfigJson,
    average: Option<AverageConfigJson>,
    store_path: Option<String>,
    fit: FitConfigJson,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_paths: Vec::new(),
            output_path: None,
            patch_size: 15,
            detect: DetectConfigJson::default(),
            average: None,
            store_path: None,
            fit: FitConfigJson::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FitRecord {
    image_index: Option<usize>,
    x: i64,
    y: i64,
    converged: bool,
    parameters: BTreeMap<String, f64>,
    chi_square: f64,
    reduced_chi_square: f64,
    iterations: usize,
    error: Option<String>,
}

impl FitRecord {
    fn new(key: CoordinateId, result: PsfPatchResult<FitResult>) -> Self {
        let mut record = Self {
            image_index: key.image_index,
            x: key.x,
            y: key.y,
            converged: false,
            parameters: BTreeMap::new(),
            chi_square: f64::NAN,
            reduced_chi_square: f64::NAN,
            iterations: 0,
            error: None,
        };
        match result {
            Ok(fit) => {
                record.converged = fit.converged;
                record.parameters = fit
                    .parameters
                    .iter()
                    .map(|(name, value)| (name.to_string(), *value))
                    .collect();
                record.chi_square = fit.chi_square;
                record.reduced_chi_square = fit.reduced_chi_square;
                record.iterations = fit.iterations;
            }
            Err(err) => record.error = Some(err.to_string()),
        }
        record
    }
}

#[derive(Debug, Serialize)]
struct Output {
    patches: usize,
    fits: Vec<FitRecord>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("psfpatch=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.image_paths.is_empty() {
        return Err("image_paths must list at least one image".into());
    }
    if config.patch_size == 0 {
        return Err("patch_size must be at least 1".into());
    }
    let mode = match &config.average {
        Some(avg) => Some(avg.mode.parse::<AverageMode>()?),
        None => None,
    };

    let images = config
        .image_paths
        .iter()
        .map(load_gray_image)
        .collect::<PsfPatchResult<Vec<_>>>()?;
    let detector = ThresholdDetector::new(DetectConfig {
        threshold: config.detect.threshold,
        min_area: config.detect.min_area,
    });
    let mut store = PatchStore::find_stars_and_create(&images, config.patch_size, &detector)?;
    tracing::info!(patches = store.len(), images = images.len(), "stamps collected");

    if let (Some(avg), Some(mode)) = (&config.average, mode) {
        let rows = images.iter().map(|img| img.nrows()).max().unwrap_or(0);
        let cols = images.iter().map(|img| img.ncols()).max().unwrap_or(0);
        let corners = regular_corners(rows, cols, avg.step);
        store = store.average(&corners, avg.step, avg.size, mode)?;
    }
    if let Some(path) = &config.store_path {
        store.save(path)?;
    }

    let fit_cfg = FitConfig {
        max_iterations: config.fit.max_iterations,
        parallel: config.fit.parallel,
        ..FitConfig::default()
    };
    let model: &dyn PsfModel = match config.fit.model {
        ModelConfig::Gaussian => &Gaussian2d,
        ModelConfig::Moffat => &Moffat2d,
    };
    let results = store.fit(model, &config.fit.initial, &fit_cfg)?;

    let mut fits: Vec<FitRecord> = results
        .into_iter()
        .map(|(key, result)| FitRecord::new(key, result))
        .collect();
    fits.sort_by_key(|record| (record.image_index, record.x, record.y));
    let output = Output {
        patches: store.len(),
        fits,
    };
    let json = serde_json::to_string_pretty(&output)?;

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
