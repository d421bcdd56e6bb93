//! Settings resolution: CLI flag > `MANGAPORT_*` env var > TOML file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use mangaport_core::catalog::JIKAN_BASE_URL;
use mangaport_core::{BackoffPolicy, Config, ProgressRange};
use mangaport_reporting::ExportFormat;
use serde::Deserialize;

/// Optional TOML configuration file. Every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub concurrency: Option<usize>,
    pub min_interval_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub threshold: Option<f64>,
    pub backoff_initial_secs: Option<u64>,
    pub backoff_max_secs: Option<u64>,
    pub cache: Option<bool>,
    pub jikan_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub formats: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub concurrency: Option<usize>,
    pub min_interval_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub threshold: Option<f64>,
    pub no_cache: bool,
    pub jikan_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub formats: Vec<ExportFormat>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub core: Config,
    pub jikan_url: String,
    pub output_dir: PathBuf,
    pub formats: Vec<ExportFormat>,
}

/// Resolve settings. `env` looks up environment variables by name.
pub fn resolve(
    cli: &Overrides,
    env: impl Fn(&str) -> Option<String>,
    file: &FileConfig,
) -> anyhow::Result<Settings> {
    let concurrency = pick(cli.concurrency, &env, "MANGAPORT_CONCURRENCY", file.concurrency)?;
    let min_interval_ms = pick(cli.min_interval_ms, &env, "MANGAPORT_MIN_INTERVAL_MS", file.min_interval_ms)?;
    let timeout_secs = pick(cli.timeout_secs, &env, "MANGAPORT_TIMEOUT_SECS", file.timeout_secs)?;
    let threshold = pick(cli.threshold, &env, "MANGAPORT_THRESHOLD", file.threshold)?;
    let cache = if cli.no_cache {
        Some(false)
    } else {
        pick(None, &env, "MANGAPORT_CACHE", file.cache)?
    };

    let defaults = Config::default();
    let mut backoff = BackoffPolicy::default();
    if let Some(secs) = file.backoff_initial_secs {
        backoff.initial = Duration::from_secs(secs);
    }
    if let Some(secs) = file.backoff_max_secs {
        backoff.max = Duration::from_secs(secs);
    }

    let core = Config {
        concurrency: concurrency.unwrap_or(defaults.concurrency),
        min_interval: min_interval_ms.map(Duration::from_millis).unwrap_or(defaults.min_interval),
        request_timeout: timeout_secs.map(Duration::from_secs).unwrap_or(defaults.request_timeout),
        acceptance_threshold: threshold.unwrap_or(defaults.acceptance_threshold),
        backoff,
        progress_range: ProgressRange::new(30, 60),
        progress_step: 1,
        use_cache: cache.unwrap_or(defaults.use_cache),
    };
    core.validate()?;

    let jikan_url = cli
        .jikan_url
        .clone()
        .or_else(|| env("MANGAPORT_JIKAN_URL"))
        .or_else(|| file.jikan_url.clone())
        .unwrap_or_else(|| JIKAN_BASE_URL.to_string());

    let output_dir = cli
        .output_dir
        .clone()
        .or_else(|| env("MANGAPORT_OUTPUT_DIR").map(PathBuf::from))
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("exports"));

    let formats = if !cli.formats.is_empty() {
        cli.formats.clone()
    } else if let Some(names) = &file.formats {
        names
            .iter()
            .map(|n| n.parse::<ExportFormat>().map_err(anyhow::Error::msg))
            .collect::<anyhow::Result<Vec<_>>>()?
    } else {
        ExportFormat::ALL.to_vec()
    };

    Ok(Settings {
        core,
        jikan_url,
        output_dir,
        formats,
    })
}

/// First of: CLI value, parsed env var, file value.
fn pick<T: std::str::FromStr>(
    cli: Option<T>,
    env: impl Fn(&str) -> Option<String>,
    key: &str,
    file: Option<T>,
) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    if cli.is_some() {
        return Ok(cli);
    }
    if let Some(raw) = env(key) {
        let value = raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))?;
        return Ok(Some(value));
    }
    Ok(file)
}
