use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use mangaport_core::{Enricher, JikanClient, LogKind, ProgressEvent, SourceItem};
use mangaport_reporting::ExportFormat;
use mangaport_scrape::{load_items, save_items, FollowsScraper, DEFAULT_MAX_PAGES};
use tokio_util::sync::CancellationToken;

mod config;
mod render;

use config::{FileConfig, Overrides};
use render::Output;

/// Mangaport - match a followed-manga list against MyAnimeList and export it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "follows_url"])))]
struct Args {
    /// JSON file with a list of {"title", "url"} items
    input: Option<PathBuf>,

    /// Scrape this followed-list page instead of reading a file
    #[arg(long)]
    follows_url: Option<String>,

    /// Maximum listing pages to scrape
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: u32,

    /// Also write the scraped list to this JSON file
    #[arg(long)]
    save_items: Option<PathBuf>,

    /// Directory for the exported files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Comma-separated export formats (xml, html, json)
    #[arg(long, value_delimiter = ',')]
    formats: Vec<ExportFormat>,

    /// Number of concurrent catalog lookups
    #[arg(long)]
    concurrency: Option<usize>,

    /// Minimum spacing between catalog requests, in milliseconds
    #[arg(long)]
    min_interval_ms: Option<u64>,

    /// Per-request timeout, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Minimum similarity a match must exceed (0-1)
    #[arg(long)]
    threshold: Option<f64>,

    /// Disable the per-run title cache
    #[arg(long)]
    no_cache: bool,

    /// Base URL of the Jikan API
    #[arg(long)]
    jikan_url: Option<String>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print progress events as JSON lines on stdout
    #[arg(long)]
    json_progress: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.parse_env("RUST_LOG");
    clog.init();
}

fn step_event(percent: u8, step: u32, kind: LogKind, message: impl Into<String>) -> ProgressEvent {
    ProgressEvent {
        percent,
        step,
        message: message.into(),
        kind,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    // Resolve config from CLI flags > env vars > config file > defaults
    let file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let overrides = Overrides {
        concurrency: args.concurrency,
        min_interval_ms: args.min_interval_ms,
        timeout_secs: args.timeout_secs,
        threshold: args.threshold,
        no_cache: args.no_cache,
        jikan_url: args.jikan_url.clone(),
        output_dir: args.output_dir.clone(),
        formats: args.formats.clone(),
    };
    let settings = config::resolve(&overrides, |key| std::env::var(key).ok(), &file_config)?;
    log::debug!("resolved settings: {settings:?}");

    let output = if args.json_progress {
        Output::json_lines()
    } else {
        Output::terminal(!args.no_color)
    };

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling");
            cancel_for_signal.cancel();
        }
    });

    let client = reqwest::Client::builder()
        .user_agent(concat!("mangaport/", env!("CARGO_PKG_VERSION")))
        .build()?;

    // Step 0: source list
    let items: Vec<SourceItem> = match (&args.input, &args.follows_url) {
        (Some(path), _) => {
            if !path.exists() {
                anyhow::bail!("Input file not found: {}", path.display());
            }
            let items = load_items(path)?;
            output.emit(&step_event(
                25,
                0,
                LogKind::Success,
                format!("Loaded {} titles from {}", items.len(), path.display()),
            ));
            items
        }
        (None, Some(url)) => {
            output.emit(&step_event(0, 0, LogKind::Info, format!("Scraping {url}")));
            let scraper = FollowsScraper::new(client.clone(), url)?.with_max_pages(args.max_pages);
            let max_pages = args.max_pages.max(1);
            let progress_output = output.clone();
            let scrape = scraper.scrape(move |page, found| {
                let percent = (page.min(max_pages) * 25 / max_pages) as u8;
                progress_output.emit(&step_event(
                    percent,
                    0,
                    LogKind::Info,
                    format!("Page {page}: {found} titles so far"),
                ));
            });
            let items = tokio::select! {
                _ = cancel.cancelled() => {
                    output.finish();
                    anyhow::bail!("Cancelled while scraping");
                }
                result = scrape => result?,
            };
            output.emit(&step_event(
                25,
                0,
                LogKind::Success,
                format!("Found {} followed titles", items.len()),
            ));
            items
        }
        (None, None) => anyhow::bail!("Either an input file or --follows-url is required"),
    };

    if let Some(path) = &args.save_items {
        save_items(path, &items)?;
        log::info!("saved {} scraped titles to {}", items.len(), path.display());
    }

    // Step 1: catalog matching
    let jikan = JikanClient::new(client)
        .with_base_url(settings.jikan_url.clone())
        .with_timeout(settings.core.request_timeout);
    let enricher = Enricher::new(Arc::new(jikan), settings.core.clone())?;
    let run = enricher.enrich(&items, output.sink(), &cancel).await?;
    let stats = run.stats.clone();

    if !run.is_complete() {
        output.finish();
        output.summary(&stats);
        anyhow::bail!(
            "Cancelled: {} of {} titles were not processed; no exports written",
            stats.cancelled,
            stats.total
        );
    }
    let enriched = run.into_items()?;

    // Step 2 and 3: exports
    let names: Vec<String> = settings.formats.iter().map(ExportFormat::to_string).collect();
    output.emit(&step_event(
        65,
        2,
        LogKind::Info,
        format!("Generating {} export(s): {}", names.len(), names.join(", ")),
    ));
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let paths = mangaport_reporting::export_results(&enriched, &settings.output_dir, &settings.formats, &stamp)?;
    output.emit(&step_event(90, 2, LogKind::Success, "Exports generated"));

    let count = paths.len().max(1);
    for (i, path) in paths.iter().enumerate() {
        let percent = 92 + (8 * (i + 1) / count) as u8;
        output.emit(&step_event(percent, 3, LogKind::Success, format!("Saved {}", path.display())));
    }
    output.emit(&step_event(100, 3, LogKind::Success, "Export complete"));

    output.finish();
    output.summary(&stats);
    Ok(())
}
