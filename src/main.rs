//! Prism CLI
//!
//! Runs one analysis request against a catalog and a JSON data file:
//! - Merge an optional bookmark
//! - Compile and execute the job
//! - Print the laid out result or write an export file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prism::config::{generate_default_config, Config, LoggingConfig};
use prism::execution::{ExecutionCoordinator, InMemoryEngine, TableRunner};
use prism::model::Catalog;
use prism::request::Encoding;
use prism::{AnalysisError, AnalyticsService, InMemoryBookmarkStore, Layout, Request, Space};

#[derive(Parser)]
#[command(name = "prism")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Analytics query compilation and execution")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an analysis request
    Run {
        /// Catalog JSON: `{ "domains": [...] }`
        #[arg(long)]
        catalog: PathBuf,
        /// Data JSON: `{ "<domain id>": [ {row}, ... ] }`
        #[arg(long)]
        data: PathBuf,
        /// Request JSON (default: stdin)
        #[arg(short, long)]
        request: Option<PathBuf>,
        /// Bookmarks JSON: `{ "<id>": {config} }`
        #[arg(long)]
        bookmarks: Option<PathBuf>,
        /// Bookmark id to merge
        #[arg(short, long)]
        bookmark: Option<String>,
        /// Layout (records, table, transpose, legacy, sql)
        #[arg(short, long)]
        layout: Option<String>,
        /// Export encoding (csv, json); prints the layout when unset
        #[arg(short, long)]
        encoding: Option<String>,
        /// GZIP-wrap the export
        #[arg(long)]
        gzip: bool,
        /// Export file (default: suggested name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Space domain used when the request names none
        #[arg(long, default_value = "@'sales'")]
        domain: String,
        #[arg(long, default_value = "local")]
        tenant: String,
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Run {
            catalog,
            data,
            request,
            bookmarks,
            bookmark,
            layout,
            encoding,
            gzip,
            output,
            domain,
            tenant,
            user,
        } => {
            let catalog = Arc::new(
                Catalog::from_json(&read(&catalog)?).context("invalid catalog file")?,
            );
            let runner = TableRunner::from_json(catalog.clone(), &read(&data)?)?;
            let bookmarks = match bookmarks {
                Some(path) => InMemoryBookmarkStore::from_json(&read(&path)?)
                    .context("invalid bookmarks file")?,
                None => InMemoryBookmarkStore::new(),
            };

            let engine = Arc::new(
                InMemoryEngine::new(Arc::new(runner), config.execution.max_concurrent_per_tenant)
                    .with_cache_ttl(config.cache_ttl()),
            );
            let service = AnalyticsService::new(
                catalog,
                Arc::new(bookmarks),
                ExecutionCoordinator::new(engine, config.execution_policy()),
            )
            .with_limits(config.limit_policy());

            let request = parse_request(request.as_deref(), &config)?;
            let layout = match layout {
                Some(name) => match Layout::from_str(&name) {
                    Some(layout) => Some(layout),
                    None => bail!("unknown layout '{}'", name),
                },
                None => None,
            };
            let space = Space::new(tenant, "cli", domain, user);

            match encoding {
                Some(name) => {
                    let Some(encoding) = Encoding::from_str(&name) else {
                        bail!("unknown encoding '{}'", name);
                    };
                    let mut request = request;
                    if let Some(layout) = layout {
                        request.layout = layout;
                    }
                    let export = service
                        .export(&space, request, bookmark.as_deref(), encoding, gzip)
                        .await
                        .map_err(report)?;
                    let path = output.unwrap_or_else(|| PathBuf::from(&export.file_name));
                    std::fs::write(&path, &export.bytes)
                        .with_context(|| format!("failed to write {:?}", path))?;
                    println!("Wrote {} bytes ({}) to {:?}", export.bytes.len(), export.content_type, path);
                }
                None => {
                    let analysis = service
                        .analyze(&space, request, bookmark.as_deref(), layout)
                        .await
                        .map_err(report)?;
                    let json = serde_json::to_string_pretty(&serde_json::json!({
                        "output": analysis.output,
                        "problems": analysis.problems,
                    }))?;
                    let mut stdout = std::io::stdout().lock();
                    writeln!(stdout, "{}", json)?;
                }
            }
        }

        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Print the error body for scripted callers
fn report(error: AnalysisError) -> anyhow::Error {
    if let Ok(body) = serde_json::to_string_pretty(&error.to_body()) {
        eprintln!("{}", body);
    }
    tracing::debug!(status = error.status_code(), retryable = error.is_retryable(), "Analysis failed");
    error.into()
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))
}

/// Read a request, applying the configured style when it sets none
fn parse_request(path: Option<&Path>, config: &Config) -> anyhow::Result<Request> {
    let text = match path {
        Some(path) => read(path)?,
        None => std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?,
    };
    let raw: serde_json::Value = serde_json::from_str(&text).context("invalid request")?;
    let has_style = raw.get("style").is_some();
    let mut request: Request = serde_json::from_value(raw).context("invalid request")?;
    if !has_style {
        request.style = config.compiler.default_style;
    }
    Ok(request)
}

/// Logs go to stderr (or the configured file) so stdout stays clean
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prism={}", logging.level)));

    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init();
    }

    tracing::debug!("Prism v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
