use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use quarry_client::{ClientConfig, HtmlExtractor, JsonlSink, standard_ladder};
use quarry_core::models::ExtractionRequest;
use quarry_core::traits::{ResultSink, TextAnalyzer};
use quarry_core::{AcquisitionService, ConfiguredCache, EngineConfig, NullSink, SiteDirectory};

type Service<S = NullSink> = AcquisitionService<HtmlExtractor, ConfiguredCache, S>;

#[derive(Parser)]
#[command(name = "quarry", version, about = "Tiered article acquisition with quality escalation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the text of one article
    Acquire {
        /// Article URL
        #[arg(short, long)]
        url: String,

        /// Expected subject token (repeatable)
        #[arg(short, long = "subject")]
        subjects: Vec<String>,

        /// Expected author
        #[arg(short, long)]
        author: Option<String>,

        /// Competing subject the page must not be mainly about (repeatable)
        #[arg(short, long = "distractor")]
        distractors: Vec<String>,

        /// Highest tier (1-7) to escalate to
        #[arg(long, env = "QUARRY_MAX_TIER")]
        max_tier: Option<u8>,

        /// Reject pages published before this date (YYYY-MM-DD)
        #[arg(long)]
        published_after: Option<NaiveDate>,

        /// Reject pages published after this date (YYYY-MM-DD)
        #[arg(long)]
        published_before: Option<NaiveDate>,

        /// Give up after this many seconds
        #[arg(long, env = "QUARRY_DEADLINE_SECS")]
        deadline_secs: Option<u64>,

        /// Score the accepted text with the analysis model (needs OPENAI_API_KEY)
        #[arg(long, default_value_t = false)]
        analyze: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Acquire every row of a CSV file (url,subjects,author,max_tier)
    Batch {
        /// Input CSV; subjects are separated by ';'
        #[arg(short, long)]
        input: PathBuf,

        /// Acquisitions in flight at once
        #[arg(short, long, env = "QUARRY_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        /// Append results as JSON lines here instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Per-site CSV (domain,start_tier,force_js,feed_url,rate,per)
    #[arg(long, env = "QUARRY_SITES")]
    sites: Option<PathBuf>,

    /// Add the headless browser tier (requires the `browser` feature)
    #[arg(long, default_value_t = false)]
    headless: bool,
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    url: String,
    #[serde(default)]
    subjects: String,
    author: Option<String>,
    max_tier: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quarry=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight acquisitions");
            on_signal.cancel();
        }
    });

    let clients = ClientConfig::from_env();

    match cli.command {
        Commands::Acquire {
            url,
            subjects,
            author,
            distractors,
            max_tier,
            published_after,
            published_before,
            deadline_secs,
            analyze,
            common,
        } => {
            let mut builder = ExtractionRequest::builder(url)
                .subjects(subjects)
                .distractors(distractors)
                .published_between(
                    published_after.map(start_of_day),
                    published_before.map(end_of_day),
                );
            if let Some(author) = author {
                builder = builder.author(author);
            }
            if let Some(tier) = max_tier {
                builder = builder.max_tier(tier);
            }
            if let Some(secs) = deadline_secs {
                builder = builder.deadline(std::time::Duration::from_secs(secs));
            }
            let request = builder.build().context("Invalid request")?;

            let service = build_service(&clients, &common).await?;
            cmd_acquire(&service, &clients, &request, analyze, &cancel).await?;
        }
        Commands::Batch {
            input,
            concurrency,
            output,
            common,
        } => {
            let requests = read_batch(&input)?;
            let service = build_service(&clients, &common).await?;
            match output {
                Some(path) => {
                    let sink = JsonlSink::open(&path)
                        .await
                        .with_context(|| format!("Failed to open output {}", path.display()))?;
                    cmd_batch(service.with_sink(sink), requests, concurrency, cancel, false)
                        .await?;
                }
                None => cmd_batch(service, requests, concurrency, cancel, true).await?,
            }
        }
    }

    Ok(())
}

async fn build_service(clients: &ClientConfig, common: &CommonArgs) -> Result<Service> {
    let config = EngineConfig::from_env().context("Invalid QUARRY_* configuration")?;
    let cache = ConfiguredCache::from_ttl(config.cache_ttl);
    let extractor = HtmlExtractor::new(config.quality.clone());

    #[cfg_attr(not(feature = "browser"), allow(unused_mut))]
    let mut ladder = standard_ladder(clients).context("Failed to build fetch tiers")?;
    if common.headless {
        #[cfg(feature = "browser")]
        ladder.push(
            quarry_client::headless_tier()
                .await
                .context("Failed to launch headless browser")?,
        );
        #[cfg(not(feature = "browser"))]
        anyhow::bail!("--headless needs quarry built with the `browser` feature");
    }

    let mut service = AcquisitionService::new(extractor, config)
        .with_tiers(ladder)
        .with_cache(cache);

    if let Some(path) = &common.sites {
        let sites = SiteDirectory::from_csv_path(path)
            .with_context(|| format!("Failed to load site list {}", path.display()))?;
        tracing::info!(sites = sites.len(), "Loaded per-site settings");
        service = service.with_sites(sites);
    }

    tracing::info!(tiers = ?service.tiers(), "Fetch ladder ready");
    Ok(service)
}

async fn cmd_acquire(
    service: &Service,
    clients: &ClientConfig,
    request: &ExtractionRequest,
    analyze: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    // Fail before fetching anything if analysis cannot run
    let analyzer = if analyze {
        Some(
            clients
                .analyzer()
                .context("Failed to create analysis client")?
                .context("--analyze requires OPENAI_API_KEY")?,
        )
    } else {
        None
    };

    let result = service.acquire(request, cancel).await;

    let output = match (&analyzer, &result.text) {
        (Some(analyzer), Some(text)) => {
            let analysis = analyzer
                .analyze(text, request)
                .await
                .context("Analysis request failed")?;
            serde_json::json!({ "result": result, "analysis": analysis })
        }
        _ => serde_json::to_value(&result)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_batch<S: ResultSink + 'static>(
    service: Service<S>,
    requests: Vec<ExtractionRequest>,
    concurrency: usize,
    cancel: CancellationToken,
    print: bool,
) -> Result<()> {
    let results = quarry_core::run_batch(Arc::new(service), requests, concurrency, cancel).await;

    let accepted = results.iter().filter(|r| r.is_accepted()).count();
    tracing::info!(total = results.len(), accepted, "Batch finished");

    if print {
        for result in &results {
            println!("{}", serde_json::to_string(result)?);
        }
    }
    Ok(())
}

fn read_batch(path: &Path) -> Result<Vec<ExtractionRequest>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;

    let mut requests = Vec::new();
    for (line, row) in reader.deserialize::<BatchRow>().enumerate() {
        // Header is line 1
        let row = row.with_context(|| format!("Malformed row at line {}", line + 2))?;
        let mut builder = ExtractionRequest::builder(row.url.as_str()).subjects(
            row.subjects
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        );
        if let Some(author) = row.author.filter(|a| !a.is_empty()) {
            builder = builder.author(author);
        }
        if let Some(tier) = row.max_tier {
            builder = builder.max_tier(tier);
        }
        let request = builder
            .build()
            .with_context(|| format!("Invalid request for {} at line {}", row.url, line + 2))?;
        requests.push(request);
    }

    tracing::info!(requests = requests.len(), "Loaded batch");
    Ok(requests)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + chrono::Duration::days(1) - chrono::Duration::seconds(1)
}
