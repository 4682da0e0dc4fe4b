use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent_task_client::AgentTaskClient;
use browser_session_client::BrowserSessionClient;
use hypesignal_common::{AppConfig, Source};
use hypesignal_scout::fetcher::FeedRouter;
use hypesignal_scout::render::CdpConnector;
use hypesignal_scout::store::{IdAllocator, Store};
use hypesignal_scout::{Orchestrator, ScoutConfig};

#[derive(Parser)]
#[command(name = "hypesignal-scout", about = "Scrape crypto community feeds and label the tokens they mention")]
struct Cli {
    /// Sources to scrape: `r/<name>`, `#<tag>`, or a bare subreddit name.
    /// Defaults to the built-in community list.
    sources: Vec<String>,

    /// Records extracted per page
    #[arg(long, default_value_t = 25)]
    page_size: usize,

    /// Wall-clock budget for scraping, in seconds
    #[arg(long, default_value_t = 180)]
    timeout_secs: u64,

    /// Output document (default: <DATA_DIR>/scraped_posts.json)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Keep records younger than this many days
    #[arg(long, default_value_t = 7)]
    horizon_days: u32,

    /// Sources scraped at once, one browser session each
    #[arg(long, default_value_t = 3)]
    max_parallel: usize,

    /// Concurrent classification tasks
    #[arg(long, default_value_t = 1)]
    enrichment_concurrency: usize,

    #[arg(long)]
    max_records_per_source: Option<usize>,

    /// Skip opening each record's comment thread
    #[arg(long)]
    no_comments: bool,

    /// Write a screenshot of every page into this directory
    #[arg(long)]
    screenshots: Option<PathBuf>,
}

impl Cli {
    fn sources(&self) -> Vec<Source> {
        if self.sources.is_empty() {
            return Source::defaults();
        }
        self.sources
            .iter()
            .filter_map(|raw| {
                let source = Source::parse(raw);
                if source.is_none() {
                    warn!(raw = raw.as_str(), "Ignoring empty source identifier");
                }
                source
            })
            .collect()
    }

    fn scout_config(&self) -> ScoutConfig {
        ScoutConfig {
            horizon_days: self.horizon_days,
            page_size: self.page_size.max(1),
            global_timeout: Duration::from_secs(self.timeout_secs),
            max_parallel: self.max_parallel.max(1),
            enrichment_concurrency: self.enrichment_concurrency.max(1),
            max_records_per_source: self.max_records_per_source,
            scrape_comments: !self.no_comments,
            screenshot_dir: self.screenshots.clone(),
            ..ScoutConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hypesignal=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let sources = cli.sources();
    let scout_config = cli.scout_config();
    let output = cli.output.clone().unwrap_or_else(|| config.default_output_path());
    info!(
        sources = sources.len(),
        output = %output.display(),
        timeout_secs = cli.timeout_secs,
        "HypeSignal scout starting"
    );

    let store = Arc::new(Store::open(output.clone(), Arc::new(IdAllocator::new())));
    let sessions = Arc::new(BrowserSessionClient::new(
        &config.browser_api_base_url,
        &config.cdp_base_url(),
        &config.browser_api_key,
    ));
    let classifier = Arc::new(AgentTaskClient::new(
        &config.agent_api_base_url,
        &config.agent_api_key,
    ));

    let orchestrator = Orchestrator::new(
        scout_config,
        sessions,
        Arc::new(CdpConnector::default()),
        Arc::new(FeedRouter::new()),
        store,
        classifier,
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping sessions and writing what was collected");
            interrupt.cancel();
        }
    });

    let summary = orchestrator.run(&sources, &cancel).await;
    info!("{summary}");
    Ok(())
}
