use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_harvest::backfill;
use feed_harvest::browser::default_launcher;
use feed_harvest::config::{self, Config};
use feed_harvest::crawl::{CrawlController, CrawlSettings, PrefixClassifier, ScriptedFeedSession};
use feed_harvest::db::{self, Pool};
use feed_harvest::events::EventBus;
use feed_harvest::export::{self, CrawlExport};
use feed_harvest::extract::FieldExtractor;
use feed_harvest::ingest::IngestPipeline;
use feed_harvest::media::HttpMediaFetcher;
use feed_harvest::model::Topic;
use feed_harvest::repair::{RepairSettings, RepairWorker};
use feed_harvest::storage::LocalObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Crawl the feed and write an export, without ingesting
    Crawl,
    /// Crawl, export, ingest everything and repair missing images
    Run,
    /// Publish an export for ingestion, repairing records without an image
    Replay { export: PathBuf },
    /// Send export records without an image through the repair worker
    RequeueMissing { export: PathBuf },
    /// Fill empty article links from an export
    BackfillLinks { export: PathBuf },
    /// Re-host images whose stored URL carries a query string
    BackfillImages { export: PathBuf },
    /// Assign sequential tag indexes in posted-at order
    BackfillTags,
    /// Print a sample config file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    match args.command {
        Command::Crawl => {
            let outcome = build_controller(&cfg).await?.run().await?;
            let export = CrawlExport::new(&cfg.site.origin, &cfg.site.category, outcome.records);
            let path = export::write_export(&cfg.exports_dir(), &export).await?;
            println!("{} articles -> {}", export.total_articles, path.display());
        }
        Command::Run => {
            let pool = open_pool(&cfg).await?;
            let bus = EventBus::new();
            let workers = Workers::start(&cfg, pool, &bus)?;
            let controller = build_controller(&cfg).await?;
            let report = export::harvest(
                &controller,
                &cfg.exports_dir(),
                &cfg.site.origin,
                &cfg.site.category,
                &cfg.repair.blacklist,
                &bus,
            )
            .await?;
            info!(
                export = %report.export_path.display(),
                ingest = report.published.ingest,
                repair = report.published.repair,
                "harvest published"
            );
            workers.drain(&bus).await;
        }
        Command::Replay { export: path } => {
            let pool = open_pool(&cfg).await?;
            let bus = EventBus::new();
            let workers = Workers::start(&cfg, pool.clone(), &bus)?;
            let sent = export::replay(&bus, &path, &cfg.repair.blacklist).await?;
            workers.drain(&bus).await;
            println!(
                "replayed {} records ({} sent to repair); {} articles stored",
                sent.ingest + sent.repair,
                sent.repair,
                db::count_articles(&pool).await?
            );
        }
        Command::RequeueMissing { export: path } => {
            let pool = open_pool(&cfg).await?;
            let bus = EventBus::new();
            let workers = Workers::start(&cfg, pool.clone(), &bus)?;
            let records = export::read_export(&path).await?.articles;
            let queued =
                backfill::requeue_missing_images(&pool, &bus, &records, &cfg.repair.blacklist)
                    .await?;
            workers.drain(&bus).await;
            println!("requeued {} records", queued);
        }
        Command::BackfillLinks { export: path } => {
            let pool = open_pool(&cfg).await?;
            let records = export::read_export(&path).await?.articles;
            let report = backfill::backfill_links(&pool, &records).await?;
            println!("{:?}", report);
        }
        Command::BackfillImages { export: path } => {
            let pool = open_pool(&cfg).await?;
            let store = Arc::new(LocalObjectStore::from_config(&cfg.media));
            let pipeline = build_pipeline(&cfg, pool.clone(), store.clone())?;
            let records = export::read_export(&path).await?.articles;
            let report =
                backfill::backfill_images(&pool, &pipeline, store.as_ref(), &records).await?;
            println!("{:?}", report);
        }
        Command::BackfillTags => {
            let pool = open_pool(&cfg).await?;
            let report = backfill::backfill_tags(&pool).await?;
            println!("{:?}", report);
        }
        Command::ExampleConfig => {}
    }
    Ok(())
}

async fn open_pool(cfg: &Config) -> Result<Pool> {
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

fn build_pipeline(cfg: &Config, pool: Pool, store: Arc<LocalObjectStore>) -> Result<IngestPipeline> {
    let fetcher = Arc::new(HttpMediaFetcher::from_config(&cfg.media)?);
    Ok(IngestPipeline::new(
        pool,
        fetcher,
        store,
        Duration::from_secs(cfg.media.deadline_secs),
    ))
}

async fn build_controller(cfg: &Config) -> Result<CrawlController> {
    let browser = default_launcher(&cfg.media.user_agent).launch().await?;
    let session = ScriptedFeedSession::new(browser, &cfg.site, cfg.crawl.page_ready_timeout());
    Ok(CrawlController::new(
        Arc::new(session),
        Arc::new(PrefixClassifier::from_site(&cfg.site)),
        FieldExtractor::from_site(&cfg.site)?,
        cfg.site.item_selector.clone(),
        CrawlSettings::from(&cfg.crawl),
    ))
}

/// Ingestion consumer plus repair worker, each on its own task.
struct Workers {
    ingest: JoinHandle<()>,
    repair: JoinHandle<()>,
}

impl Workers {
    fn start(cfg: &Config, pool: Pool, bus: &EventBus) -> Result<Self> {
        let store = Arc::new(LocalObjectStore::from_config(&cfg.media));
        let ingest = build_pipeline(cfg, pool, store)?.spawn(bus);
        let repair = RepairWorker::new(
            default_launcher(&cfg.media.user_agent),
            bus.clone(),
            RepairSettings::from_config(cfg)?,
        )
        .spawn();
        Ok(Self { ingest, repair })
    }

    /// Repair first, since it feeds ingestion.
    async fn drain(self, bus: &EventBus) {
        bus.close(Topic::ScrapeSingleArticle);
        let _ = self.repair.await;
        bus.close(Topic::SaveScrapedArticle);
        let _ = self.ingest.await;
    }
}
