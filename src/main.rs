use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use recipe_crawler::config::Settings;
use recipe_crawler::crawl;
use recipe_crawler::fetch::HttpFetcher;
use recipe_crawler::ingredients::IngredientsCache;
use recipe_crawler::normalize::NormalizerRegistry;
use recipe_crawler::processor::UrlProcessor;
use recipe_crawler::sitemap;
use recipe_crawler::store::{Store, UrlTableQueue};

#[derive(Parser)]
#[command(name = "recipe_crawler", about = "Recipe crawler driven by schema.org LD-JSON")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a sitemap (or sitemap index) and populate the URL queue
    Init {
        /// Sitemap URL
        #[arg(long)]
        sitemap: String,
        /// Only queue URLs matching this regex
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Queue URLs by hand
    Add {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Queue the item-list and breadcrumb links of listing pages
    Discover {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Crawl pending URLs
    Run {
        /// Max URLs to process (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Re-run extraction on stored pages without fetching
    Reprocess {
        /// Max URLs to reprocess (default: all with stored pages)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show crawl statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let store = Store::new(&settings.database_path);
    store.init()?;

    let result = match cli.command {
        Commands::Init { sitemap, pattern } => {
            let re = pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .context("Invalid --pattern")?;
            let client = reqwest::Client::builder()
                .user_agent(settings.user_agent.as_str())
                .timeout(settings.request_timeout())
                .build()?;
            let urls = sitemap::fetch_sitemap_urls(&client, &sitemap, re.as_ref()).await?;
            let inserted = store.session()?.insert_urls(&urls)?;
            println!("Inserted {} new URLs ({} total found)", inserted, urls.len());
            Ok(())
        }
        Commands::Add { urls } => {
            let mut valid = Vec::with_capacity(urls.len());
            for raw in urls {
                match Url::parse(&raw) {
                    Ok(url) => valid.push(url.to_string()),
                    Err(e) => eprintln!("Ignoring {}: {}", raw, e),
                }
            }
            let inserted = store.session()?.insert_urls(&valid)?;
            println!("Inserted {} new URLs", inserted);
            Ok(())
        }
        Commands::Discover { urls } => {
            let fetcher = HttpFetcher::new(&settings)?;
            let cancel = CancellationToken::new();
            crawl::cancel_on_ctrl_c(cancel.clone());
            let mut inserted = 0;
            for raw in urls {
                let url = Url::parse(&raw).with_context(|| format!("Invalid URL {}", raw))?;
                let found = crawl::discover_urls(&fetcher, &url, &cancel).await?;
                let found: Vec<String> = found.into_iter().map(String::from).collect();
                inserted += store.session()?.insert_urls(&found)?;
            }
            println!("Inserted {} new URLs", inserted);
            Ok(())
        }
        Commands::Run { limit } => {
            let pending = store.session()?.fetch_pending(limit)?;
            if pending.is_empty() {
                println!("No pending URLs. Run 'init' or 'add' first.");
                return Ok(());
            }
            println!("Crawling {} URLs...", pending.len());
            run(&settings, &store, pending, false).await
        }
        Commands::Reprocess { limit } => {
            let stored = store.session()?.fetch_reprocessable(limit)?;
            if stored.is_empty() {
                println!("No stored pages. Run 'run' first.");
                return Ok(());
            }
            println!("Reprocessing {} stored pages...", stored.len());
            run(&settings, &store, stored, true).await
        }
        Commands::Stats => {
            let s = store.session()?.stats()?;
            println!("URLs:        {}", s.urls);
            println!("Pending:     {}", s.pending);
            println!("Done:        {}", s.done);
            println!("No recipe:   {}", s.no_recipe);
            println!("Skipped:     {}", s.skipped);
            println!("Failed:      {}", s.failed);
            println!("Raw pages:   {}", s.raw_pages);
            println!("Recipes:     {}", s.recipes);
            println!("Ingredients: {}", s.ingredients);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(
    settings: &Settings,
    store: &Store,
    urls: Vec<recipe_crawler::store::RecipeUrl>,
    reprocessing: bool,
) -> Result<()> {
    let cache = Arc::new(IngredientsCache::new());
    cache.load_data(&store.session()?)?;

    let processor = UrlProcessor::new(
        store.clone(),
        Arc::new(HttpFetcher::new(settings)?),
        Arc::new(NormalizerRegistry::with_builtin_sites()),
        cache,
        Arc::new(UrlTableQueue),
    )
    .same_site_only(settings.same_site_only);

    let cancel = CancellationToken::new();
    crawl::cancel_on_ctrl_c(cancel.clone());

    let stats = crawl::run_batch(
        Arc::new(processor),
        store,
        urls,
        reprocessing,
        settings.concurrency,
        cancel,
    )
    .await?;
    println!(
        "Done: {} URLs ({} recipes, {} without recipe, {} skipped, {} failed, {} cancelled), {} new URLs queued.",
        stats.total,
        stats.saved,
        stats.no_recipe,
        stats.skipped,
        stats.failed,
        stats.cancelled,
        stats.queued
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
