use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::error::ProcessError;
use crate::fetch::{FetchOutcome, PageFetcher};
use crate::normalize::urls::queue_urls_from_json_object_map;
use crate::parser::{aggregate, sections};
use crate::processor::{SavedRecipe, UrlProcessor};
use crate::store::{RecipeUrl, Store, UrlStatus};

/// Batch stats returned after completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub total: usize,
    pub saved: usize,
    pub no_recipe: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queued: usize,
}

type TaskResult = (RecipeUrl, Result<Option<SavedRecipe>, ProcessError>);

/// Process `urls` concurrently, recording each outcome as it arrives.
/// Cancelled URLs keep their current status.
pub async fn run_batch(
    processor: Arc<UrlProcessor>,
    store: &Store,
    urls: Vec<RecipeUrl>,
    reprocessing: bool,
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<CrawlStats> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = urls.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Workers send results, the loop below writes them
    let (tx, mut rx) = mpsc::channel::<TaskResult>(concurrency * 2);

    for recipe_url in urls {
        let processor = Arc::clone(&processor);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                let _ = tx.send((recipe_url, Err(ProcessError::Cancelled))).await;
                return;
            };
            // Inner task so a panic still reports an outcome for this URL
            let url = recipe_url.url.clone();
            let worker = tokio::spawn(async move {
                processor.process_url(&url, reprocessing, &cancel).await
            });
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => Err(ProcessError::Other(anyhow!(
                    "worker panicked: {}",
                    panic_message(e)
                ))),
            };
            let _ = tx.send((recipe_url, result)).await;
        });
    }

    // rx closes once every task has sent
    drop(tx);

    let session = store.session()?;
    let mut stats = CrawlStats {
        total,
        ..Default::default()
    };

    while let Some((recipe_url, result)) = rx.recv().await {
        match result {
            Ok(Some(saved)) => {
                stats.saved += 1;
                stats.queued += saved.queued;
                session.record_outcome(recipe_url.id, UrlStatus::Done, None)?;
            }
            Ok(None) => {
                stats.no_recipe += 1;
                info!(url = %recipe_url.url, "No recipe");
                session.record_outcome(recipe_url.id, UrlStatus::NoRecipe, None)?;
            }
            Err(ProcessError::Cancelled) => {
                stats.cancelled += 1;
            }
            Err(e) if e.is_skip() => {
                stats.skipped += 1;
                warn!(url = %recipe_url.url, "Skipped: {}", e);
                session.record_outcome(recipe_url.id, UrlStatus::Skipped, Some(&e.to_string()))?;
            }
            Err(e) => {
                stats.failed += 1;
                let message = e.to_string();
                error!(url = %recipe_url.url, "Failed: {:#}", anyhow::Error::from(e));
                // left for an external re-queue decision
                session.record_outcome(recipe_url.id, UrlStatus::Failed, Some(&message))?;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Processed {} URLs ({} recipes, {} without recipe, {} skipped, {} failed, {} cancelled)",
        total, stats.saved, stats.no_recipe, stats.skipped, stats.failed, stats.cancelled
    );
    Ok(stats)
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(e) => e.to_string(),
    }
}

/// Fetch a listing page and collect the URLs its breadcrumb and item-list
/// entries point to, without running a site normalizer.
pub async fn discover_urls(
    fetcher: &dyn PageFetcher,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<BTreeSet<Url>> {
    let html = match fetcher.fetch(url, cancel).await {
        FetchOutcome::Page { html, .. } => html,
        FetchOutcome::HttpStatus { status } => bail!("HTTP {} fetching {}", status, url),
        FetchOutcome::Transport { message } => bail!("Failed to fetch {}: {}", url, message),
        FetchOutcome::Cancelled => bail!("Cancelled"),
    };
    let page = aggregate::process(Some(url), &sections::extract_ld_json_sections(&html))?;
    let mut found = queue_urls_from_json_object_map(&page.objects_by_type);
    found.remove(url);
    info!(url = %url, found = found.len(), "Discovered URLs");
    Ok(found)
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling in-flight work");
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::ingredients::IngredientsCache;
    use crate::normalize::NormalizerRegistry;
    use crate::store::UrlTableQueue;

    struct StubFetcher(HashMap<String, FetchOutcome>);

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &Url, _cancel: &CancellationToken) -> FetchOutcome {
            if url.path() == "/boom" {
                panic!("fetcher blew up on {}", url);
            }
            self.0
                .get(url.as_str())
                .cloned()
                .unwrap_or(FetchOutcome::Transport {
                    message: "connection refused".into(),
                })
        }
    }

    const RECIPE: &str = r#"<script type="application/ld+json">
        {"@type":"Recipe","name":"Toast","recipeIngredient":["1 slice bread","butter"],
         "recipeInstructions":"Toast the bread. Butter it."}
        </script>"#;

    fn setup(pages: &[(&str, FetchOutcome)]) -> (TempDir, Store, Arc<UrlProcessor>) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("db").join("recipes.sqlite"));
        store.init().unwrap();
        let fetcher = StubFetcher(
            pages
                .iter()
                .map(|(u, o)| (u.to_string(), o.clone()))
                .collect(),
        );
        let processor = UrlProcessor::new(
            store.clone(),
            Arc::new(fetcher),
            Arc::new(NormalizerRegistry::with_builtin_sites()),
            Arc::new(IngredientsCache::new()),
            Arc::new(UrlTableQueue),
        );
        (dir, store, Arc::new(processor))
    }

    fn status_of(store: &Store, url: &str) -> String {
        store
            .session()
            .unwrap()
            .conn()
            .query_row("SELECT status FROM recipe_urls WHERE url = ?1", [url], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn outcomes_are_recorded_per_url() {
        let (_dir, store, processor) = setup(&[
            ("https://a.com/toast", FetchOutcome::Page { status: 200, html: RECIPE.into() }),
            ("https://a.com/about", FetchOutcome::Page { status: 200, html: "<p>hi</p>".into() }),
            ("https://a.com/gone", FetchOutcome::HttpStatus { status: 410 }),
        ]);
        let urls = [
            "https://a.com/toast",
            "https://a.com/about",
            "https://a.com/gone",
            "https://a.com/down",
        ];
        store
            .session()
            .unwrap()
            .insert_urls(&urls.map(String::from))
            .unwrap();
        let pending = store.session().unwrap().fetch_pending(None).unwrap();

        let stats = run_batch(processor, &store, pending, false, 2, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!((stats.saved, stats.no_recipe, stats.skipped, stats.failed), (1, 1, 1, 1));
        assert_eq!(status_of(&store, "https://a.com/toast"), "done");
        assert_eq!(status_of(&store, "https://a.com/about"), "no_recipe");
        assert_eq!(status_of(&store, "https://a.com/gone"), "skipped");
        assert_eq!(status_of(&store, "https://a.com/down"), "failed");
        assert!(store.session().unwrap().fetch_pending(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_worker_is_recorded_as_failed() {
        let (_dir, store, processor) = setup(&[(
            "https://a.com/toast",
            FetchOutcome::Page { status: 200, html: RECIPE.into() },
        )]);
        store
            .session()
            .unwrap()
            .insert_urls(&["https://a.com/boom".to_string(), "https://a.com/toast".to_string()])
            .unwrap();
        let pending = store.session().unwrap().fetch_pending(None).unwrap();

        let stats = run_batch(processor, &store, pending, false, 2, CancellationToken::new())
            .await
            .unwrap();

        let accounted =
            stats.saved + stats.no_recipe + stats.skipped + stats.failed + stats.cancelled;
        assert_eq!(accounted, stats.total);
        assert_eq!((stats.saved, stats.failed), (1, 1));
        assert_eq!(status_of(&store, "https://a.com/boom"), "failed");
        let last_error: String = store
            .session()
            .unwrap()
            .conn()
            .query_row(
                "SELECT last_error FROM recipe_urls WHERE url = 'https://a.com/boom'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(last_error.contains("panicked"));
        assert!(store.session().unwrap().fetch_pending(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_leaves_urls_pending() {
        let (_dir, store, processor) = setup(&[(
            "https://a.com/toast",
            FetchOutcome::Page { status: 200, html: RECIPE.into() },
        )]);
        store
            .session()
            .unwrap()
            .insert_urls(&["https://a.com/toast".to_string()])
            .unwrap();
        let pending = store.session().unwrap().fetch_pending(None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = run_batch(processor, &store, pending, false, 4, cancel).await.unwrap();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(store.session().unwrap().fetch_pending(None).unwrap().len(), 1);
        assert_eq!(store.session().unwrap().stats().unwrap().recipes, 0);
    }

    #[tokio::test]
    async fn discover_reads_item_lists() {
        let listing = r#"<script type="application/ld+json">
            {"@type":"ItemList","itemListElement":[
              {"@type":"ListItem","position":1,"url":"https://a.com/toast"},
              {"@type":"ListItem","position":2,"url":"https://a.com/jam?utm_source=x"},
              {"@type":"ListItem","position":3,"url":"mailto:chef@a.com"}
            ]}</script>"#;
        let fetcher = StubFetcher(HashMap::from([(
            "https://a.com/list".to_string(),
            FetchOutcome::Page { status: 200, html: listing.into() },
        )]));
        let cancel = CancellationToken::new();

        let found = discover_urls(&fetcher, &Url::parse("https://a.com/list").unwrap(), &cancel)
            .await
            .unwrap();
        let found: Vec<&str> = found.iter().map(Url::as_str).collect();
        assert_eq!(found, ["https://a.com/jam", "https://a.com/toast"]);

        let missing = Url::parse("https://a.com/missing").unwrap();
        assert!(discover_urls(&fetcher, &missing, &cancel).await.is_err());
    }
}
