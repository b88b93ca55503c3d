//! Per-URL pipeline: fetch (or replay stored HTML), extract LD-JSON, aggregate,
//! normalize, then persist the recipe and enqueue follow-up URLs in one
//! transaction.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::anyhow;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ProcessError;
use crate::fetch::{FetchOutcome, PageFetcher};
use crate::ingredients::{Ingredient, IngredientsCache};
use crate::normalize::NormalizerRegistry;
use crate::parser::aggregate;
use crate::parser::sections::extract_ld_json_sections;
use crate::recipe::NewRecipe;
use crate::store::{self, JobQueue, RawPageData, Store};

/// A recipe committed by [`UrlProcessor::process_url`].
#[derive(Debug, Clone)]
pub struct SavedRecipe {
    pub id: i64,
    pub recipe: NewRecipe,
    pub queued: usize,
}

pub struct UrlProcessor {
    store: Store,
    fetcher: Arc<dyn PageFetcher>,
    registry: Arc<NormalizerRegistry>,
    cache: Arc<IngredientsCache>,
    queue: Arc<dyn JobQueue>,
    same_site_only: bool,
}

impl UrlProcessor {
    pub fn new(
        store: Store,
        fetcher: Arc<dyn PageFetcher>,
        registry: Arc<NormalizerRegistry>,
        cache: Arc<IngredientsCache>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            fetcher,
            registry,
            cache,
            queue,
            same_site_only: true,
        }
    }

    pub fn same_site_only(mut self, enabled: bool) -> Self {
        self.same_site_only = enabled;
        self
    }

    /// Run the full pipeline for one URL.
    ///
    /// `Ok(None)` means the page was processed but carries no recipe. When
    /// `reprocessing` is set the latest stored raw page is replayed; if none
    /// exists the page is fetched as usual.
    pub async fn process_url(
        &self,
        page_url: &str,
        reprocessing: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<SavedRecipe>, ProcessError> {
        let url = Url::parse(page_url).map_err(|source| ProcessError::InvalidUrl {
            url: page_url.to_string(),
            source,
        })?;
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let stored = if reprocessing {
            let store = self.store.clone();
            let key = url.to_string();
            run_blocking(move || Ok(store.session()?.latest_raw_data_source(&key)?)).await?
        } else {
            None
        };
        let (raw_data_source_id, page) = match stored {
            Some(source) => {
                debug!(url = %url, raw_data_source_id = source.id, "Replaying stored page");
                (source.id, source.page)
            }
            None => {
                if reprocessing {
                    warn!(url = %url, "No stored raw data, fetching");
                }
                self.fetch_and_store(&url, cancel).await?
            }
        };

        let aggregate = aggregate::process(Some(&url), &page.sections)?;
        for skipped in &aggregate.section_errors {
            warn!(url = %url, section = skipped.index, "Skipped LD-JSON section: {}", skipped.error);
        }
        if aggregate.is_empty() {
            debug!(url = %url, "No structured data");
            return Ok(None);
        }

        let host = url.host_str().unwrap_or_default();
        let normalizer = self.registry.get_site_normalizer(host);
        let record = normalizer.normalize_site(&aggregate);
        let mut follow_ups = normalizer.urls_to_queue(&aggregate, &record);
        if self.same_site_only {
            follow_ups.retain(|u| u.host_str().is_some_and(|h| same_site(h, host)));
        }
        let recipe = NewRecipe::from_record(&record, &url);

        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        let job = PersistJob {
            store: self.store.clone(),
            cache: Arc::clone(&self.cache),
            queue: Arc::clone(&self.queue),
            url: url.clone(),
            raw_data_source_id,
            recipe,
            follow_ups,
            cancel: cancel.clone(),
        };
        let (saved, queued) = run_blocking(move || job.run()).await?;

        let Some((id, recipe)) = saved else {
            debug!(url = %url, normalizer = normalizer.name(), queued, "No recipe on page");
            return Ok(None);
        };

        info!(
            url = %url,
            normalizer = normalizer.name(),
            ingredients = recipe.ingredients.len(),
            steps = recipe.steps.len(),
            queued,
            "Saved recipe {:?}",
            recipe.name.as_deref().unwrap_or("")
        );
        Ok(Some(SavedRecipe { id, recipe, queued }))
    }

    async fn fetch_and_store(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(i64, RawPageData), ProcessError> {
        let (status, html) = match self.fetcher.fetch(url, cancel).await {
            FetchOutcome::Page { status, html } => (status, html),
            FetchOutcome::HttpStatus { status } => {
                return Err(ProcessError::HttpStatus {
                    url: url.to_string(),
                    status,
                })
            }
            FetchOutcome::Transport { message } => {
                return Err(ProcessError::Transport {
                    url: url.to_string(),
                    message,
                })
            }
            FetchOutcome::Cancelled => return Err(ProcessError::Cancelled),
        };

        let page = RawPageData {
            url: url.to_string(),
            status: Some(status),
            sections: extract_ld_json_sections(&html),
            html,
        };
        let store = self.store.clone();
        run_blocking(move || {
            let id = store.session()?.insert_raw_data_source(&page)?;
            Ok((id, page))
        })
        .await
    }
}

/// Run SQLite work on the blocking pool so busy waits do not stall fetches.
async fn run_blocking<T, F>(f: F) -> Result<T, ProcessError>
where
    F: FnOnce() -> Result<T, ProcessError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProcessError::Other(anyhow!("store task failed: {}", e)))?
}

/// Everything one URL commits, in a single transaction.
struct PersistJob {
    store: Store,
    cache: Arc<IngredientsCache>,
    queue: Arc<dyn JobQueue>,
    url: Url,
    raw_data_source_id: i64,
    recipe: Option<NewRecipe>,
    follow_ups: BTreeSet<Url>,
    cancel: CancellationToken,
}

impl PersistJob {
    /// Returns the saved recipe (if any) and how many follow-up URLs were new.
    fn run(self) -> Result<(Option<(i64, NewRecipe)>, usize), ProcessError> {
        let session = self.store.session()?;
        let tx = session.conn().unchecked_transaction()?;

        let saved = match self.recipe {
            Some(recipe) => {
                let (id, created) =
                    save_recipe(&tx, &self.cache, &recipe, self.raw_data_source_id)?;
                Some((id, created, recipe))
            }
            None => None,
        };
        let mut queued = 0;
        for next in &self.follow_ups {
            if self.queue.enqueue(&tx, next, &self.url)? {
                queued += 1;
            }
        }

        if self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        tx.commit()?;

        Ok((
            saved.map(|(id, created, recipe)| {
                self.cache.add_data(created);
                (id, recipe)
            }),
            queued,
        ))
    }
}

/// Create unknown ingredients, then write the recipe. Returns the recipe
/// id and the ingredient rows the cache has not seen yet.
fn save_recipe(
    conn: &Connection,
    cache: &IngredientsCache,
    recipe: &NewRecipe,
    raw_data_source_id: i64,
) -> anyhow::Result<(i64, Vec<Ingredient>)> {
    let (known, unknown) = cache.partition(&recipe.ingredients);
    let mut ids: HashMap<usize, i64> = known
        .iter()
        .map(|k| (k.step.position, k.ingredient.id))
        .collect();

    let mut created = Vec::with_capacity(unknown.len());
    for step in &unknown {
        let ingredient = store::upsert_ingredient(conn, &step.name)?;
        ids.insert(step.position, ingredient.id);
        created.push(ingredient);
    }

    let id = store::replace_recipe(conn, recipe, Some(raw_data_source_id), &ids)?;
    Ok((id, created))
}

/// Hosts are the same site when they match after dropping a `www.` prefix.
fn same_site(a: &str, b: &str) -> bool {
    let strip = |h: &str| h.strip_prefix("www.").unwrap_or(h).to_ascii_lowercase();
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::ingredients::IngredientStore;
    use crate::store::UrlTableQueue;

    const SOUP_PAGE: &str = r#"<html><head>
        <script type="application/ld+json">
        {"@context":"https://schema.org","@graph":[
          {"@type":"WebSite","@id":"https://kitchen.com/#website","name":"Kitchen","url":"https://kitchen.com/"},
          {"@type":"BreadcrumbList","itemListElement":[
            {"@type":"ListItem","position":1,"item":{"@id":"https://kitchen.com/soups/","name":"Soups"}},
            {"@type":"ListItem","position":2,"item":"https://other.com/elsewhere"}
          ]},
          {"@type":"Recipe","name":"Leek Soup",
           "image":"https://kitchen.com/img/soup.jpg",
           "recipeIngredient":["2 leeks, sliced","1 tsp salt","500 ml stock"],
           "recipeInstructions":[{"@type":"HowToStep","text":"Sweat the leeks."},{"@type":"HowToStep","text":"Add stock and simmer."}],
           "totalTime":"PT40M"}
        ]}
        </script></head><body></body></html>"#;

    const TWO_RECIPES_PAGE: &str = r#"
        <script type="application/ld+json">{"@type":"Recipe","name":"A"}</script>
        <script type="application/ld+json">{"@type":"Recipe","name":"B"}</script>"#;

    struct StubFetcher {
        pages: HashMap<String, FetchOutcome>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(pages: &[(&str, FetchOutcome)]) -> Arc<Self> {
            Arc::new(Self {
                pages: pages
                    .iter()
                    .map(|(u, o)| (u.to_string(), o.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return FetchOutcome::Cancelled;
            }
            self.pages
                .get(url.as_str())
                .cloned()
                .unwrap_or(FetchOutcome::HttpStatus { status: 404 })
        }
    }

    fn page(html: &str) -> FetchOutcome {
        FetchOutcome::Page {
            status: 200,
            html: html.to_string(),
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Store,
        cache: Arc<IngredientsCache>,
        fetcher: Arc<StubFetcher>,
        processor: UrlProcessor,
    }

    fn fixture(pages: &[(&str, FetchOutcome)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("recipes.sqlite"));
        store.init().unwrap();
        let cache = Arc::new(IngredientsCache::new());
        cache.load_data(&store.session().unwrap()).unwrap();
        let fetcher = StubFetcher::new(pages);
        let processor = UrlProcessor::new(
            store.clone(),
            fetcher.clone(),
            Arc::new(NormalizerRegistry::with_builtin_sites()),
            Arc::clone(&cache),
            Arc::new(UrlTableQueue),
        );
        Fixture {
            _dir: dir,
            store,
            cache,
            fetcher,
            processor,
        }
    }

    fn count(store: &Store, table: &str) -> usize {
        store
            .session()
            .unwrap()
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn page_without_ld_json_only_writes_raw_data() {
        let f = fixture(&[("https://kitchen.com/about", page("<html><p>hello</p></html>"))]);
        let result = f
            .processor
            .process_url("https://kitchen.com/about", false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(count(&f.store, "raw_data_sources"), 1);
        assert_eq!(count(&f.store, "recipes"), 0);
        assert_eq!(count(&f.store, "ingredients"), 0);
        assert_eq!(count(&f.store, "recipe_urls"), 0);
    }

    #[tokio::test]
    async fn recipe_page_is_saved_and_links_queued() {
        let f = fixture(&[("https://www.kitchen.com/leek-soup", page(SOUP_PAGE))]);
        let saved = f
            .processor
            .process_url("https://www.kitchen.com/leek-soup", false, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(saved.recipe.name.as_deref(), Some("Leek Soup"));
        assert_eq!(saved.recipe.total_minutes, Some(40));
        assert_eq!(saved.recipe.steps.len(), 2);
        assert_eq!(
            saved.recipe.image_url.as_deref(),
            Some("https://kitchen.com/img/soup.jpg")
        );
        assert_eq!(count(&f.store, "recipes"), 1);
        assert_eq!(count(&f.store, "recipe_step_ingredients"), 3);
        assert_eq!(count(&f.store, "ingredients"), 3);
        assert_eq!(f.cache.len(), 3);
        assert!(f.cache.get("salt").is_some());

        // other.com is a different site
        let session = f.store.session().unwrap();
        let queued: Vec<String> = session
            .fetch_pending(None)
            .unwrap()
            .into_iter()
            .map(|u| u.url)
            .collect();
        assert!(queued.contains(&"https://kitchen.com/soups/".to_string()));
        assert!(!queued.iter().any(|u| u.contains("other.com")));
        assert_eq!(saved.queued, queued.len());
    }

    #[tokio::test]
    async fn store_lock_wait_leaves_runtime_free() {
        let f = fixture(&[("https://kitchen.com/leek-soup", page(SOUP_PAGE))]);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let store = f.store.clone();
        let holder = std::thread::spawn(move || {
            let session = store.session().unwrap();
            session.conn().execute_batch("BEGIN IMMEDIATE").unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
            session.conn().execute_batch("COMMIT").unwrap();
        });
        locked_rx.recv().unwrap();

        let ticks = AtomicUsize::new(0);
        let ticker = async {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        };
        let cancel = CancellationToken::new();
        let saved = tokio::select! {
            r = f.processor.process_url("https://kitchen.com/leek-soup", false, &cancel) => r.unwrap(),
            _ = ticker => unreachable!(),
        };
        holder.join().unwrap();

        assert!(saved.is_some());
        // the single runtime thread kept ticking while SQLite waited on the lock
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn reprocessing_replays_stored_page_and_replaces_recipe() {
        let f = fixture(&[("https://kitchen.com/leek-soup", page(SOUP_PAGE))]);
        let cancel = CancellationToken::new();
        f.processor
            .process_url("https://kitchen.com/leek-soup", false, &cancel)
            .await
            .unwrap();
        let again = f
            .processor
            .process_url("https://kitchen.com/leek-soup", true, &cancel)
            .await
            .unwrap();

        assert!(again.is_some());
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(count(&f.store, "raw_data_sources"), 1);
        assert_eq!(count(&f.store, "recipes"), 1);
        assert_eq!(count(&f.store, "ingredients"), 3);
        assert_eq!(count(&f.store, "recipe_step_ingredients"), 3);
    }

    #[tokio::test]
    async fn reprocessing_without_stored_page_fetches() {
        let f = fixture(&[("https://kitchen.com/leek-soup", page(SOUP_PAGE))]);
        let saved = f
            .processor
            .process_url("https://kitchen.com/leek-soup", true, &CancellationToken::new())
            .await
            .unwrap();
        assert!(saved.is_some());
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn known_ingredients_are_reused_from_cache() {
        let f = fixture(&[("https://kitchen.com/leek-soup", page(SOUP_PAGE))]);
        {
            let session = f.store.session().unwrap();
            store::upsert_ingredient(session.conn(), "Salt").unwrap();
            f.cache.load_data(&session).unwrap();
        }
        f.processor
            .process_url("https://kitchen.com/leek-soup", false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count(&f.store, "ingredients"), 3);
        assert_eq!(f.store.session().unwrap().load_ingredients().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_recipes_skip_page_but_keep_raw_data() {
        let f = fixture(&[("https://kitchen.com/two", page(TWO_RECIPES_PAGE))]);
        let err = f
            .processor
            .process_url("https://kitchen.com/two", false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Aggregate(_)));
        assert!(err.is_skip());
        assert_eq!(count(&f.store, "raw_data_sources"), 1);
        assert_eq!(count(&f.store, "recipes"), 0);
    }

    #[tokio::test]
    async fn http_failures_are_reported_without_writes() {
        let f = fixture(&[(
            "https://kitchen.com/down",
            FetchOutcome::HttpStatus { status: 503 },
        )]);
        let cancel = CancellationToken::new();

        let missing = f
            .processor
            .process_url("https://kitchen.com/missing", false, &cancel)
            .await
            .unwrap_err();
        assert!(missing.is_skip());

        let down = f
            .processor
            .process_url("https://kitchen.com/down", false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(down, ProcessError::HttpStatus { status: 503, .. }));
        assert!(!down.is_skip());
        assert_eq!(count(&f.store, "raw_data_sources"), 0);
    }

    #[tokio::test]
    async fn cancelled_run_commits_nothing() {
        let f = fixture(&[("https://kitchen.com/leek-soup", page(SOUP_PAGE))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f
            .processor
            .process_url("https://kitchen.com/leek-soup", false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
        assert_eq!(count(&f.store, "recipes"), 0);
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_url_is_a_skip() {
        let f = fixture(&[]);
        let err = f
            .processor
            .process_url("not a url", false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidUrl { .. }));
        assert!(err.is_skip());
    }

    #[test]
    fn same_site_ignores_www() {
        assert!(same_site("www.kitchen.com", "kitchen.com"));
        assert!(!same_site("kitchen.com", "other.com"));
    }
}
