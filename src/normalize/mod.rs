pub mod sites;
pub mod urls;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::parser::aggregate::PageAggregate;
use crate::schema::{
    classify, Article, ImageObject, ImageRef, Organization, Person, Recipe, SchemaNode,
    SchemaType, WebPage, WebSite,
};
use urls::{clean_url, list_entry_urls, resolve_url};

/// The reconciled view of one page.
#[derive(Debug, Clone, Default)]
pub struct CanonicalPageRecord {
    pub url: Option<Url>,
    pub organization: Option<Organization>,
    pub website: Option<WebSite>,
    pub webpage: Option<WebPage>,
    pub image_object: Option<ImageObject>,
    pub person: Option<Person>,
    pub article: Option<Article>,
    pub recipe: Option<Recipe>,
    pub image_url: Option<Url>,
}

/// Per-site strategy. The provided methods implement the generic behavior;
/// site variants override the parts their markup gets wrong.
pub trait SiteNormalizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn normalize_site(&self, aggregate: &PageAggregate) -> CanonicalPageRecord {
        generic_normalize_site(self, aggregate)
    }

    /// Never fails: unusable input gives `None`.
    fn normalize_image_url(&self, page: Option<&Url>, raw: Option<&str>) -> Option<Url> {
        resolve_url(page, raw)
    }

    fn urls_to_queue(&self, aggregate: &PageAggregate, record: &CanonicalPageRecord) -> BTreeSet<Url> {
        generic_urls_to_queue(self, aggregate, record)
    }

    /// Site-specific crawl scope for discovered URLs.
    fn should_queue(&self, _url: &Url) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct DefaultNormalizer;

impl SiteNormalizer for DefaultNormalizer {
    fn name(&self) -> &'static str {
        "default"
    }
}

pub fn generic_normalize_site<N: SiteNormalizer + ?Sized>(
    normalizer: &N,
    aggregate: &PageAggregate,
) -> CanonicalPageRecord {
    let page = aggregate.url.as_ref();
    let mut record = CanonicalPageRecord {
        url: aggregate.url.clone(),
        organization: aggregate.organizations.first().cloned(),
        website: aggregate.websites.first().cloned(),
        webpage: aggregate.webpages.first().cloned(),
        image_object: aggregate.image_objects.first().cloned(),
        person: aggregate.persons.first().cloned(),
        article: aggregate.articles.first().cloned(),
        recipe: select_recipe(aggregate),
        image_url: None,
    };

    let resolve = |r: &ImageRef| resolve_image_ref(normalizer, page, r, aggregate);
    let image_url = record
        .recipe
        .iter()
        .flat_map(|r| r.image.iter())
        .chain(record.webpage.iter().flat_map(|p| p.primary_image_of_page.iter()))
        .chain(record.webpage.iter().flat_map(|p| p.image.iter()))
        .find_map(resolve)
        .or_else(|| {
            record
                .image_object
                .as_ref()
                .and_then(|o| normalizer.normalize_image_url(page, o.best_url()))
        })
        .or_else(|| record.article.iter().flat_map(|a| a.image.iter()).find_map(resolve));
    record.image_url = image_url;

    record
}

fn resolve_image_ref<N: SiteNormalizer + ?Sized>(
    normalizer: &N,
    page: Option<&Url>,
    image: &ImageRef,
    aggregate: &PageAggregate,
) -> Option<Url> {
    if let Some(url) = normalizer.normalize_image_url(page, image.url.as_deref()) {
        return Some(url);
    }
    let id = image.id.as_deref()?;
    aggregate
        .image_objects
        .iter()
        .find(|o| o.id.as_deref() == Some(id))
        .and_then(|o| normalizer.normalize_image_url(page, o.best_url()))
}

/// A Recipe declared directly on the page wins. Otherwise an ItemList that
/// embeds exactly one full Recipe node supplies it; a list embedding several
/// is a listing page, not a recipe page.
fn select_recipe(aggregate: &PageAggregate) -> Option<Recipe> {
    if let Some(recipe) = aggregate.recipes.first() {
        return Some(recipe.clone());
    }

    let mut embedded: Vec<Recipe> = aggregate
        .item_lists
        .iter()
        .flat_map(|list| list.item_list_element.iter())
        .filter_map(|element| {
            let node = match element.get("item") {
                Some(item @ Value::Object(_)) => item,
                _ => element,
            };
            let obj = node.as_object()?;
            match classify(obj) {
                Some((_, SchemaType::Recipe)) => match SchemaNode::from_object(SchemaType::Recipe, obj) {
                    Ok(SchemaNode::Recipe(r)) => Some(*r),
                    _ => None,
                },
                _ => None,
            }
        })
        .collect();

    embedded.dedup();
    if embedded.len() == 1 {
        embedded.pop()
    } else {
        None
    }
}

pub fn generic_urls_to_queue<N: SiteNormalizer + ?Sized>(
    normalizer: &N,
    aggregate: &PageAggregate,
    record: &CanonicalPageRecord,
) -> BTreeSet<Url> {
    let page = aggregate.url.as_ref();
    let own = page.cloned().map(clean_url);

    let from_lists = aggregate
        .objects_by_type
        .iter()
        .filter(|(declared, _)| SchemaType::from_declared(declared) == Some(SchemaType::ItemList))
        .flat_map(|(_, lists)| lists.iter())
        .flat_map(list_entry_urls);

    let from_record = [
        record.recipe.as_ref().and_then(|r| r.url.clone()),
        record.website.as_ref().and_then(|w| w.url.clone()),
        record.person.as_ref().and_then(|p| p.url.clone()),
    ];

    from_lists
        .chain(from_record.into_iter().flatten())
        .filter_map(|raw| resolve_url(page, Some(raw.as_str())))
        .map(clean_url)
        .filter(|u| Some(u) != own.as_ref())
        .filter(|u| normalizer.should_queue(u))
        .collect()
}

/// Host → normalizer lookup with a default fallback.
pub struct NormalizerRegistry {
    entries: Vec<(String, Arc<dyn SiteNormalizer>)>,
    default: Arc<dyn SiteNormalizer>,
}

impl NormalizerRegistry {
    pub fn new(default: Arc<dyn SiteNormalizer>) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    /// Registry with the built-in site strategies.
    pub fn with_builtin_sites() -> Self {
        let mut registry = Self::new(Arc::new(DefaultNormalizer));
        registry.register("allrecipes.com", Arc::new(sites::AllRecipesNormalizer));
        registry.register("bbcgoodfood.com", Arc::new(sites::BbcGoodFoodNormalizer));
        registry
    }

    pub fn register(&mut self, host_suffix: &str, normalizer: Arc<dyn SiteNormalizer>) {
        let key = normalize_host(host_suffix);
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, normalizer));
    }

    /// Longest registered suffix matching whole DNS labels of `host` wins;
    /// `www.allrecipes.com` matches `allrecipes.com`, `myallrecipes.com` does not.
    pub fn get_site_normalizer(&self, host: &str) -> Arc<dyn SiteNormalizer> {
        let host = normalize_host(host);
        self.entries
            .iter()
            .filter(|(suffix, _)| {
                host == *suffix
                    || host
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            })
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, n)| Arc::clone(n))
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::with_builtin_sites()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}
