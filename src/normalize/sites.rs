use url::Url;

use super::urls::resolve_url;
use super::SiteNormalizer;

/// allrecipes.com: pages link to everything from account pages to ads, so
/// only recipe, recipe-category and gallery paths are followed.
#[derive(Debug, Default)]
pub struct AllRecipesNormalizer;

const ALLRECIPES_PATHS: &[&str] = &["/recipe/", "/recipes/", "/gallery/"];

impl SiteNormalizer for AllRecipesNormalizer {
    fn name(&self) -> &'static str {
        "allrecipes"
    }

    fn should_queue(&self, url: &Url) -> bool {
        let path = url.path();
        path == "/" || ALLRECIPES_PATHS.iter().any(|p| path.starts_with(p))
    }
}

/// bbcgoodfood.com: images are served through a resizing proxy
/// (`?quality=90&resize=556,505`); the bare URL is the original.
#[derive(Debug, Default)]
pub struct BbcGoodFoodNormalizer;

impl SiteNormalizer for BbcGoodFoodNormalizer {
    fn name(&self) -> &'static str {
        "bbcgoodfood"
    }

    fn normalize_image_url(&self, page: Option<&Url>, raw: Option<&str>) -> Option<Url> {
        let mut url = resolve_url(page, raw)?;
        let resized = url
            .query_pairs()
            .any(|(k, _)| k == "resize" || k == "quality" || k == "webp");
        if resized {
            url.set_query(None);
        }
        Some(url)
    }
}
