use std::collections::BTreeMap;

use tracing::debug;
use url::Url;

use super::graph::JsonObject;
use super::objects::get_json_objects_from_ld_json_section;
use crate::error::{AggregateError, LdJsonError};
use crate::schema::{
    classify, Article, ImageObject, ItemList, Organization, Person, ProfilePage, Recipe,
    SchemaNode, SchemaType, TvSeries, VideoObject, WebPage, WebSite,
};

/// A section that could not be read. The rest of the page is still used.
#[derive(Debug)]
pub struct SectionError {
    pub index: usize,
    pub error: LdJsonError,
}

/// Everything the LD-JSON sections of one page declared, grouped by type.
#[derive(Debug, Default)]
pub struct PageAggregate {
    pub url: Option<Url>,
    /// Declared type name → distinct raw objects of that type.
    pub objects_by_type: BTreeMap<String, Vec<JsonObject>>,
    pub organizations: Vec<Organization>,
    pub websites: Vec<WebSite>,
    pub webpages: Vec<WebPage>,
    pub image_objects: Vec<ImageObject>,
    pub video_objects: Vec<VideoObject>,
    pub persons: Vec<Person>,
    pub recipes: Vec<Recipe>,
    pub articles: Vec<Article>,
    pub item_lists: Vec<ItemList>,
    pub tv_series: Vec<TvSeries>,
    pub profile_pages: Vec<ProfilePage>,
    pub section_errors: Vec<SectionError>,
    by_schema_type: BTreeMap<SchemaType, Vec<JsonObject>>,
}

impl PageAggregate {
    pub fn is_empty(&self) -> bool {
        self.objects_by_type.is_empty()
    }

    fn push(&mut self, declared: String, schema_type: SchemaType, obj: JsonObject) {
        let seen = self.by_schema_type.entry(schema_type).or_default();
        if seen.contains(&obj) {
            return;
        }

        let node = match SchemaNode::from_object(schema_type, &obj) {
            Ok(node) => node,
            Err(e) => {
                debug!(type_name = %declared, error = %e, "Dropping node that does not fit its type");
                return;
            }
        };
        seen.push(obj.clone());
        self.objects_by_type.entry(declared).or_default().push(obj);

        match node {
            SchemaNode::Organization(n) => self.organizations.push(n),
            SchemaNode::WebSite(n) => self.websites.push(n),
            SchemaNode::WebPage(n) => self.webpages.push(n),
            SchemaNode::ImageObject(n) => self.image_objects.push(n),
            SchemaNode::VideoObject(n) => self.video_objects.push(n),
            SchemaNode::Person(n) => self.persons.push(n),
            SchemaNode::Recipe(n) => self.recipes.push(*n),
            SchemaNode::Article(n) => self.articles.push(n),
            SchemaNode::ItemList(n) => self.item_lists.push(n),
            SchemaNode::TvSeries(n) => self.tv_series.push(n),
            SchemaNode::ProfilePage(n) => self.profile_pages.push(n),
        }
    }

    fn check_cardinality(&self) -> Result<(), AggregateError> {
        for (schema_type, objects) in &self.by_schema_type {
            if schema_type.is_page_singular() && objects.len() > 1 {
                return Err(AggregateError::MultipleLdTypesFound {
                    type_name: schema_type.as_str().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Build the per-page aggregate from the raw LD-JSON sections of `url`.
///
/// Sections that fail to parse are recorded in `section_errors` and skipped.
/// More than one distinct object of a page-singular type fails the page;
/// identical repeats (the same block emitted twice) collapse into one.
pub fn process(url: Option<&Url>, sections: &[String]) -> Result<PageAggregate, AggregateError> {
    let mut aggregate = PageAggregate {
        url: url.cloned(),
        ..PageAggregate::default()
    };

    for (index, raw) in sections.iter().enumerate() {
        let objects = match get_json_objects_from_ld_json_section(raw) {
            Ok(objects) => objects,
            Err(error) => {
                aggregate.section_errors.push(SectionError { index, error });
                continue;
            }
        };
        for obj in objects {
            if let Some((declared, schema_type)) = classify(&obj) {
                aggregate.push(declared, schema_type, obj);
            }
        }
    }

    aggregate.check_cardinality()?;
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn groups_objects_by_type() {
        let agg = process(
            None,
            &sections(&[
                r#"{"@context":"https://schema.org","@graph":[
                    {"@type":"WebSite","name":"Kitchen"},
                    {"@type":"WebPage","name":"Soup page"},
                    {"@type":"Recipe","name":"Soup"},
                    {"@type":"BreadcrumbList","itemListElement":[]}
                ]}"#,
                r#"{"@type":"Organization","name":"Kitchen Inc"}"#,
            ]),
        )
        .unwrap();
        assert_eq!(agg.recipes.len(), 1);
        assert_eq!(agg.websites.len(), 1);
        assert_eq!(agg.organizations[0].name.as_deref(), Some("Kitchen Inc"));
        assert_eq!(agg.item_lists.len(), 1);
        assert!(agg.objects_by_type.contains_key("BreadcrumbList"));
        assert!(agg.section_errors.is_empty());
    }

    #[test]
    fn two_distinct_recipes_fail() {
        let err = process(
            None,
            &sections(&[
                r#"{"@type":"Recipe","name":"Soup"}"#,
                r#"{"@type":"Recipe","name":"Stew"}"#,
            ]),
        )
        .unwrap_err();
        let AggregateError::MultipleLdTypesFound { type_name } = err;
        assert_eq!(type_name, "Recipe");
    }

    #[test]
    fn identical_recipes_collapse() {
        let agg = process(
            None,
            &sections(&[
                r#"{"@type":"Recipe","name":"Soup"}"#,
                r#"{"@type":"Recipe","name":"Soup"}"#,
            ]),
        )
        .unwrap();
        assert_eq!(agg.recipes.len(), 1);
        assert_eq!(agg.objects_by_type["Recipe"].len(), 1);
    }

    #[test]
    fn two_item_lists_are_fine() {
        let agg = process(
            None,
            &sections(&[
                r#"{"@type":"ItemList","itemListElement":[{"url":"https://a.com/1"}]}"#,
                r#"{"@type":"ItemList","itemListElement":[{"url":"https://a.com/2"}]}"#,
            ]),
        )
        .unwrap();
        assert_eq!(agg.item_lists.len(), 2);
    }

    #[test]
    fn subtypes_share_cardinality() {
        let err = process(
            None,
            &sections(&[r#"[{"@type":"NewsArticle","headline":"a"},{"@type":"BlogPosting","headline":"b"}]"#]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "multiple distinct Article objects found on page");
    }

    #[test]
    fn bad_section_is_skipped() {
        let agg = process(
            None,
            &sections(&[
                "{broken",
                r#"{"@graph":"nope"}"#,
                r#"{"@type":"Recipe","name":"Soup"}"#,
            ]),
        )
        .unwrap();
        assert_eq!(agg.recipes.len(), 1);
        assert_eq!(agg.section_errors.len(), 2);
        assert_eq!(agg.section_errors[0].index, 0);
        assert!(matches!(agg.section_errors[1].error, LdJsonError::GraphShape { .. }));
    }

    #[test]
    fn unknown_types_are_dropped() {
        let agg = process(None, &sections(&[r#"[{"@type":"FAQPage"},{"name":"untyped"}]"#])).unwrap();
        assert!(agg.is_empty());
    }

    #[test]
    fn recipe_with_both_ingredient_keys_is_kept() {
        let agg = process(
            None,
            &sections(&[r#"{"@type":"Recipe","name":"Soup","recipeIngredient":["1 leek"],"ingredients":["1 leek"]}"#]),
        )
        .unwrap();
        assert_eq!(agg.recipes.len(), 1);
        assert_eq!(agg.recipes[0].recipe_ingredient, ["1 leek"]);
    }
}
