//! Typed views over the schema.org node shapes found in recipe pages.
//!
//! Publishers are loose with field shapes (a name may be a string, a number or
//! a one-element array; an image may be a URL, an `ImageObject` or a list of
//! either), so every field goes through a tolerant deserializer that never
//! rejects the whole node because of one odd property.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::parser::graph::JsonObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaType {
    Organization,
    WebSite,
    WebPage,
    ImageObject,
    VideoObject,
    Person,
    Recipe,
    Article,
    ItemList,
    TVSeries,
    ProfilePage,
}

impl SchemaType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::Organization => "Organization",
            SchemaType::WebSite => "WebSite",
            SchemaType::WebPage => "WebPage",
            SchemaType::ImageObject => "ImageObject",
            SchemaType::VideoObject => "VideoObject",
            SchemaType::Person => "Person",
            SchemaType::Recipe => "Recipe",
            SchemaType::Article => "Article",
            SchemaType::ItemList => "ItemList",
            SchemaType::TVSeries => "TVSeries",
            SchemaType::ProfilePage => "ProfilePage",
        }
    }

    /// Map a declared `@type` value (with or without a schema.org prefix) to
    /// the variant it is read as. Unsupported types give `None`.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let name = strip_schema_prefix(declared);
        let t = match name {
            "Organization" | "Corporation" | "NewsMediaOrganization" => SchemaType::Organization,
            "WebSite" => SchemaType::WebSite,
            "WebPage" | "CollectionPage" | "ItemPage" | "AboutPage" | "SearchResultsPage" => {
                SchemaType::WebPage
            }
            "ImageObject" => SchemaType::ImageObject,
            "VideoObject" => SchemaType::VideoObject,
            "Person" => SchemaType::Person,
            "Recipe" => SchemaType::Recipe,
            "Article" | "NewsArticle" | "BlogPosting" | "ReportageNewsArticle" => {
                SchemaType::Article
            }
            "ItemList" | "BreadcrumbList" => SchemaType::ItemList,
            "TVSeries" => SchemaType::TVSeries,
            "ProfilePage" => SchemaType::ProfilePage,
            _ => return None,
        };
        Some(t)
    }

    /// Types a page is expected to declare at most once.
    pub fn is_page_singular(self) -> bool {
        matches!(
            self,
            SchemaType::Organization
                | SchemaType::WebSite
                | SchemaType::WebPage
                | SchemaType::Recipe
                | SchemaType::Person
                | SchemaType::Article
                | SchemaType::ImageObject
        )
    }
}

fn strip_schema_prefix(declared: &str) -> &str {
    let s = declared.trim();
    for prefix in ["https://schema.org/", "http://schema.org/", "schema:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return rest;
        }
    }
    s
}

/// Declared `@type` names of an object, in declaration order.
pub fn declared_types(obj: &JsonObject) -> Vec<String> {
    match obj.get("@type") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// First declared type that maps to a supported variant, with the declared
/// name it was read from (prefix stripped).
pub fn classify(obj: &JsonObject) -> Option<(String, SchemaType)> {
    declared_types(obj).into_iter().find_map(|declared| {
        SchemaType::from_declared(&declared)
            .map(|t| (strip_schema_prefix(&declared).to_string(), t))
    })
}

// ── Tolerant field readers ──

/// Best-effort text of a JSON value: strings (trimmed, non-empty), numbers,
/// the first usable array element, or a JSON-LD `@value` wrapper.
pub fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(value_text),
        Value::Object(o) => o.get("@value").and_then(value_text),
        _ => None,
    }
}

fn value_texts(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items.iter().filter_map(value_text).collect(),
        other => value_text(other).into_iter().collect(),
    }
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(value_text(&Value::deserialize(d)?))
}

fn texts<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(value_texts(&Value::deserialize(d)?))
}

fn values<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// A reference to an image: either a direct URL, or an `@id` pointing at an
/// `ImageObject` elsewhere on the page (or both).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRef {
    pub id: Option<String>,
    pub url: Option<String>,
}

fn image_refs_of(v: &Value) -> Vec<ImageRef> {
    match v {
        Value::String(s) if !s.trim().is_empty() => vec![ImageRef {
            id: None,
            url: Some(s.trim().to_string()),
        }],
        Value::Object(o) => {
            let url = ["url", "contentUrl"]
                .iter()
                .find_map(|k| o.get(*k).and_then(value_text));
            let id = o.get("@id").and_then(value_text);
            if url.is_none() && id.is_none() {
                Vec::new()
            } else {
                vec![ImageRef { id, url }]
            }
        }
        Value::Array(items) => items.iter().flat_map(image_refs_of).collect(),
        _ => Vec::new(),
    }
}

fn images<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<ImageRef>, D::Error> {
    Ok(image_refs_of(&Value::deserialize(d)?))
}

/// Author / publisher: a bare name or a Person/Organization node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Agent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
}

fn agents_of(v: &Value) -> Vec<Agent> {
    match v {
        Value::String(s) if !s.trim().is_empty() => vec![Agent {
            name: Some(s.trim().to_string()),
            ..Agent::default()
        }],
        Value::Object(o) => vec![Agent {
            id: o.get("@id").and_then(value_text),
            name: o.get("name").and_then(value_text),
            url: o.get("url").and_then(value_text),
        }],
        Value::Array(items) => items.iter().flat_map(agents_of).collect(),
        _ => Vec::new(),
    }
}

fn agents<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Agent>, D::Error> {
    Ok(agents_of(&Value::deserialize(d)?))
}

/// Flatten `recipeInstructions` into raw step texts: plain strings (split on
/// line breaks), HowToStep nodes and HowToSection lists, in order.
fn instruction_texts(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::String(s) => out.extend(
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        ),
        Value::Array(items) => items.iter().for_each(|i| instruction_texts(i, out)),
        Value::Object(o) => {
            if let Some(children) = o.get("itemListElement") {
                instruction_texts(children, out);
            } else if let Some(t) = o.get("text").and_then(value_text) {
                out.push(t);
            } else if let Some(t) = o.get("name").and_then(value_text) {
                out.push(t);
            }
        }
        _ => {}
    }
}

fn instructions<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let mut out = Vec::new();
    instruction_texts(&Value::deserialize(d)?, &mut out);
    Ok(out)
}

// ── Variants ──

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Organization {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "images")]
    pub logo: Vec<ImageRef>,
    #[serde(deserialize_with = "texts")]
    pub same_as: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebSite {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "agents")]
    pub publisher: Vec<Agent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebPage {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "images")]
    pub primary_image_of_page: Vec<ImageRef>,
    #[serde(deserialize_with = "images")]
    pub image: Vec<ImageRef>,
    #[serde(deserialize_with = "text")]
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageObject {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "text")]
    pub content_url: Option<String>,
    #[serde(deserialize_with = "text")]
    pub width: Option<String>,
    #[serde(deserialize_with = "text")]
    pub height: Option<String>,
    #[serde(deserialize_with = "text")]
    pub caption: Option<String>,
}

impl ImageObject {
    pub fn best_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.content_url.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoObject {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub content_url: Option<String>,
    #[serde(deserialize_with = "text")]
    pub embed_url: Option<String>,
    #[serde(deserialize_with = "texts")]
    pub thumbnail_url: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Person {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "images")]
    pub image: Vec<ImageRef>,
    #[serde(deserialize_with = "texts")]
    pub same_as: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Recipe {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub description: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "images")]
    pub image: Vec<ImageRef>,
    #[serde(deserialize_with = "agents")]
    pub author: Vec<Agent>,
    #[serde(deserialize_with = "texts")]
    pub recipe_ingredient: Vec<String>,
    /// Superseded name for `recipeIngredient`; folded into it on read.
    #[serde(deserialize_with = "texts")]
    pub ingredients: Vec<String>,
    #[serde(deserialize_with = "instructions")]
    pub recipe_instructions: Vec<String>,
    #[serde(deserialize_with = "text")]
    pub prep_time: Option<String>,
    #[serde(deserialize_with = "text")]
    pub cook_time: Option<String>,
    #[serde(deserialize_with = "text")]
    pub total_time: Option<String>,
    #[serde(deserialize_with = "text")]
    pub recipe_yield: Option<String>,
    #[serde(deserialize_with = "texts")]
    pub recipe_category: Vec<String>,
    #[serde(deserialize_with = "texts")]
    pub recipe_cuisine: Vec<String>,
    #[serde(deserialize_with = "text")]
    pub keywords: Option<String>,
    #[serde(deserialize_with = "text")]
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Article {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub headline: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "images")]
    pub image: Vec<ImageRef>,
    #[serde(deserialize_with = "agents")]
    pub author: Vec<Agent>,
    #[serde(deserialize_with = "text")]
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemList {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "values")]
    pub item_list_element: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TvSeries {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "images")]
    pub image: Vec<ImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfilePage {
    #[serde(rename = "@id", deserialize_with = "text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "agents")]
    pub main_entity: Vec<Agent>,
}

/// One typed node.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Organization(Organization),
    WebSite(WebSite),
    WebPage(WebPage),
    ImageObject(ImageObject),
    VideoObject(VideoObject),
    Person(Person),
    Recipe(Box<Recipe>),
    Article(Article),
    ItemList(ItemList),
    TvSeries(TvSeries),
    ProfilePage(ProfilePage),
}

impl SchemaNode {
    pub fn from_object(schema_type: SchemaType, obj: &JsonObject) -> serde_json::Result<Self> {
        let v = Value::Object(obj.clone());
        Ok(match schema_type {
            SchemaType::Organization => SchemaNode::Organization(serde_json::from_value(v)?),
            SchemaType::WebSite => SchemaNode::WebSite(serde_json::from_value(v)?),
            SchemaType::WebPage => SchemaNode::WebPage(serde_json::from_value(v)?),
            SchemaType::ImageObject => SchemaNode::ImageObject(serde_json::from_value(v)?),
            SchemaType::VideoObject => SchemaNode::VideoObject(serde_json::from_value(v)?),
            SchemaType::Person => SchemaNode::Person(serde_json::from_value(v)?),
            SchemaType::Recipe => {
                let mut recipe: Recipe = serde_json::from_value(v)?;
                if recipe.recipe_ingredient.is_empty() {
                    recipe.recipe_ingredient = std::mem::take(&mut recipe.ingredients);
                }
                SchemaNode::Recipe(Box::new(recipe))
            }
            SchemaType::Article => SchemaNode::Article(serde_json::from_value(v)?),
            SchemaType::ItemList => SchemaNode::ItemList(serde_json::from_value(v)?),
            SchemaType::TVSeries => SchemaNode::TvSeries(serde_json::from_value(v)?),
            SchemaType::ProfilePage => SchemaNode::ProfilePage(serde_json::from_value(v)?),
        })
    }
}
