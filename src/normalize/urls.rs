use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use url::Url;

use crate::parser::graph::JsonObject;
use crate::schema::{value_text, SchemaType};

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "igshid"];

/// Raw link strings referenced by the entries of an ItemList/BreadcrumbList.
pub fn list_entry_urls(list: &JsonObject) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(elements) = list.get("itemListElement") {
        element_urls(elements, &mut out);
    }
    out
}

fn element_urls(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Array(items) => items.iter().for_each(|i| element_urls(i, out)),
        Value::Object(o) => {
            match o.get("item") {
                Some(Value::String(s)) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                Some(Value::Object(item)) => out.extend(node_url(item)),
                _ => out.extend(node_url(o)),
            }
            if let Some(nested) = o.get("itemListElement") {
                element_urls(nested, out);
            }
        }
        _ => {}
    }
}

fn node_url(o: &JsonObject) -> Option<String> {
    ["url", "@id"].iter().find_map(|k| o.get(*k).and_then(value_text))
}

/// Mine ItemList/BreadcrumbList entries of a type → objects map for crawl
/// targets. Only absolute http(s) URLs survive; anything else is dropped.
pub fn queue_urls_from_json_object_map(map: &BTreeMap<String, Vec<JsonObject>>) -> BTreeSet<Url> {
    map.iter()
        .filter(|(declared, _)| SchemaType::from_declared(declared) == Some(SchemaType::ItemList))
        .flat_map(|(_, lists)| lists.iter())
        .flat_map(list_entry_urls)
        .filter_map(|raw| Url::parse(&raw).ok())
        .filter(is_http)
        .map(clean_url)
        .collect()
}

pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}

/// Drop the fragment and well-known tracking query parameters.
pub fn clean_url(mut url: Url) -> Url {
    url.set_fragment(None);
    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }
    url
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Resolve a possibly relative or protocol-relative reference against the
/// page it came from. Anything with whitespace or a non-http(s) scheme
/// yields `None`, as does a relative reference without a base.
pub fn resolve_url(base: Option<&Url>, raw: Option<&str>) -> Option<Url> {
    let raw = raw?.trim();
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return None;
    }
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    is_http(&url).then_some(url)
}
