use serde_json::Value;

use super::graph::{explode, JsonObject};
use crate::error::LdJsonError;

const WRAPPER_PREFIXES: &[&str] = &["/*<![CDATA[*/", "//<![CDATA[", "<![CDATA[", "<!--"];
const WRAPPER_SUFFIXES: &[&str] = &["/*]]>*/", "//]]>", "]]>", "-->"];

/// Parse one raw LD-JSON section into the JSON objects it declares.
///
/// Top-level arrays contribute each object element; every object is passed
/// through [`explode`]. Scalars and non-object array elements yield nothing.
pub fn get_json_objects_from_ld_json_section(raw: &str) -> Result<Vec<JsonObject>, LdJsonError> {
    let value: Value =
        serde_json::from_str(strip_wrappers(raw)).map_err(|source| LdJsonError::Processing {
            raw: raw.to_string(),
            source,
        })?;

    let mut objects = Vec::new();
    match value {
        Value::Object(obj) => objects.extend(explode(&obj)?),
        Value::Array(items) => {
            for item in &items {
                if let Value::Object(obj) = item {
                    objects.extend(explode(obj)?);
                }
            }
        }
        _ => {}
    }
    Ok(objects)
}

/// Some CMSes wrap script bodies in CDATA or HTML comment markers.
fn strip_wrappers(raw: &str) -> &str {
    let mut s = raw.trim();
    for p in WRAPPER_PREFIXES {
        if let Some(rest) = s.strip_prefix(p) {
            s = rest.trim_start();
            break;
        }
    }
    for p in WRAPPER_SUFFIXES {
        if let Some(rest) = s.strip_suffix(p) {
            s = rest.trim_end();
            break;
        }
    }
    s
}
