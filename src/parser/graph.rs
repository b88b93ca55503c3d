use std::collections::VecDeque;

use serde_json::{Map, Value};

use crate::error::LdJsonError;

pub type JsonObject = Map<String, Value>;

const GRAPH_KEY: &str = "@graph";

/// Flatten an `@graph`-shaped object into its member objects.
///
/// An object without `@graph` comes back as `[object]`. Members are expanded
/// breadth-first, so a member that is itself graph-shaped is replaced by its
/// own members (appended after the current level). Non-object members are
/// dropped. The input is never mutated.
pub fn explode(object: &JsonObject) -> Result<Vec<JsonObject>, LdJsonError> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([object.clone()]);

    while let Some(current) = queue.pop_front() {
        match current.get(GRAPH_KEY) {
            None => out.push(current),
            Some(Value::Array(members)) => {
                queue.extend(members.iter().filter_map(|m| m.as_object().cloned()));
            }
            Some(_) => {
                return Err(LdJsonError::GraphShape {
                    object: Value::Object(current),
                })
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> JsonObject {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn no_graph_returns_object_unchanged() {
        let input = obj(json!({"@type": "Recipe", "name": "Soup"}));
        let before = input.clone();
        let out = explode(&input).unwrap();
        assert_eq!(out, vec![before.clone()]);
        assert_eq!(input, before);
    }

    #[test]
    fn graph_members_in_order() {
        let input = obj(json!({
            "@context": "https://schema.org",
            "@graph": [{"@id": "A"}, {"@id": "B"}, {"@id": "C"}]
        }));
        let ids: Vec<_> = explode(&input)
            .unwrap()
            .iter()
            .map(|o| o["@id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["A", "B", "C"]);
    }

    #[test]
    fn graph_not_an_array_fails() {
        let input = obj(json!({"@graph": "not-an-array"}));
        match explode(&input) {
            Err(LdJsonError::GraphShape { object }) => {
                assert_eq!(object["@graph"], "not-an-array");
            }
            other => panic!("expected graph-shape error, got {other:?}"),
        }
    }

    #[test]
    fn non_object_members_dropped() {
        let input = obj(json!({"@graph": [1, "x", null, {"@id": "A"}]}));
        let out = explode(&input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["@id"], "A");
    }

    #[test]
    fn nested_graph_expanded_breadth_first() {
        let input = obj(json!({"@graph": [
            {"@id": "A"},
            {"@graph": [{"@id": "B1"}, {"@id": "B2"}]},
            {"@id": "C"}
        ]}));
        let ids: Vec<_> = explode(&input)
            .unwrap()
            .iter()
            .map(|o| o["@id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["A", "C", "B1", "B2"]);
    }
}
