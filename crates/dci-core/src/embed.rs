//! Embedded resource projection.
//!
//! Related entities are flattened into the parent row as `<embed>_<column>`
//! and regrouped into nested objects. Both steps are pure functions over
//! JSON maps so the projection is independent of how rows were fetched.

use serde_json::{Map, Value};

/// Flatten `entity` into `<prefix>_<column>` keys, skipping `id`.
///
/// The parent row already carries `<prefix>_id`, which becomes the embedded
/// object's `id` after regrouping.
pub fn flatten_with_prefix(prefix: &str, entity: &Map<String, Value>) -> Map<String, Value> {
    entity
        .iter()
        .filter(|(column, _)| column.as_str() != "id")
        .map(|(column, value)| (format!("{}_{}", prefix, column), value.clone()))
        .collect()
}

/// Regroup prefixed keys of `row` into nested objects, one per embed name.
///
/// Keys not starting with any `<embed>_` prefix stay at the top level.
pub fn group_embedded(embeds: &[&str], row: Map<String, Value>) -> Map<String, Value> {
    if embeds.is_empty() {
        return row;
    }

    let mut result = Map::new();
    for (key, value) in row {
        let owner = embeds.iter().find_map(|embed| {
            key.strip_prefix(embed)
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|column| (*embed, column.to_string()))
        });
        match owner {
            Some((embed, column)) => {
                let slot = result
                    .entry(embed.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(nested) = slot {
                    nested.insert(column, value);
                }
            }
            None => {
                result.insert(key, value);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_group_embedded() {
        let row = obj(json!({
            "id": "12", "name": "lol",
            "a_id": "123", "a_name": "lol2",
            "b_id": "1234", "b_name": "lol3"
        }));
        let grouped = group_embedded(&["a", "b"], row);
        assert_eq!(
            Value::Object(grouped),
            json!({
                "id": "12", "name": "lol",
                "a": {"id": "123", "name": "lol2"},
                "b": {"id": "1234", "name": "lol3"}
            })
        );
    }

    #[test]
    fn test_no_embeds_is_identity() {
        let row = obj(json!({"id": "1", "team_id": "2"}));
        assert_eq!(group_embedded(&[], row.clone()), row);
    }

    #[test]
    fn test_flatten_then_group_replaces_foreign_key() {
        let mut job = obj(json!({"id": "j", "team_id": "t", "status": "new"}));
        let team = obj(json!({"id": "t", "name": "ops"}));
        job.extend(flatten_with_prefix("team", &team));

        let grouped = group_embedded(&["team"], job);
        assert_eq!(
            Value::Object(grouped),
            json!({"id": "j", "status": "new", "team": {"id": "t", "name": "ops"}})
        );
    }

    #[test]
    fn test_multi_underscore_prefix_is_not_split_early() {
        let row = obj(json!({"jobdefinition_id": "d", "jobdefinition_component_types": ["x"]}));
        let grouped = group_embedded(&["jobdefinition"], row);
        assert_eq!(
            Value::Object(grouped),
            json!({"jobdefinition": {"id": "d", "component_types": ["x"]}})
        );
    }
}
