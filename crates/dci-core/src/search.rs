//! Structured search over job configuration documents.
//!
//! A search body carries top-level equality filters on job columns plus a
//! `configuration` object of dotted-path predicates:
//!
//! ```json
//! {"jobdefinition_id": "...", "configuration": {"_op": "or", "type.hw": "baremetal"}}
//! ```
//!
//! Paths descend through objects by key and through arrays by numeric index.
//! Values match by exact JSON equality.

use serde_json::{Value, json};

use crate::query::WhereFilter;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoolOp {
    #[default]
    And,
    Or,
}

impl BoolOp {
    fn parse(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some("and") => Ok(Self::And),
            Some("or") => Ok(Self::Or),
            _ => Err(Error::bad_request_with(
                format!("Invalid _op: {}", value),
                json!({ "error": "_op must be one of \"and\", \"or\"" }),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPredicate {
    pub path: Vec<String>,
    pub expected: Value,
}

impl PathPredicate {
    pub fn matches(&self, doc: &Value) -> bool {
        lookup(doc, &self.path) == Some(&self.expected)
    }
}

/// Dotted-path predicates joined by one boolean operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigQuery {
    pub op: BoolOp,
    pub predicates: Vec<PathPredicate>,
}

impl ConfigQuery {
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::bad_request_with(
                "Invalid configuration filter",
                json!({ "error": "configuration must be an object" }),
            ));
        };

        let mut query = ConfigQuery::default();
        for (key, expected) in map {
            if key == "_op" {
                query.op = BoolOp::parse(expected)?;
                continue;
            }
            let path: Vec<String> = key.split('.').map(str::to_string).collect();
            if path.iter().any(String::is_empty) {
                return Err(Error::bad_request_with(
                    format!("Invalid configuration path: \"{}\"", key),
                    json!({ "error": "paths are dot-separated non-empty keys" }),
                ));
            }
            query.predicates.push(PathPredicate {
                path,
                expected: expected.clone(),
            });
        }
        Ok(query)
    }

    /// An empty predicate set matches every document.
    pub fn matches(&self, doc: &Value) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        match self.op {
            BoolOp::And => self.predicates.iter().all(|p| p.matches(doc)),
            BoolOp::Or => self.predicates.iter().any(|p| p.matches(doc)),
        }
    }
}

/// Resolve `path` inside `doc`.
pub fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    let Some((head, rest)) = path.split_first() else {
        return Some(doc);
    };
    let child = match doc {
        Value::Object(map) => map.get(head),
        Value::Array(items) => head.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    lookup(child, rest)
}

/// A parsed `POST /jobs/search` body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub filters: Vec<WhereFilter>,
    pub configuration: ConfigQuery,
}

impl SearchQuery {
    pub fn from_json(body: &Value, columns: &[&'static str]) -> Result<Self> {
        let Value::Object(map) = body else {
            return Err(Error::bad_request_with(
                "Invalid search body",
                json!({ "error": "search body must be a JSON object" }),
            ));
        };

        let mut query = SearchQuery::default();
        for (key, value) in map {
            if key == "configuration" {
                query.configuration = ConfigQuery::from_json(value)?;
                continue;
            }
            let column = columns.iter().copied().find(|c| *c == key).ok_or_else(|| {
                Error::bad_request_with(
                    format!("Invalid search key: \"{}\"", key),
                    json!({ "valid_keys": columns }),
                )
            })?;
            query.filters.push(WhereFilter {
                column,
                value: scalar_to_string(key, value)?,
            });
        }
        Ok(query)
    }
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::bad_request_with(
            format!("Invalid search value for \"{}\"", key),
            json!({ "error": "top-level filters take scalar values" }),
        )),
    }
}
