//! List query parsing.
//!
//! Raw `limit`, `offset`, `sort`, `where` and `embed` query parameters are
//! validated against a fixed column allow-list before any storage access.

use serde::Deserialize;
use serde_json::json;

use crate::{Error, Result};

/// Job columns accepted by `sort` and `where`.
pub const JOB_COLUMNS: &[&str] = &[
    "id",
    "status",
    "comment",
    "recheck",
    "jobdefinition_id",
    "team_id",
    "remoteci_id",
    "user_agent",
    "client_version",
    "created_at",
    "updated_at",
    "etag",
];

/// Raw list parameters as they appear in the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<String>,
    #[serde(rename = "where")]
    pub where_: Option<String>,
    pub embed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereFilter {
    pub column: &'static str,
    pub value: String,
}

/// Related entities that can be inlined into a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Embed {
    Team,
    Remoteci,
    Jobdefinition,
}

impl Embed {
    pub const ALL: [Embed; 3] = [Embed::Team, Embed::Remoteci, Embed::Jobdefinition];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Remoteci => "remoteci",
            Self::Jobdefinition => "jobdefinition",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

/// Validated list parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: i64,
    pub sort: Vec<SortKey>,
    pub filters: Vec<WhereFilter>,
    pub embed: Vec<Embed>,
}

impl ListParams {
    pub fn parse(query: &ListQuery, columns: &[&'static str]) -> Result<Self> {
        let limit = match query.limit {
            Some(l) if l < 0 => {
                return Err(Error::bad_request(format!("Invalid limit: {}", l)));
            }
            other => other,
        };
        let offset = match query.offset {
            Some(o) if o < 0 => {
                return Err(Error::bad_request(format!("Invalid offset: {}", o)));
            }
            Some(o) => o,
            None => 0,
        };

        Ok(Self {
            limit,
            offset,
            sort: parse_sort(query.sort.as_deref(), columns)?,
            filters: parse_where(query.where_.as_deref(), columns)?,
            embed: parse_embed(query.embed.as_deref())?,
        })
    }
}

fn lookup_column(columns: &[&'static str], name: &str) -> Option<&'static str> {
    columns.iter().copied().find(|c| *c == name)
}

/// Parse `sort=a,-b`. A leading `-` sorts descending.
pub fn parse_sort(raw: Option<&str>, columns: &[&'static str]) -> Result<Vec<SortKey>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut keys = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, descending) = match part.strip_prefix('-') {
            Some(name) => (name, true),
            None => (part, false),
        };
        let column = lookup_column(columns, name).ok_or_else(|| {
            Error::bad_request_with(
                format!("Invalid sort key: \"{}\"", name),
                json!({ "Valid elements": columns }),
            )
        })?;
        keys.push(SortKey { column, descending });
    }
    Ok(keys)
}

/// Parse `where=key:value,key2:value2`. Each element splits on its first `:`.
pub fn parse_where(raw: Option<&str>, columns: &[&'static str]) -> Result<Vec<WhereFilter>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut filters = Vec::new();
    for part in raw.split(',').filter(|p| !p.is_empty()) {
        let Some((name, value)) = part.split_once(':') else {
            return Err(Error::bad_request_with(
                format!("Invalid where key: \"{}\"", part),
                json!({ "error": "where key must have the following form \"key:value\"" }),
            ));
        };
        let column = lookup_column(columns, name).ok_or_else(|| {
            Error::bad_request_with(
                format!("Invalid where key: \"{}\"", name),
                json!({ "valid_keys": columns }),
            )
        })?;
        filters.push(WhereFilter {
            column,
            value: value.to_string(),
        });
    }
    Ok(filters)
}

/// Parse `embed=team,remoteci`.
pub fn parse_embed(raw: Option<&str>) -> Result<Vec<Embed>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut embeds: Vec<Embed> = Vec::new();
    for name in raw.split(',') {
        match Embed::parse(name) {
            Some(embed) if !embeds.contains(&embed) => embeds.push(embed),
            Some(_) => {}
            None => {
                let valid: Vec<&str> = Embed::ALL.iter().map(Embed::as_str).collect();
                return Err(Error::bad_request_with(
                    format!("Invalid embed list: '{}'", raw),
                    json!({ "Valid elements": valid }),
                ));
            }
        }
    }
    Ok(embeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> ListQuery {
        ListQuery::default()
    }

    #[test]
    fn test_defaults() {
        let params = ListParams::parse(&query(), JOB_COLUMNS).unwrap();
        assert_eq!(params, ListParams::default());
    }

    #[test]
    fn test_where_without_value_is_rejected() {
        let q = ListQuery {
            where_: Some("id".into()),
            ..query()
        };
        match ListParams::parse(&q, JOB_COLUMNS).unwrap_err() {
            Error::BadRequest { message, payload } => {
                assert_eq!(message, "Invalid where key: \"id\"");
                assert_eq!(
                    payload.unwrap(),
                    json!({ "error": "where key must have the following form \"key:value\"" })
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_where_unknown_column_is_rejected() {
        let err = parse_where(Some("configuration:x"), JOB_COLUMNS).unwrap_err();
        assert!(matches!(err, Error::BadRequest { message, .. } if message == "Invalid where key: \"configuration\""));
    }

    #[test]
    fn test_where_value_keeps_colons() {
        let filters = parse_where(Some("comment:a:b,status:new"), JOB_COLUMNS).unwrap();
        assert_eq!(
            filters,
            vec![
                WhereFilter {
                    column: "comment",
                    value: "a:b".into()
                },
                WhereFilter {
                    column: "status",
                    value: "new".into()
                },
            ]
        );
    }

    #[test]
    fn test_sort_direction() {
        let keys = parse_sort(Some("-created_at,status"), JOB_COLUMNS).unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey {
                    column: "created_at",
                    descending: true
                },
                SortKey {
                    column: "status",
                    descending: false
                },
            ]
        );
        assert!(parse_sort(Some("-nope"), JOB_COLUMNS).is_err());
    }

    #[test]
    fn test_embed_parsing() {
        assert_eq!(
            parse_embed(Some("team,remoteci,team")).unwrap(),
            vec![Embed::Team, Embed::Remoteci]
        );
        assert!(parse_embed(Some("")).unwrap().is_empty());
        match parse_embed(Some("team,mdr")).unwrap_err() {
            Error::BadRequest { message, payload } => {
                assert_eq!(message, "Invalid embed list: 'team,mdr'");
                assert_eq!(
                    payload.unwrap()["Valid elements"],
                    json!(["team", "remoteci", "jobdefinition"])
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_pagination_is_rejected() {
        let q = ListQuery {
            offset: Some(-1),
            ..query()
        };
        assert!(ListParams::parse(&q, JOB_COLUMNS).is_err());
    }
}
