//! Lexical parsing of filter and sort keys. Does not consult the schema.
//!
//! `members___user___email__ilike` is relation path `[members, user]`,
//! attribute `email`, operator `ilike`. A leading `-` on a sort key means
//! descending.

use crate::error::AppError;
use crate::filter::operators::{resolve, Operator};
use serde_json::Value;

pub const RELATION_SEPARATOR: &str = "___";
pub const OPERATOR_SEPARATOR: &str = "__";
pub const DESC_PREFIX: char = '-';

/// Ordered filter mapping as received from a caller.
pub type Filters = Vec<(String, Value)>;

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedFilter {
    pub path: Vec<String>,
    pub attribute: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub path: Vec<String>,
    pub attribute: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(attribute: &str) -> Self {
        SortKey {
            path: Vec::new(),
            attribute: attribute.to_string(),
            descending: false,
        }
    }

    pub fn desc(attribute: &str) -> Self {
        SortKey {
            descending: true,
            ..SortKey::asc(attribute)
        }
    }
}

/// Drop entries whose value is null.
pub fn normalize_filters<I, K>(entries: I) -> Filters
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.into(), v))
        .collect()
}

fn split_path(key: &str) -> (Vec<String>, &str) {
    match key.rsplit_once(RELATION_SEPARATOR) {
        Some((path, tail)) => (
            path.split(RELATION_SEPARATOR).map(str::to_string).collect(),
            tail,
        ),
        None => (Vec::new(), key),
    }
}

pub fn parse_filter_key(key: &str) -> Result<(Vec<String>, String, Operator), AppError> {
    let (path, tail) = split_path(key);
    let (attribute, operator) = match tail.rsplit_once(OPERATOR_SEPARATOR) {
        Some((attribute, token)) => (attribute, resolve(token)?),
        None => (tail, Operator::Exact),
    };
    if attribute.is_empty() || path.iter().any(|s| s.is_empty()) {
        return Err(AppError::BadRequest(format!("malformed filter key `{}`", key)));
    }
    Ok((path, attribute.to_string(), operator))
}

pub fn parse_filters(filters: &[(String, Value)]) -> Result<Vec<ParsedFilter>, AppError> {
    filters
        .iter()
        .map(|(key, value)| {
            let (path, attribute, operator) = parse_filter_key(key)?;
            Ok(ParsedFilter {
                path,
                attribute,
                operator,
                value: value.clone(),
            })
        })
        .collect()
}

pub fn parse_sort(key: &str) -> Result<SortKey, AppError> {
    let key = key.trim();
    let (descending, rest) = match key.strip_prefix(DESC_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, key),
    };
    let (path, attribute) = split_path(rest);
    if attribute.is_empty() || path.iter().any(|s| s.is_empty()) {
        return Err(AppError::BadRequest(format!("malformed sort key `{}`", key)));
    }
    Ok(SortKey {
        path,
        attribute: attribute.to_string(),
        descending,
    })
}

/// Comma separated sort keys, e.g. `-created_at,owner___name`.
pub fn parse_sort_list(raw: &str) -> Result<Vec<SortKey>, AppError> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_sort)
        .collect()
}
