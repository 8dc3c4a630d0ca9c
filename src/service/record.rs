//! Loaded rows, their eagerly loaded relationships, and update diffs.

use crate::config::PRIMARY_KEY;
use crate::error::AppError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Column name to JSON value, as decoded from a row or received in a payload.
pub type Values = serde_json::Map<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// One row of an entity plus the relationships its Load Plan fetched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    values: Values,
    related: BTreeMap<String, Related>,
}

impl Record {
    pub fn new(values: Values) -> Self {
        Record {
            values,
            related: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.values
            .get(PRIMARY_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// A loaded relationship. Relationships outside the query's Load Plan are
    /// an error, never fetched lazily.
    pub fn related(&self, name: &str) -> Result<&Related, AppError> {
        self.related.get(name).ok_or_else(|| AppError::NotLoaded {
            relation: name.to_string(),
        })
    }

    pub fn one(&self, name: &str) -> Result<Option<&Record>, AppError> {
        match self.related(name)? {
            Related::One(r) => Ok(r.as_deref()),
            Related::Many(_) => Err(AppError::BadRequest(format!("`{}` is a to-many relationship", name))),
        }
    }

    pub fn many(&self, name: &str) -> Result<&[Record], AppError> {
        match self.related(name)? {
            Related::Many(rs) => Ok(rs),
            Related::One(_) => Err(AppError::BadRequest(format!("`{}` is a to-one relationship", name))),
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.related.contains_key(name)
    }

    pub(crate) fn set_related(&mut self, name: &str, related: Related) {
        self.related.insert(name.to_string(), related);
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + self.related.len()))?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        for (k, rel) in &self.related {
            match rel {
                Related::One(r) => map.serialize_entry(k, &r.as_deref())?,
                Related::Many(rs) => map.serialize_entry(k, rs)?,
            }
        }
        map.end()
    }
}

/// Relationships a read fetches eagerly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadPlan {
    relations: BTreeSet<String>,
}

impl LoadPlan {
    pub fn new() -> Self {
        LoadPlan::default()
    }

    pub fn with(mut self, relation: &str) -> Self {
        self.relations.insert(relation.to_string());
        self
    }

    pub fn insert(&mut self, relation: &str) {
        self.relations.insert(relation.to_string());
    }

    pub fn remove(&mut self, relation: &str) {
        self.relations.remove(relation);
    }

    pub fn contains(&self, relation: &str) -> bool {
        self.relations.contains(relation)
    }

    pub fn merge(&mut self, other: &LoadPlan) {
        self.relations.extend(other.relations.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ChangedField {
    pub before: Value,
    pub after: Value,
}

/// Fields an update actually changes, with their before/after values.
pub type ChangedFields = BTreeMap<String, ChangedField>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => Record::new(m),
            _ => unreachable!(),
        }
    }

    #[test]
    fn unplanned_relationship_is_not_loaded() {
        let r = record(json!({ "id": "p1", "name": "Acme" }));
        assert_eq!(r.id(), "p1");
        match r.related("owner") {
            Err(AppError::NotLoaded { relation }) => assert_eq!(relation, "owner"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn loaded_relations_serialize_inline() {
        let mut r = record(json!({ "id": "p1" }));
        r.set_related("owner", Related::One(Some(Box::new(record(json!({ "id": "u1" }))))));
        r.set_related("members", Related::Many(vec![]));
        assert_eq!(r.one("owner").unwrap().unwrap().id(), "u1");
        assert!(r.many("members").unwrap().is_empty());
        assert_eq!(
            r.to_json(),
            json!({ "id": "p1", "members": [], "owner": { "id": "u1" } })
        );
    }

    #[test]
    fn load_plan_merges() {
        let mut plan = LoadPlan::new().with("owner");
        plan.merge(&LoadPlan::new().with("members").with("owner"));
        assert_eq!(plan.iter().collect::<Vec<_>>(), vec!["members", "owner"]);
    }
}
