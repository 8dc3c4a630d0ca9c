//! Raw config types matching the entity schema JSON document.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Scalar column type. Drives value casting, SQL casts and row decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    #[serde(alias = "timestamp")]
    DateTime,
    Json,
    /// Full-text search vector; filled by a trigger, never written or selected directly.
    SearchVector,
}

impl ScalarType {
    /// PostgreSQL type name used in DDL and parameter casts.
    pub fn pg_type(self) -> &'static str {
        match self {
            ScalarType::Text => "text",
            ScalarType::Integer => "bigint",
            ScalarType::Float => "double precision",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
            ScalarType::DateTime => "timestamp",
            ScalarType::Json => "jsonb",
            ScalarType::SearchVector => "tsvector",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// We hold the foreign key (e.g. partners.owner_id -> users.id).
    ManyToOne,
    /// They hold the foreign key (e.g. partner_members.partner_id -> partners.id).
    OneToMany,
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(String),
    Expression { expression: String },
}

impl ColumnDefaultConfig {
    pub fn sql(&self) -> &str {
        match self {
            ColumnDefaultConfig::Literal(s) => s,
            ColumnDefaultConfig::Expression { expression } => expression,
        }
    }
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(s) => Ok(ColumnDefaultConfig::Literal(s)),
            serde_json::Value::Bool(b) => Ok(ColumnDefaultConfig::Literal(b.to_string())),
            serde_json::Value::Number(n) => Ok(ColumnDefaultConfig::Literal(n.to_string())),
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a literal or {{ \"expression\": \"...\" }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Err(serde::de::Error::custom(format!(
                "column default must be a literal or {{ \"expression\": \"...\" }}; got {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ScalarType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    /// Derived column: never accepted from create/update payloads.
    #[serde(default)]
    pub read_only: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub kind: RelationKind,
    /// Name of the related entity.
    pub target: String,
    /// Foreign key column: ours for many_to_one (default `<name>_id`), theirs for one_to_many.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub on_delete: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchVectorConfig {
    pub name: String,
    /// Text columns folded into the vector, in order.
    pub columns: Vec<String>,
    /// Text-search configuration (regconfig). Default `simple`.
    #[serde(default)]
    pub config: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub key: String,
    pub graph: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    /// Table name; defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub search_vectors: Vec<SearchVectorConfig>,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default = "default_true")]
    pub track_updated_at: bool,
    #[serde(default)]
    pub transitions: Option<TransitionConfig>,
}

/// One schema document: a PostgreSQL schema name plus its entities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(default = "default_schema_name")]
    pub schema: String,
    pub entities: Vec<EntityConfig>,
}

fn default_schema_name() -> String {
    "public".into()
}
