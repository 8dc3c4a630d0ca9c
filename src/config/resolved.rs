//! Resolved entity model: config validated and flattened for runtime use.

use crate::config::{ColumnDefaultConfig, RelationKind, ScalarType};
use crate::error::AppError;
use crate::service::TransitionGraph;
use std::collections::HashMap;
use std::sync::Arc;

/// Implicit primary key column on every entity.
pub const PRIMARY_KEY: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub scalar: ScalarType,
    pub nullable: bool,
    pub unique: bool,
    /// DB default (DDL literal or expression); when set, inserts may omit the column.
    pub default: Option<ColumnDefaultConfig>,
    /// Not accepted from create/update payloads (pk, timestamps, derived columns).
    pub read_only: bool,
}

impl ColumnInfo {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_search_vector(&self) -> bool {
        self.scalar == ScalarType::SearchVector
    }
}

/// A declared relationship. Join condition: `related.remote_column = owner.local_column`.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipInfo {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// Column on the owning entity (our FK for many_to_one, our pk for one_to_many).
    pub local_column: String,
    /// Column on the related entity (their pk for many_to_one, their FK for one_to_many).
    pub remote_column: String,
    pub on_delete: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SearchVectorInfo {
    pub name: String,
    pub indexed_columns: Vec<String>,
    pub config: String,
}

#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub primary_key: String,
    pub columns: Vec<ColumnInfo>,
    pub relationships: Vec<RelationshipInfo>,
    pub search_vectors: Vec<SearchVectorInfo>,
    pub unique: Vec<Vec<String>>,
    pub tracks_updated_at: bool,
    pub transitions: Option<TransitionGraph>,
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Scalar column usable in filters, sorts and projections (search vectors excluded).
    pub fn scalar_column(&self, name: &str) -> Result<&ColumnInfo, AppError> {
        self.column(name)
            .filter(|c| !c.is_search_vector())
            .ok_or_else(|| AppError::UnknownField {
                field: name.to_string(),
                entity: self.name.clone(),
            })
    }

    pub fn selectable_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| !c.is_search_vector())
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn is_relationship(&self, name: &str) -> bool {
        self.relationship(name).is_some()
    }

    pub fn search_vector(&self, name: &str) -> Option<&SearchVectorInfo> {
        self.search_vectors.iter().find(|v| v.name == name)
    }

    /// Column accepted from a create/update payload.
    pub fn writable_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.column(name)
            .filter(|c| !c.read_only && !c.is_search_vector() && c.name != self.primary_key)
    }

    pub fn pk_column(&self) -> &ColumnInfo {
        // resolve() always inserts the pk column first
        &self.columns[0]
    }
}

#[derive(Clone, Debug, Default)]
pub struct Schema {
    entities: Vec<Arc<EntityDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(entities: Vec<EntityDescriptor>) -> Self {
        let entities: Vec<Arc<EntityDescriptor>> = entities.into_iter().map(Arc::new).collect();
        let by_name = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Schema { entities, by_name }
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    pub fn entities(&self) -> &[Arc<EntityDescriptor>] {
        &self.entities
    }
}
