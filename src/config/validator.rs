//! Config validation: identifier syntax and referential integrity.

use crate::config::{RelationKind, ScalarType, SchemaFile, CREATED_AT, PRIMARY_KEY, UPDATED_AT};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Referential actions accepted for `on_delete`; rendered verbatim into DDL.
const ON_DELETE_ACTIONS: &[&str] = &["CASCADE", "SET NULL", "RESTRICT", "NO ACTION"];

/// Lowercase SQL identifier without `__`, so filter keys stay unambiguous.
fn check_identifier(kind: &str, name: &str) -> Result<(), ConfigError> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let re = IDENT.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("static regex"));
    if !re.is_match(name) || name.contains("__") || name.ends_with('_') {
        return Err(ConfigError::InvalidIdentifier(format!("{} `{}`", kind, name)));
    }
    Ok(())
}

pub fn validate(file: &SchemaFile) -> Result<(), ConfigError> {
    check_identifier("schema", &file.schema)?;

    let mut columns_by_entity: HashMap<&str, HashMap<&str, ScalarType>> = HashMap::new();
    for e in &file.entities {
        check_identifier("entity", &e.name)?;
        if let Some(table) = &e.table {
            check_identifier("table", table)?;
        }
        if columns_by_entity.contains_key(e.name.as_str()) {
            return Err(ConfigError::Duplicate {
                kind: "entity",
                name: e.name.clone(),
            });
        }
        let mut cols = HashMap::new();
        for c in &e.columns {
            check_identifier("column", &c.name)?;
            if c.type_ == ScalarType::SearchVector {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: declare search vectors under `search_vectors`",
                    e.name, c.name
                )));
            }
            if cols.insert(c.name.as_str(), c.type_).is_some() {
                return Err(ConfigError::Duplicate {
                    kind: "column",
                    name: format!("{}.{}", e.name, c.name),
                });
            }
        }
        if cols.contains_key(PRIMARY_KEY) {
            return Err(ConfigError::Validation(format!(
                "{}: `{}` is implicit and must not be declared",
                e.name, PRIMARY_KEY
            )));
        }
        for implicit in [CREATED_AT, UPDATED_AT] {
            cols.entry(implicit).or_insert(ScalarType::DateTime);
        }
        cols.insert(PRIMARY_KEY, ScalarType::Text);
        for v in &e.search_vectors {
            check_identifier("search vector", &v.name)?;
            if cols.insert(v.name.as_str(), ScalarType::SearchVector).is_some() {
                return Err(ConfigError::Duplicate {
                    kind: "column",
                    name: format!("{}.{}", e.name, v.name),
                });
            }
        }
        columns_by_entity.insert(e.name.as_str(), cols);
    }

    for e in &file.entities {
        let cols = &columns_by_entity[e.name.as_str()];
        let mut rel_names = HashSet::new();
        for r in &e.relationships {
            check_identifier("relationship", &r.name)?;
            if !rel_names.insert(r.name.as_str()) || cols.contains_key(r.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "relationship",
                    name: format!("{}.{}", e.name, r.name),
                });
            }
            let target_cols = columns_by_entity
                .get(r.target.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "entity",
                    id: format!("{} (relationship {}.{})", r.target, e.name, r.name),
                })?;
            let (holder, fk_cols) = match r.kind {
                RelationKind::ManyToOne => (&e.name, cols),
                RelationKind::OneToMany => (&r.target, target_cols),
            };
            let fk = match (&r.column, r.kind) {
                (Some(c), _) => c.clone(),
                (None, RelationKind::ManyToOne) => format!("{}_id", r.name),
                (None, RelationKind::OneToMany) => {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: one_to_many relationship requires `column`",
                        e.name, r.name
                    )))
                }
            };
            if !fk_cols.contains_key(fk.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", holder, fk),
                });
            }
            if let Some(action) = &r.on_delete {
                if !ON_DELETE_ACTIONS.contains(&action.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: unsupported on_delete `{}`",
                        e.name, r.name, action
                    )));
                }
            }
        }

        for v in &e.search_vectors {
            if v.columns.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: search vector needs at least one column",
                    e.name, v.name
                )));
            }
            for c in &v.columns {
                match cols.get(c.as_str()) {
                    Some(ScalarType::Text) => {}
                    Some(_) => {
                        return Err(ConfigError::Validation(format!(
                            "{}.{}: indexed column `{}` must be text",
                            e.name, v.name, c
                        )))
                    }
                    None => {
                        return Err(ConfigError::MissingReference {
                            kind: "column",
                            id: format!("{}.{}", e.name, c),
                        })
                    }
                }
            }
            if let Some(cfg) = &v.config {
                check_identifier("search config", cfg)?;
            }
        }

        for group in &e.unique {
            for c in group {
                if !cols.contains_key(c.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "column",
                        id: format!("{}.{}", e.name, c),
                    });
                }
            }
        }

        if let Some(t) = &e.transitions {
            if !cols.contains_key(t.key.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{} (transition key)", e.name, t.key),
                });
            }
        }
    }

    Ok(())
}
