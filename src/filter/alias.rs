//! Relationship alias resolution: one joined alias per distinct relationship path.

use crate::config::{EntityDescriptor, RelationKind, RelationshipInfo, Schema};
use crate::error::{AppError, ConfigError};
use crate::filter::keys::RELATION_SEPARATOR;
use std::collections::BTreeMap;

/// Alias of the root entity in every composed query.
pub const ROOT_ALIAS: &str = "root";

#[derive(Clone, Debug, PartialEq)]
pub struct AliasEntry {
    pub alias: String,
    /// Name of the joined (related) entity.
    pub entity: String,
    pub relationship: RelationshipInfo,
    /// Alias the relationship is declared on (`root` or another join).
    pub parent_alias: String,
}

/// Joins keyed by full relationship path. Iteration order puts every path
/// after its prefixes, so joins can be emitted in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AliasPlan {
    entries: BTreeMap<String, AliasEntry>,
}

impl AliasPlan {
    pub fn get(&self, path: &[String]) -> Option<&AliasEntry> {
        self.entries.get(&path.join(RELATION_SEPARATOR))
    }

    pub fn entries(&self) -> impl Iterator<Item = &AliasEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any join is one-to-many, so a root row can appear more than once.
    pub fn fans_out(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.relationship.kind == RelationKind::OneToMany)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add the joins of `other` not already present. Aliases are derived from the
    /// path, so equal paths always carry equal entries.
    pub fn merge(&mut self, other: AliasPlan) {
        for (path, entry) in other.entries {
            self.entries.entry(path).or_insert(entry);
        }
    }
}

fn alias_name(path: &[String]) -> String {
    // identifiers never contain `__`, so the joined form is unambiguous
    format!("j_{}", path.join("__"))
}

/// Resolve relationship paths (from filter and sort keys) against `root`.
/// Fails with [`AppError::NoSuchRelationship`] naming the first path that
/// crosses an undeclared relationship.
pub fn resolve_aliases<'p, I>(schema: &Schema, root: &EntityDescriptor, paths: I) -> Result<AliasPlan, AppError>
where
    I: IntoIterator<Item = &'p [String]>,
{
    let mut plan = AliasPlan::default();
    let paths: Vec<&[String]> = paths.into_iter().filter(|p| !p.is_empty()).collect();
    let mut prefix = Vec::new();
    walk(schema, root, ROOT_ALIAS, &mut prefix, paths, &mut plan)?;
    Ok(plan)
}

fn walk(
    schema: &Schema,
    entity: &EntityDescriptor,
    parent_alias: &str,
    prefix: &mut Vec<String>,
    paths: Vec<&[String]>,
    plan: &mut AliasPlan,
) -> Result<(), AppError> {
    let mut groups: BTreeMap<&str, Vec<&[String]>> = BTreeMap::new();
    for path in paths {
        if let Some((first, rest)) = path.split_first() {
            groups.entry(first.as_str()).or_default().push(rest);
        }
    }

    for (segment, rests) in groups {
        prefix.push(segment.to_string());
        let relationship = entity.relationship(segment).ok_or_else(|| {
            let mut full = prefix.clone();
            full.extend(rests[0].iter().cloned());
            AppError::NoSuchRelationship {
                path: full.join(RELATION_SEPARATOR),
                entity: entity.name.clone(),
            }
        })?;
        let target = schema
            .entity(&relationship.target)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: relationship.target.clone(),
            })?;

        let alias = alias_name(prefix.as_slice());
        plan.entries
            .entry(prefix.join(RELATION_SEPARATOR))
            .or_insert_with(|| AliasEntry {
                alias: alias.clone(),
                entity: target.name.clone(),
                relationship: relationship.clone(),
                parent_alias: parent_alias.to_string(),
            });

        let deeper: Vec<&[String]> = rests.into_iter().filter(|r| !r.is_empty()).collect();
        walk(schema, target, &alias, prefix, deeper, plan)?;
        prefix.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_schema;

    fn path(s: &str) -> Vec<String> {
        s.split(RELATION_SEPARATOR).map(str::to_string).collect()
    }

    #[test]
    fn one_alias_per_distinct_prefix_in_any_order() {
        let schema = fixture_schema();
        let partners = schema.entity("partners").unwrap();
        let a = vec![path("members___user"), path("owner"), path("members"), path("members___user")];
        let mut b = a.clone();
        b.reverse();

        let plan_a = resolve_aliases(&schema, partners, a.iter().map(Vec::as_slice)).unwrap();
        let plan_b = resolve_aliases(&schema, partners, b.iter().map(Vec::as_slice)).unwrap();
        assert_eq!(plan_a, plan_b);
        assert_eq!(plan_a.len(), 3);

        let user = plan_a.get(&path("members___user")).unwrap();
        assert_eq!(user.entity, "users");
        assert_eq!(user.parent_alias, plan_a.get(&path("members")).unwrap().alias);
        assert_eq!(plan_a.get(&path("owner")).unwrap().parent_alias, ROOT_ALIAS);
    }

    #[test]
    fn prefixes_iterate_before_extensions() {
        let schema = fixture_schema();
        let partners = schema.entity("partners").unwrap();
        let paths = vec![path("members___user"), path("members___partner")];
        let plan = resolve_aliases(&schema, partners, paths.iter().map(Vec::as_slice)).unwrap();
        let aliases: Vec<&str> = plan.entries().map(|e| e.alias.as_str()).collect();
        assert_eq!(aliases[0], "j_members");
    }

    #[test]
    fn unknown_segment_names_the_path() {
        let schema = fixture_schema();
        let partners = schema.entity("partners").unwrap();
        let paths = vec![path("members___company___owner")];
        match resolve_aliases(&schema, partners, paths.iter().map(Vec::as_slice)) {
            Err(AppError::NoSuchRelationship { path, entity }) => {
                assert_eq!(path, "members___company___owner");
                assert_eq!(entity, "partner_members");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn merge_keeps_existing_entries() {
        let schema = fixture_schema();
        let partners = schema.entity("partners").unwrap();
        let p1 = vec![path("owner")];
        let p2 = vec![path("owner"), path("members")];
        let mut plan = resolve_aliases(&schema, partners, p1.iter().map(Vec::as_slice)).unwrap();
        plan.merge(resolve_aliases(&schema, partners, p2.iter().map(Vec::as_slice)).unwrap());
        assert_eq!(plan.len(), 2);
    }
}
