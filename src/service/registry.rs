//! One [`Dao`] per entity, with hooks and default load plans attached at startup.

use crate::config::Schema;
use crate::error::ConfigError;
use crate::service::crud::Dao;
use crate::service::hooks::EntityHooks;
use crate::service::record::LoadPlan;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Registry {
    schema: Arc<Schema>,
    daos: HashMap<String, Dao>,
}

impl Registry {
    /// Every entity with no hooks and an empty load plan.
    pub fn new(schema: Arc<Schema>) -> Self {
        let daos = schema
            .entities()
            .iter()
            .map(|e| (e.name.clone(), Dao::new(schema.clone(), e.clone())))
            .collect();
        Registry { schema, daos }
    }

    pub fn builder(schema: Arc<Schema>) -> RegistryBuilder {
        RegistryBuilder {
            schema,
            hooks: HashMap::new(),
            load_plans: HashMap::new(),
        }
    }

    pub fn dao(&self, entity: &str) -> Option<&Dao> {
        self.daos.get(entity)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

pub struct RegistryBuilder {
    schema: Arc<Schema>,
    hooks: HashMap<String, Arc<dyn EntityHooks>>,
    load_plans: HashMap<String, LoadPlan>,
}

impl RegistryBuilder {
    pub fn with_hooks(mut self, entity: &str, hooks: impl EntityHooks + 'static) -> Self {
        self.hooks.insert(entity.to_string(), Arc::new(hooks));
        self
    }

    pub fn with_load_plan(mut self, entity: &str, plan: LoadPlan) -> Self {
        self.load_plans.insert(entity.to_string(), plan);
        self
    }

    /// Fails when hooks or load plans name an unknown entity or relationship.
    pub fn build(self) -> Result<Registry, ConfigError> {
        let mut registry = Registry::new(self.schema.clone());
        for (name, hooks) in self.hooks {
            let dao = registry.daos.remove(&name).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: name.clone(),
            })?;
            registry.daos.insert(name, dao.with_hooks(hooks));
        }
        for (name, plan) in self.load_plans {
            let dao = registry.daos.remove(&name).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: name.clone(),
            })?;
            if let Some(missing) = plan.iter().find(|r| !dao.entity().is_relationship(r)) {
                return Err(ConfigError::MissingReference {
                    kind: "relationship",
                    id: format!("{}.{}", name, missing),
                });
            }
            registry.daos.insert(name, dao.with_load_plan(plan));
        }
        tracing::debug!(entities = registry.daos.len(), "registry built");
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_schema;
    use crate::service::NoHooks;

    #[test]
    fn every_entity_gets_a_dao() {
        let registry = Registry::new(Arc::new(fixture_schema()));
        for name in ["users", "partners", "partner_members", "auth_tokens"] {
            assert_eq!(registry.dao(name).map(|d| d.name()), Some(name));
        }
        assert!(registry.dao("widgets").is_none());
    }

    #[test]
    fn unknown_names_fail_the_build() {
        let schema = Arc::new(fixture_schema());
        assert!(Registry::builder(schema.clone()).with_hooks("widgets", NoHooks).build().is_err());
        assert!(Registry::builder(schema.clone())
            .with_load_plan("partners", LoadPlan::new().with("owner").with("auditor"))
            .build()
            .is_err());
        assert!(Registry::builder(schema)
            .with_load_plan("partners", LoadPlan::new().with("owner"))
            .build()
            .is_ok());
    }
}
