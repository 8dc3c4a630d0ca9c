//! Business rules for partners.

use async_trait::async_trait;
use partnerbase::service::{ChangedFields, Dao, EntityHooks, Record, Values};
use partnerbase::sql::entity_table;
use partnerbase::{AppError, ConfigError, Schema};
use serde_json::{json, Value};
use sqlx::PgConnection;
use std::sync::Arc;

pub const PARTNER_ADMIN: &str = "PARTNER_ADMIN";

/// Partner names are unique case-insensitively; the owner becomes the first
/// member with the admin role.
pub struct PartnerHooks {
    partners_table: String,
    members: Dao,
}

impl PartnerHooks {
    pub fn new(schema: &Arc<Schema>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| {
            schema.entity(name).cloned().ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: name.to_string(),
            })
        };
        let partners = lookup("partners")?;
        let members = lookup("partner_members")?;
        Ok(PartnerHooks {
            partners_table: entity_table(&partners),
            members: Dao::new(schema.clone(), members),
        })
    }

    async fn ensure_unique_name(&self, conn: &mut PgConnection, name: &str, except_id: &str) -> Result<(), AppError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE lower(\"name\") = lower($1) AND \"id\" <> $2) AS \"exists\"",
            self.partners_table
        );
        tracing::debug!(sql = %sql, "query");
        let (taken,): (bool,) = sqlx::query_as(&sql)
            .bind(name)
            .bind(except_id)
            .fetch_one(&mut *conn)
            .await?;
        if taken {
            return Err(AppError::rule("partners", "Partner with such details already exists"));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityHooks for PartnerHooks {
    async fn on_pre_create(
        &self,
        conn: &mut PgConnection,
        id: &str,
        values: &mut Values,
        _input: &Values,
    ) -> Result<(), AppError> {
        if let Some(name) = values.get("name").and_then(Value::as_str) {
            let name = name.trim().to_string();
            self.ensure_unique_name(conn, &name, id).await?;
            values.insert("name".into(), Value::String(name));
        }
        Ok(())
    }

    async fn on_post_create(&self, conn: &mut PgConnection, record: &Record) -> Result<(), AppError> {
        let Some(owner) = record.get("owner_id").and_then(Value::as_str) else {
            return Ok(());
        };
        let mut membership = Values::new();
        membership.insert("partner_id".into(), json!(record.id()));
        membership.insert("user_id".into(), json!(owner));
        membership.insert("role".into(), json!(PARTNER_ADMIN));
        self.members.create(conn, membership).await?;
        tracing::info!(partner = %record.id(), owner = %owner, "owner added as partner admin");
        Ok(())
    }

    async fn on_pre_update(
        &self,
        conn: &mut PgConnection,
        current: &Record,
        values: &mut Values,
        _input: &Values,
    ) -> Result<(), AppError> {
        if let Some(name) = values.get("name").and_then(Value::as_str) {
            self.ensure_unique_name(conn, name, current.id()).await?;
        }
        Ok(())
    }

    async fn on_post_update(
        &self,
        _conn: &mut PgConnection,
        record: &Record,
        changed: &ChangedFields,
    ) -> Result<(), AppError> {
        if let Some(status) = changed.get("status") {
            tracing::info!(partner = %record.id(), from = %status.before, to = %status.after, "partner status changed");
        }
        Ok(())
    }
}
