//! Round trips against a real database. Each test migrates a fresh PostgreSQL
//! schema. Skipped when DATABASE_URL is unset.

use partnerbase::filter::parse_sort_list;
use partnerbase::{
    apply_migrations, connect, ensure_database_exists, parse_schema, resolve, AppError, Dao, LoadPlan, PageParams,
    Registry, SearchParams, Settings, Values,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;

async fn setup() -> Option<(PgPool, Registry)> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let settings = Settings {
        database_url,
        max_connections: 4,
        ..Settings::default()
    };
    ensure_database_exists(&settings.database_url).await.unwrap();
    let pool = connect(&settings).await.unwrap();

    let mut file = parse_schema(include_str!("fixtures/schema.json")).unwrap();
    file.schema = format!("pbtest_{}", uuid::Uuid::new_v4().simple());
    let schema = Arc::new(resolve(&file).unwrap());
    apply_migrations(&pool, &schema).await.unwrap();
    let registry = Registry::builder(schema)
        .with_load_plan("partners", LoadPlan::new().with("owner"))
        .build()
        .unwrap();
    Some((pool, registry))
}

fn values(v: Value) -> Values {
    v.as_object().cloned().unwrap()
}

fn dao<'a>(registry: &'a Registry, name: &str) -> &'a Dao {
    registry.dao(name).unwrap()
}

fn filters(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[tokio::test]
async fn create_then_get_round_trip() {
    let Some((pool, registry)) = setup().await else { return };
    let mut conn = pool.acquire().await.unwrap();
    let users = dao(&registry, "users");

    let created = users
        .create(
            &mut conn,
            values(json!({
                "name": "Jo",
                "email": "jo@acme.io",
                "age": 30,
                "birthday": "1990-12-31",
                "favourite_colour": "blue",
                "memberships": []
            })),
        )
        .await
        .unwrap();
    assert_eq!(created.get("email"), Some(&json!("jo@acme.io")));
    assert_eq!(created.get("is_active"), Some(&json!(true)));
    assert!(created.get("favourite_colour").is_none());
    assert!(created.get("created_at").unwrap().is_string());

    let fetched = users.get_by_id(&mut conn, created.id()).await.unwrap().unwrap();
    assert_eq!(fetched.values(), created.values());
    assert!(users.exists(&mut conn, created.id()).await.unwrap());
    assert_eq!(users.get_by_ids(&mut conn, &[created.id().to_string()]).await.unwrap().len(), 1);

    let err = users
        .create(&mut conn, values(json!({ "name": "Other", "email": "jo@acme.io" })))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());
    assert_eq!(users.get_all(&mut conn, &Vec::new(), &[]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pages_over_twenty_five_rows() {
    let Some((pool, registry)) = setup().await else { return };
    let mut conn = pool.acquire().await.unwrap();
    let partners = dao(&registry, "partners");
    for i in 0..25 {
        partners
            .create(&mut conn, values(json!({ "name": format!("partner {:02}", i) })))
            .await
            .unwrap();
    }
    let sort = parse_sort_list("name").unwrap();

    let page = partners
        .get_multi_paginated(&mut conn, &Vec::new(), &sort, &[], PageParams::new(2, 10).unwrap())
        .await
        .unwrap();
    assert_eq!((page.total, page.total_pages, page.current_page, page.next_page), (25, 3, 2, 3));
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items[0].get("name"), Some(&json!("partner 10")));

    let last = partners
        .get_multi_paginated(&mut conn, &Vec::new(), &sort, &[], PageParams::new(3, 10).unwrap())
        .await
        .unwrap();
    assert_eq!(last.next_page, -1);
    assert_eq!(last.items.len(), 5);

    let exported = partners.export(&mut conn, &Vec::new(), &sort, &[]).await.unwrap();
    assert_eq!(exported.len(), 25);
    assert_eq!(exported[24].get("name"), Some(&json!("partner 24")));
}

#[tokio::test]
async fn chunked_export_walks_primary_keys_in_batches() {
    let Some((pool, registry)) = setup().await else { return };
    let users = dao(&registry, "users");
    {
        let mut conn = pool.acquire().await.unwrap();
        for i in 0..25 {
            users
                .create(&mut conn, values(json!({ "name": "chunk", "email": format!("u{}@acme.io", i) })))
                .await
                .unwrap();
        }
        users
            .create(&mut conn, values(json!({ "name": "other", "email": "other@acme.io" })))
            .await
            .unwrap();
    }

    let mut rows = users
        .get_all_in_chunks(&pool, &filters(&[("name", json!("chunk"))]), 7)
        .unwrap();
    let mut ids = Vec::new();
    while let Some(record) = rows.next().await.unwrap() {
        ids.push(record.id().to_string());
    }
    assert_eq!(ids.len(), 25);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(rows.batches_issued(), 5);
}

#[tokio::test]
async fn update_tracks_changes_and_transitions() {
    let Some((pool, registry)) = setup().await else { return };
    let mut conn = pool.acquire().await.unwrap();
    let partners = dao(&registry, "partners");
    let created = partners
        .create(&mut conn, values(json!({ "name": "Acme", "address": "Lisbon" })))
        .await
        .unwrap();
    assert_eq!(created.get("status"), Some(&json!("pending")));

    let same = partners
        .update(&mut conn, &created, values(json!({ "name": "Acme", "address": "Lisbon" })))
        .await
        .unwrap();
    assert_eq!(same.get("updated_at"), Some(&Value::Null));

    let err = partners
        .update(&mut conn, &same, values(json!({ "status": "suspended" })))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransitionNotPermitted { .. }));

    let active = partners
        .update(&mut conn, &same, values(json!({ "status": "active", "rating": 4.5 })))
        .await
        .unwrap();
    assert_eq!(active.get("status"), Some(&json!("active")));
    assert!(active.get("updated_at").unwrap().is_string());
    let suspended = partners
        .update(&mut conn, &active, values(json!({ "status": "suspended" })))
        .await
        .unwrap();
    assert_eq!(suspended.get("status"), Some(&json!("suspended")));

    assert!(partners.remove(&mut conn, created.id()).await.unwrap().is_some());
    assert!(partners.remove(&mut conn, created.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn rewriting_a_terminal_state_is_not_a_transition() {
    let Some((pool, registry)) = setup().await else { return };
    let mut conn = pool.acquire().await.unwrap();
    let partners = dao(&registry, "partners");
    let created = partners
        .create(&mut conn, values(json!({ "name": "Initech" })))
        .await
        .unwrap();
    let rejected = partners
        .update(&mut conn, &created, values(json!({ "status": "rejected" })))
        .await
        .unwrap();
    assert_eq!(rejected.get("status"), Some(&json!("rejected")));

    let rated = partners
        .update(&mut conn, &rejected, values(json!({ "status": "rejected", "rating": 1 })))
        .await
        .unwrap();
    assert_eq!(rated.get("status"), Some(&json!("rejected")));
    assert_eq!(rated.get("rating"), Some(&json!(1.0)));

    let err = partners
        .update(&mut conn, &rated, values(json!({ "status": "active" })))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransitionNotPermitted { .. }));
}

#[tokio::test]
async fn pages_through_one_to_many_filters_by_distinct_root() {
    let Some((pool, registry)) = setup().await else { return };
    let mut conn = pool.acquire().await.unwrap();
    let mut users = Vec::new();
    for i in 0..4 {
        let user = dao(&registry, "users")
            .create(&mut conn, values(json!({ "name": "member", "email": format!("m{}@acme.io", i) })))
            .await
            .unwrap();
        users.push(user.id().to_string());
    }
    let partners = dao(&registry, "partners");
    let members = dao(&registry, "partner_members");
    let mut expected = Vec::new();
    for p in 0..3 {
        let partner = partners
            .create(&mut conn, values(json!({ "name": format!("fan out {}", p) })))
            .await
            .unwrap();
        for user in &users {
            members
                .create(&mut conn, values(json!({ "partner_id": partner.id(), "user_id": user })))
                .await
                .unwrap();
        }
        expected.push(partner.id().to_string());
    }
    expected.sort();

    let by_role = filters(&[("members___role", json!("PARTNER_MEMBER"))]);
    let mut seen = Vec::new();
    for page in 1..=2 {
        let found = partners
            .get_multi_paginated(&mut conn, &by_role, &[], &[], PageParams::new(page, 2).unwrap())
            .await
            .unwrap();
        assert_eq!((found.total, found.total_pages), (3, 2));
        assert_eq!(found.items.len(), if page == 1 { 2 } else { 1 });
        seen.extend(found.items.iter().map(|r| r.id().to_string()));
    }
    seen.sort();
    assert_eq!(seen, expected);

    let sort = parse_sort_list("-members___role,name").unwrap();
    let first = partners
        .get_multi_paginated(&mut conn, &by_role, &sort, &[], PageParams::new(1, 2).unwrap())
        .await
        .unwrap();
    let names: Vec<_> = first.items.iter().map(|r| r.get("name").cloned().unwrap()).collect();
    assert_eq!(names, vec![json!("fan out 0"), json!("fan out 1")]);

    drop(conn);
    let mut rows = partners.get_all_in_chunks(&pool, &by_role, 2).unwrap();
    let mut chunked = Vec::new();
    while let Some(record) = rows.next().await.unwrap() {
        chunked.push(record.id().to_string());
    }
    assert_eq!(chunked, expected);
    assert_eq!(rows.batches_issued(), 3);
}

#[tokio::test]
async fn search_and_relationship_filters() {
    let Some((pool, registry)) = setup().await else { return };
    let mut conn = pool.acquire().await.unwrap();
    let owner = dao(&registry, "users")
        .create(&mut conn, values(json!({ "name": "Owner", "email": "owner@acme.io" })))
        .await
        .unwrap();
    let partners = dao(&registry, "partners");
    partners
        .create(
            &mut conn,
            values(json!({ "name": "Acme", "address": "Lisbon harbour", "owner_id": owner.id() })),
        )
        .await
        .unwrap();
    partners
        .create(&mut conn, values(json!({ "name": "Globex", "address": "Porto" })))
        .await
        .unwrap();

    let search = SearchParams {
        q: "lisbon".into(),
        ..SearchParams::default()
    };
    let found = partners
        .search(&mut conn, &search, &Vec::new(), &[], PageParams::new(1, 10).unwrap())
        .await
        .unwrap();
    assert_eq!(found.total, 1);
    let acme = &found.items[0];
    assert_eq!(acme.one("owner").unwrap().map(|o| o.id()), Some(owner.id()));
    assert!(acme.many("members").is_err());

    let by_owner = partners
        .get_all(&mut conn, &filters(&[("owner___email__iendswith", json!("@ACME.IO"))]), &[])
        .await
        .unwrap();
    assert_eq!(by_owner.len(), 1);
    let orphans = partners
        .get_all(&mut conn, &filters(&[("owner_id__isnull", json!(true))]), &[])
        .await
        .unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].get("name"), Some(&json!("Globex")));
}
