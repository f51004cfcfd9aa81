//! Gateway Integration Tests
//!
//! Listing, paging and redaction end to end against a temporary SQLite catalog.
//!
//! Run with: `cargo test -p catalog-gateway-api --features test-utils --test gateway_tests`

#![cfg(feature = "test-utils")]

use catalog_gateway_api::test_utils::{password_of, TestCatalog};
use catalog_gateway_api::{EntityGateway, NoopAuthorizer, Redacted, RedactionOutcome};
use catalog_gateway_core::{
    CatalogError, Entity, EntityType, Include, Page, PageRequest, Principal,
};
use std::sync::Arc;

fn names(page: &Page<Redacted>) -> Vec<&str> {
    page.items.iter().map(|r| r.entity.name.as_str()).collect()
}

async fn page(
    gateway: &EntityGateway,
    principal: &Principal,
    request: PageRequest,
) -> Page<Redacted> {
    gateway.list_entities(principal, &request).await.unwrap()
}

// ============================================================================
// Paging
// ============================================================================

#[tokio::test]
async fn test_forward_then_backward_over_five_tables() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog
        .seed_tables(&["a", "b", "c", "d", "e"])
        .await
        .unwrap();
    let gateway = catalog.gateway(catalog.builtin_authorizer());
    let user = Principal::user("bob");
    let first = PageRequest::new(EntityType::Table).with_limit(2);

    let p1 = page(&gateway, &user, first.clone()).await;
    assert_eq!(names(&p1), vec!["a", "b"]);
    assert!(p1.before.is_none());
    let after1 = p1.after.clone().unwrap();

    let p2 = page(&gateway, &user, first.clone().after(after1)).await;
    assert_eq!(names(&p2), vec!["c", "d"]);
    assert!(p2.before.is_some());

    let p3 = page(&gateway, &user, first.clone().after(p2.after.clone().unwrap())).await;
    assert_eq!(names(&p3), vec!["e"]);
    assert!(p3.after.is_none());

    // Backward from the last page mirrors the forward traversal
    let b2 = page(&gateway, &user, first.clone().before(p3.before.clone().unwrap())).await;
    assert_eq!(b2.items, p2.items);

    let b1 = page(&gateway, &user, first.before(b2.before.clone().unwrap())).await;
    assert_eq!(b1.items, p1.items);
    assert!(b1.before.is_none());
}

#[tokio::test]
async fn test_traversal_visits_every_entity_once() {
    let catalog = TestCatalog::new().await.unwrap();
    let seeded_names: Vec<String> = (0..37).map(|i| format!("table-{:02}", i)).collect();
    let refs: Vec<&str> = seeded_names.iter().map(String::as_str).collect();
    let seeded = catalog.seed_tables(&refs).await.unwrap();

    let gateway = catalog.gateway(Arc::new(NoopAuthorizer));
    let principal = Principal::user("bob");
    let base = PageRequest::new(EntityType::Table).with_limit(5);

    let mut seen: Vec<Entity> = Vec::new();
    let mut request = base.clone();
    let mut pages = 0;
    loop {
        let page = page(&gateway, &principal, request).await;
        pages += 1;
        seen.extend(page.items.into_iter().map(|r| r.entity));
        match page.after {
            Some(cursor) => request = base.clone().after(cursor),
            None => break,
        }
    }

    assert_eq!(pages, 8);
    let seen_ids: Vec<_> = seen.iter().map(|e| e.id).collect();
    let seeded_ids: Vec<_> = seeded.iter().map(|e| e.id).collect();
    assert_eq!(seen_ids, seeded_ids);
}

#[tokio::test]
async fn test_inserts_during_traversal_do_not_shift_pages() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_tables(&["a", "b", "c", "d"]).await.unwrap();
    let gateway = catalog.gateway(Arc::new(NoopAuthorizer));
    let principal = Principal::user("bob");
    let base = PageRequest::new(EntityType::Table).with_limit(2);

    let p1 = page(&gateway, &principal, base.clone()).await;
    assert_eq!(names(&p1), vec!["a", "b"]);

    // Created after the traversal began, so it sorts after everything seen
    catalog.seed_tables(&["z"]).await.unwrap();
    catalog.store().soft_delete(EntityType::Table, "a").await.unwrap();

    let p2 = page(&gateway, &principal, base.clone().after(p1.after.unwrap())).await;
    assert_eq!(names(&p2), vec!["c", "d"]);

    let p3 = page(&gateway, &principal, base.after(p2.after.unwrap())).await;
    assert_eq!(names(&p3), vec!["z"]);
    assert!(p3.after.is_none());
}

#[tokio::test]
async fn test_include_and_service_filters() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_tables(&["orders", "users", "events"]).await.unwrap();
    catalog.store().soft_delete(EntityType::Table, "users").await.unwrap();
    let gateway = catalog.gateway(Arc::new(NoopAuthorizer));
    let principal = Principal::user("bob");

    let live = page(&gateway, &principal, PageRequest::new(EntityType::Table)).await;
    assert_eq!(names(&live), vec!["orders", "events"]);

    let deleted = page(
        &gateway,
        &principal,
        PageRequest::new(EntityType::Table).with_include(Include::Deleted),
    )
    .await;
    assert_eq!(names(&deleted), vec!["users"]);

    let all = page(
        &gateway,
        &principal,
        PageRequest::new(EntityType::Table).with_include(Include::All),
    )
    .await;
    assert_eq!(all.items.len(), 3);

    let none = page(
        &gateway,
        &principal,
        PageRequest::new(EntityType::Table).with_service("nowhere"),
    )
    .await;
    assert!(none.items.is_empty());
    assert!(none.before.is_none() && none.after.is_none());
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_request_errors() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_tables(&["a"]).await.unwrap();
    let gateway = catalog.gateway(catalog.builtin_authorizer());
    let principal = Principal::user("bob");

    let both = PageRequest::new(EntityType::Table).after("x").before("y");
    assert!(matches!(
        gateway.list_entities(&principal, &both).await,
        Err(CatalogError::InvalidArgument(_))
    ));

    let zero = PageRequest::new(EntityType::Table).with_limit(0);
    assert!(matches!(
        gateway.list_entities(&principal, &zero).await,
        Err(CatalogError::InvalidArgument(_))
    ));

    let garbage = PageRequest::new(EntityType::Table).after("not a cursor");
    assert!(matches!(
        gateway.list_entities(&principal, &garbage).await,
        Err(CatalogError::MalformedCursor(_))
    ));

    // Connections only exist on services
    let connection_on_table = PageRequest::new(EntityType::Table).with_fields(["connection"]);
    assert!(matches!(
        gateway.list_entities(&principal, &connection_on_table).await,
        Err(CatalogError::UnknownField(_))
    ));
}

// ============================================================================
// Redaction
// ============================================================================

fn services_with_connection() -> PageRequest {
    PageRequest::new(EntityType::DatabaseService).with_fields(["connection"])
}

#[tokio::test]
async fn test_admin_sees_decrypted_connection() {
    let catalog = TestCatalog::new().await.unwrap();
    let stored = catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();
    assert_ne!(password_of(&stored), Some("hunter2"), "stored sealed");

    let gateway = catalog.gateway(catalog.builtin_authorizer());
    let page = page(&gateway, &Principal::admin("root"), services_with_connection()).await;

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].redaction, RedactionOutcome::FullyVisible);
    assert_eq!(password_of(&page.items[0].entity), Some("hunter2"));
}

#[tokio::test]
async fn test_non_admin_gets_null_config() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();
    let gateway = catalog.gateway(catalog.builtin_authorizer());

    for principal in [
        Principal::user("bob"),
        Principal::user("steward").with_roles(["DataSteward"]),
        Principal::user("ann").with_roles(["Auditor"]),
    ] {
        let page = page(&gateway, &principal, services_with_connection()).await;
        let item = &page.items[0];
        assert_eq!(item.redaction, RedactionOutcome::Redacted, "{}", principal.name);
        let connection = item.entity.connection.as_ref().unwrap();
        assert!(connection.config.is_none());
    }
}

#[tokio::test]
async fn test_owner_sees_secrets_in_local_mode() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();
    catalog.seed_service("lake", "carl", "swordfish").await.unwrap();
    let gateway = catalog.gateway(catalog.builtin_authorizer());

    let page = page(&gateway, &Principal::user("ann"), services_with_connection()).await;
    let outcomes: Vec<_> = page
        .items
        .iter()
        .map(|r| (r.entity.name.as_str(), r.redaction))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("warehouse", RedactionOutcome::FullyVisible),
            ("lake", RedactionOutcome::Redacted),
        ]
    );
    assert_eq!(password_of(&page.items[0].entity), Some("hunter2"));
}

#[tokio::test]
async fn test_connection_withheld_unless_requested() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();
    let gateway = catalog.gateway(catalog.builtin_authorizer());

    let page = page(
        &gateway,
        &Principal::admin("root"),
        PageRequest::new(EntityType::DatabaseService),
    )
    .await;
    assert_eq!(page.items[0].redaction, RedactionOutcome::Withheld);
    assert!(page.items[0].entity.connection.is_none());
}

#[tokio::test]
async fn test_listing_never_mutates_stored_entities() {
    let catalog = TestCatalog::new().await.unwrap();
    let stored = catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();
    let gateway = catalog.gateway(catalog.builtin_authorizer());

    page(&gateway, &Principal::admin("root"), services_with_connection()).await;
    page(&gateway, &Principal::user("bob"), services_with_connection()).await;

    let fields = catalog_gateway_core::FieldSet::parse(EntityType::DatabaseService, ["connection"])
        .unwrap();
    let reloaded = catalog
        .store()
        .get_by_name(EntityType::DatabaseService, "warehouse", &fields)
        .await
        .unwrap();
    assert_eq!(reloaded.connection, stored.connection);
}
