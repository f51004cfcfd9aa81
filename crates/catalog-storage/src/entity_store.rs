//! Entity persistence and keyset page fetches.
//!
//! Pages are fetched by range over the composite `(created_at, id)` key,
//! never by offset, so inserts and deletes elsewhere in the key space cannot
//! shift an in-progress traversal.

use crate::{CatalogBackend, LocalSqliteBackend};
use catalog_gateway_core::{
    validation, CatalogError, Connection as ServiceConnection, Direction, Entity, EntityType,
    Field, FieldSet, Include, Result, SortKey,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, ErrorCode, OptionalExtension};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// One range read against the entity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub entity_type: EntityType,
    /// `Forward` reads keys strictly after `cursor` ascending, `Backward`
    /// reads keys strictly before it descending.
    pub direction: Direction,
    pub cursor: Option<SortKey>,
    /// Maximum rows to return
    pub limit: usize,
    pub service: Option<String>,
    pub fields: FieldSet,
    pub include: Include,
}

/// Persistence collaborator consumed by the paginated lister.
pub trait EntityStore: Send + Sync {
    /// Fetch up to `query.limit` rows in the query's direction.
    ///
    /// Rows come back in scan order: ascending for `Forward`, descending for
    /// `Backward`. Only the associations named in `query.fields` are loaded.
    fn fetch_page<'a>(
        &'a self,
        query: &'a PageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>>> + Send + 'a>>;
}

const ENTITY_COLUMNS: &str = "id, entity_type, name, description, service, owner, domain, \
                              version, deleted, created_at, updated_at, connection";

struct EntityRow {
    id: String,
    entity_type: String,
    name: String,
    description: Option<String>,
    service: Option<String>,
    owner: Option<String>,
    domain: Option<String>,
    version: i64,
    deleted: bool,
    created_at: i64,
    updated_at: String,
    connection: Option<String>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        service: row.get(4)?,
        owner: row.get(5)?,
        domain: row.get(6)?,
        version: row.get(7)?,
        deleted: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        connection: row.get(11)?,
    })
}

impl EntityRow {
    fn into_entity(self, fields: &FieldSet) -> Result<Entity> {
        let id = Uuid::parse_str(&self.id).map_err(|e| {
            CatalogError::SerializationError(format!("invalid entity id '{}': {}", self.id, e))
        })?;
        let entity_type = self.entity_type.parse::<EntityType>()?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(self.created_at).ok_or_else(|| {
            CatalogError::SerializationError(format!(
                "created_at out of range for entity {}",
                self.id
            ))
        })?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                CatalogError::SerializationError(format!(
                    "invalid updated_at for entity {}: {}",
                    self.id, e
                ))
            })?;

        let connection = if fields.contains(Field::Connection) {
            let connection = self
                .connection
                .map(|raw| serde_json::from_str::<ServiceConnection>(&raw))
                .transpose()?;
            if let Some(connection) = &connection {
                connection.validate().map_err(|e| {
                    CatalogError::SerializationError(format!(
                        "stored connection of entity {} is inconsistent: {}",
                        self.id, e
                    ))
                })?;
            }
            connection
        } else {
            None
        };

        Ok(Entity {
            id,
            entity_type,
            name: self.name,
            description: self.description,
            service: self.service,
            owner: self.owner,
            version: self.version,
            deleted: self.deleted,
            created_at,
            updated_at,
            tags: None,
            followers: None,
            domain: if fields.contains(Field::Domain) {
                self.domain
            } else {
                None
            },
            connection,
        })
    }
}

fn fetch_page_blocking(conn: &rusqlite::Connection, query: &PageQuery) -> Result<Vec<Entity>> {
    let mut sql = format!("SELECT {} FROM entities WHERE entity_type = ?", ENTITY_COLUMNS);
    let mut bindings: Vec<Value> = vec![Value::Text(query.entity_type.as_str().to_string())];

    match query.include {
        Include::NonDeleted => sql.push_str(" AND deleted = 0"),
        Include::Deleted => sql.push_str(" AND deleted = 1"),
        Include::All => {}
    }

    if let Some(service) = &query.service {
        sql.push_str(" AND service = ?");
        bindings.push(Value::Text(service.clone()));
    }

    let (cmp, order) = match query.direction {
        Direction::Forward => (">", "ASC"),
        Direction::Backward => ("<", "DESC"),
    };

    if let Some(cursor) = &query.cursor {
        sql.push_str(&format!(
            " AND (created_at {cmp} ? OR (created_at = ? AND id {cmp} ?))"
        ));
        bindings.push(Value::Integer(cursor.created_at));
        bindings.push(Value::Integer(cursor.created_at));
        bindings.push(Value::Text(cursor.id.to_string()));
    }

    sql.push_str(&format!(" ORDER BY created_at {order}, id {order} LIMIT ?"));
    bindings.push(Value::Integer(query.limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bindings.iter()), read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entities = rows
        .into_iter()
        .map(|row| row.into_entity(&query.fields))
        .collect::<Result<Vec<_>>>()?;

    load_associations(conn, &mut entities, &query.fields)?;
    Ok(entities)
}

fn load_associations(
    conn: &rusqlite::Connection,
    entities: &mut [Entity],
    fields: &FieldSet,
) -> Result<()> {
    if fields.contains(Field::Tags) {
        let mut stmt =
            conn.prepare("SELECT tag FROM entity_tags WHERE entity_id = ?1 ORDER BY tag")?;
        for entity in entities.iter_mut() {
            let tags = stmt
                .query_map([entity.id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            entity.tags = Some(tags);
        }
    }

    if fields.contains(Field::Followers) {
        let mut stmt = conn.prepare(
            "SELECT follower FROM entity_followers WHERE entity_id = ?1 ORDER BY follower",
        )?;
        for entity in entities.iter_mut() {
            let followers = stmt
                .query_map([entity.id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            entity.followers = Some(followers);
        }
    }

    Ok(())
}

fn validate_new_entity(entity: &Entity) -> Result<()> {
    validation::validate_entity_name(&entity.name)?;
    if let Some(owner) = &entity.owner {
        validation::validate_identifier(owner, "owner")?;
    }
    if let Some(domain) = &entity.domain {
        validation::validate_identifier(domain, "domain")?;
    }
    for tag in entity.tags.iter().flatten() {
        validation::validate_tag(tag)?;
    }

    match (&entity.connection, entity.entity_type.service_category()) {
        (Some(_), None) => Err(CatalogError::ValidationError(format!(
            "{} entities cannot carry a service connection",
            entity.entity_type
        ))),
        (Some(connection), Some(category)) => {
            if connection.category() != category {
                return Err(CatalogError::ValidationError(format!(
                    "{} service type does not belong to {}",
                    connection.service_type, entity.entity_type
                )));
            }
            connection.validate()
        }
        (None, _) => Ok(()),
    }
}

fn map_insert_error(err: rusqlite::Error, entity: &Entity) -> CatalogError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            CatalogError::ConflictError(format!(
                "{} '{}' already exists",
                entity.entity_type, entity.name
            ))
        }
        _ => CatalogError::Sqlite(err),
    }
}

fn insert_blocking(conn: &mut rusqlite::Connection, entity: &Entity) -> Result<()> {
    let connection = entity
        .connection
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO entities (id, entity_type, name, description, service, owner, domain, \
         version, deleted, created_at, updated_at, connection) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entity.id.to_string(),
            entity.entity_type.as_str(),
            entity.name,
            entity.description,
            entity.service,
            entity.owner,
            entity.domain,
            entity.version,
            entity.deleted as i64,
            entity.created_at.timestamp_micros(),
            entity.updated_at.to_rfc3339(),
            connection,
        ],
    )
    .map_err(|e| map_insert_error(e, entity))?;

    for tag in entity.tags.iter().flatten() {
        tx.execute(
            "INSERT OR IGNORE INTO entity_tags (entity_id, tag) VALUES (?1, ?2)",
            params![entity.id.to_string(), tag],
        )?;
    }
    for follower in entity.followers.iter().flatten() {
        tx.execute(
            "INSERT OR IGNORE INTO entity_followers (entity_id, follower) VALUES (?1, ?2)",
            params![entity.id.to_string(), follower],
        )?;
    }

    tx.commit()?;
    Ok(())
}

/// SQLite-backed entity store.
#[derive(Clone)]
pub struct SqliteEntityStore {
    backend: Arc<dyn CatalogBackend>,
}

impl SqliteEntityStore {
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a local SQLite file.
    pub fn local<P: AsRef<Path>>(path: P) -> Self {
        Self::new(Arc::new(LocalSqliteBackend::new(path)))
    }

    pub fn backend(&self) -> &Arc<dyn CatalogBackend> {
        &self.backend
    }

    /// Persist a new entity with its tags and followers.
    ///
    /// Fails with `ConflictError` if an entity of the same type and name exists.
    pub async fn create(&self, entity: &Entity) -> Result<()> {
        validate_new_entity(entity)?;

        let mut conn = self.backend.get_connection().await?;
        let entity = entity.clone();
        let (entity_type, name) = (entity.entity_type, entity.name.clone());

        tokio::task::spawn_blocking(move || insert_blocking(&mut conn, &entity))
            .await
            .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))??;

        info!(entity_type = %entity_type, name = %name, "Created entity");
        Ok(())
    }

    /// Look up a single entity by type and name, including soft-deleted ones.
    pub async fn get_by_name(
        &self,
        entity_type: EntityType,
        name: &str,
        fields: &FieldSet,
    ) -> Result<Entity> {
        let conn = self.backend.get_connection().await?;
        let name = name.to_string();
        let fields = fields.clone();

        tokio::task::spawn_blocking(move || {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM entities WHERE entity_type = ?1 AND name = ?2",
                        ENTITY_COLUMNS
                    ),
                    params![entity_type.as_str(), name],
                    read_row,
                )
                .optional()?
                .ok_or_else(|| {
                    CatalogError::EntityNotFound(format!("{} '{}'", entity_type, name))
                })?;

            let mut entities = vec![row.into_entity(&fields)?];
            load_associations(&conn, &mut entities, &fields)?;
            Ok(entities.remove(0))
        })
        .await
        .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?
    }

    /// Mark an entity deleted. Its sort key is unchanged.
    pub async fn soft_delete(&self, entity_type: EntityType, name: &str) -> Result<()> {
        self.set_deleted(entity_type, name, true).await
    }

    /// Undo a soft delete.
    pub async fn restore(&self, entity_type: EntityType, name: &str) -> Result<()> {
        self.set_deleted(entity_type, name, false).await
    }

    async fn set_deleted(&self, entity_type: EntityType, name: &str, deleted: bool) -> Result<()> {
        let conn = self.backend.get_connection().await?;
        let name_owned = name.to_string();

        let rows = tokio::task::spawn_blocking(move || {
            conn.execute(
                "UPDATE entities SET deleted = ?1, version = version + 1, updated_at = ?2 \
                 WHERE entity_type = ?3 AND name = ?4 AND deleted = ?5",
                params![
                    deleted as i64,
                    Utc::now().to_rfc3339(),
                    entity_type.as_str(),
                    name_owned,
                    (!deleted) as i64,
                ],
            )
            .map_err(CatalogError::from)
        })
        .await
        .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))??;

        if rows == 0 {
            return Err(CatalogError::EntityNotFound(format!(
                "{} '{}' ({})",
                entity_type,
                name,
                if deleted { "not live" } else { "not deleted" }
            )));
        }

        debug!(entity_type = %entity_type, name = %name, deleted, "Updated entity delete marker");
        Ok(())
    }

    /// Number of entities of a type matching the include filter.
    pub async fn count(&self, entity_type: EntityType, include: Include) -> Result<i64> {
        let conn = self.backend.get_connection().await?;
        let filter = match include {
            Include::NonDeleted => " AND deleted = 0",
            Include::Deleted => " AND deleted = 1",
            Include::All => "",
        };

        tokio::task::spawn_blocking(move || {
            conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM entities WHERE entity_type = ?1{}",
                    filter
                ),
                [entity_type.as_str()],
                |row| row.get(0),
            )
            .map_err(CatalogError::from)
        })
        .await
        .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?
    }
}

impl EntityStore for SqliteEntityStore {
    fn fetch_page<'a>(
        &'a self,
        query: &'a PageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>>> + Send + 'a>> {
        Box::pin(async move {
            let conn = self.backend.get_connection().await?;
            let owned = query.clone();

            let rows = tokio::task::spawn_blocking(move || fetch_page_blocking(&conn, &owned))
                .await
                .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))??;

            debug!(
                entity_type = %query.entity_type,
                direction = ?query.direction,
                limit = query.limit,
                rows = rows.len(),
                "Fetched entity page"
            );
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_gateway_core::{
        ConnectionConfig, DatabaseConnection, SecretValue, ServiceType,
    };
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteEntityStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteEntityStore::local(temp_dir.path().join("catalog.db"));
        (temp_dir, store)
    }

    /// Tables with strictly increasing creation times.
    fn tables(names: &[&str]) -> Vec<Entity> {
        let base = Utc::now().timestamp_micros();
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut entity = Entity::new(EntityType::Table, *name);
                entity.created_at =
                    DateTime::<Utc>::from_timestamp_micros(base + i as i64).unwrap();
                entity
            })
            .collect()
    }

    /// Query for the first `limit` live entities of a type.
    fn first_page(entity_type: EntityType, limit: usize) -> PageQuery {
        PageQuery {
            entity_type,
            direction: Direction::Forward,
            cursor: None,
            limit,
            service: None,
            fields: FieldSet::empty(),
            include: Include::default(),
        }
    }

    fn names(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fetch_forward_and_backward() {
        let (_temp, store) = create_test_store();
        let all = tables(&["a", "b", "c", "d", "e"]);
        for entity in &all {
            store.create(entity).await.unwrap();
        }

        let mut query = first_page(EntityType::Table, 3);
        let page = store.fetch_page(&query).await.unwrap();
        assert_eq!(names(&page), vec!["a", "b", "c"]);

        query.cursor = Some(all[1].sort_key());
        let page = store.fetch_page(&query).await.unwrap();
        assert_eq!(names(&page), vec!["c", "d", "e"]);

        query.direction = Direction::Backward;
        query.cursor = Some(all[3].sort_key());
        let page = store.fetch_page(&query).await.unwrap();
        assert_eq!(names(&page), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_break_ties_by_id() {
        let (_temp, store) = create_test_store();
        let created_at = DateTime::<Utc>::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        let mut all: Vec<Entity> = (0..4)
            .map(|i| {
                let mut entity = Entity::new(EntityType::Table, format!("t{}", i));
                entity.created_at = created_at;
                entity
            })
            .collect();
        for entity in &all {
            store.create(entity).await.unwrap();
        }
        all.sort_by_key(|e| e.sort_key());

        let mut query = first_page(EntityType::Table, 2);
        let first = store.fetch_page(&query).await.unwrap();
        query.cursor = Some(first[1].sort_key());
        let second = store.fetch_page(&query).await.unwrap();

        let seen: Vec<Uuid> = first.iter().chain(second.iter()).map(|e| e.id).collect();
        let expected: Vec<Uuid> = all.iter().map(|e| e.id).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_include_modes() {
        let (_temp, store) = create_test_store();
        for entity in tables(&["live", "gone"]) {
            store.create(&entity).await.unwrap();
        }
        store.soft_delete(EntityType::Table, "gone").await.unwrap();

        let mut query = first_page(EntityType::Table, 10);
        assert_eq!(names(&store.fetch_page(&query).await.unwrap()), vec!["live"]);

        query.include = Include::Deleted;
        assert_eq!(names(&store.fetch_page(&query).await.unwrap()), vec!["gone"]);

        query.include = Include::All;
        assert_eq!(
            names(&store.fetch_page(&query).await.unwrap()),
            vec!["live", "gone"]
        );

        store.restore(EntityType::Table, "gone").await.unwrap();
        assert_eq!(store.count(EntityType::Table, Include::NonDeleted).await.unwrap(), 2);

        // Deleting twice is reported, not ignored
        store.soft_delete(EntityType::Table, "live").await.unwrap();
        assert!(matches!(
            store.soft_delete(EntityType::Table, "live").await,
            Err(CatalogError::EntityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_service_filter() {
        let (_temp, store) = create_test_store();
        let mut all = tables(&["orders", "users", "events"]);
        all[0].service = Some("warehouse".to_string());
        all[1].service = Some("crm".to_string());
        all[2].service = Some("warehouse".to_string());
        for entity in &all {
            store.create(entity).await.unwrap();
        }

        let mut query = first_page(EntityType::Table, 10);
        query.service = Some("warehouse".to_string());
        assert_eq!(
            names(&store.fetch_page(&query).await.unwrap()),
            vec!["orders", "events"]
        );
    }

    #[tokio::test]
    async fn test_fields_control_associations() {
        let (_temp, store) = create_test_store();
        let mut service = Entity::new(EntityType::DatabaseService, "warehouse");
        service.domain = Some("finance".to_string());
        service.tags = Some(vec!["tier-1".to_string(), "pii".to_string()]);
        service.followers = Some(vec!["ann".to_string()]);
        service.connection = Some(
            ServiceConnection::new(
                ServiceType::Postgres,
                ConnectionConfig::Database(DatabaseConnection {
                    host_port: "db:5432".to_string(),
                    username: "etl".to_string(),
                    password: Some(SecretValue::new("sealed:v1:abc")),
                    database: None,
                }),
            )
            .unwrap(),
        );
        store.create(&service).await.unwrap();

        let bare = store
            .get_by_name(EntityType::DatabaseService, "warehouse", &FieldSet::empty())
            .await
            .unwrap();
        assert!(bare.tags.is_none());
        assert!(bare.followers.is_none());
        assert!(bare.domain.is_none());
        assert!(bare.connection.is_none());

        let full = store
            .get_by_name(
                EntityType::DatabaseService,
                "warehouse",
                &FieldSet::all_for(EntityType::DatabaseService),
            )
            .await
            .unwrap();
        assert_eq!(full.tags, Some(vec!["pii".to_string(), "tier-1".to_string()]));
        assert_eq!(full.followers, Some(vec!["ann".to_string()]));
        assert_eq!(full.domain.as_deref(), Some("finance"));
        assert_eq!(full.connection, service.connection);
        assert_eq!(full.created_at, service.created_at);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_connections() {
        let (_temp, store) = create_test_store();
        let entity = Entity::new(EntityType::Table, "orders");
        store.create(&entity).await.unwrap();

        let duplicate = Entity::new(EntityType::Table, "orders");
        assert!(matches!(
            store.create(&duplicate).await,
            Err(CatalogError::ConflictError(_))
        ));

        let mut table_with_connection = Entity::new(EntityType::Table, "bad");
        table_with_connection.connection = Some(
            ServiceConnection::new(
                ServiceType::Postgres,
                ConnectionConfig::Database(DatabaseConnection {
                    host_port: "db:5432".to_string(),
                    username: "etl".to_string(),
                    password: None,
                    database: None,
                }),
            )
            .unwrap(),
        );
        assert!(matches!(
            store.create(&table_with_connection).await,
            Err(CatalogError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_stored_connection_is_server_error() {
        let (_temp, store) = create_test_store();
        let mut service = Entity::new(EntityType::DatabaseService, "warehouse");
        service.connection = Some(
            ServiceConnection::new(
                ServiceType::Postgres,
                ConnectionConfig::Database(DatabaseConnection {
                    host_port: "db:5432".to_string(),
                    username: "etl".to_string(),
                    password: Some(SecretValue::new("hunter2")),
                    database: None,
                }),
            )
            .unwrap(),
        );
        store.create(&service).await.unwrap();

        let mut corrupted = service.connection.clone().unwrap();
        corrupted.service_type = ServiceType::Looker;
        let raw = serde_json::to_string(&corrupted).unwrap();
        let conn = store.backend().get_connection().await.unwrap();
        conn.execute(
            "UPDATE entities SET connection = ?1 WHERE name = 'warehouse'",
            [raw],
        )
        .unwrap();

        let mut query = first_page(EntityType::DatabaseService, 10);
        query.fields = FieldSet::all_for(EntityType::DatabaseService);
        let err = store.fetch_page(&query).await.unwrap_err();
        assert!(matches!(err, CatalogError::SerializationError(_)));
        assert!(!err.is_client_error());

        // Without the connection field the row is still readable
        query.fields = FieldSet::empty();
        assert_eq!(store.fetch_page(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_entity() {
        let (_temp, store) = create_test_store();
        assert!(matches!(
            store
                .get_by_name(EntityType::Table, "nope", &FieldSet::empty())
                .await,
            Err(CatalogError::EntityNotFound(_))
        ));
    }
}
