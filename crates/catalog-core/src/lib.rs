//! Catalog Gateway Core
//!
//! Core types, the pagination cursor codec, field selection and the SQLite
//! schema for the catalog entity gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod connection;
pub mod cursor;
pub mod fields;
pub mod principal;
pub mod validation;

pub use connection::{
    Connection, ConnectionConfig, DashboardConnection, DatabaseConnection, PipelineConnection,
    SecretValue, ServiceCategory, ServiceType, StorageConnection,
};
pub use cursor::SortKey;
pub use fields::{Field, FieldSet};
pub use principal::{Operation, Principal};

/// Default page size when a request does not specify one
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Largest page a single request may ask for
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Kind of catalog entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// Relational database service (owns tables)
    DatabaseService,
    /// BI/dashboard service (owns dashboards)
    DashboardService,
    /// Orchestration service (owns pipelines)
    PipelineService,
    /// Object storage service (owns containers)
    StorageService,
    Table,
    Dashboard,
    Pipeline,
    Container,
}

impl EntityType {
    /// All entity types, services first.
    pub const ALL: [EntityType; 8] = [
        EntityType::DatabaseService,
        EntityType::DashboardService,
        EntityType::PipelineService,
        EntityType::StorageService,
        EntityType::Table,
        EntityType::Dashboard,
        EntityType::Pipeline,
        EntityType::Container,
    ];

    /// Whether entities of this type carry a service connection.
    pub fn is_service(&self) -> bool {
        matches!(
            self,
            EntityType::DatabaseService
                | EntityType::DashboardService
                | EntityType::PipelineService
                | EntityType::StorageService
        )
    }

    /// Service category for service entity types.
    pub fn service_category(&self) -> Option<ServiceCategory> {
        match self {
            EntityType::DatabaseService => Some(ServiceCategory::Database),
            EntityType::DashboardService => Some(ServiceCategory::Dashboard),
            EntityType::PipelineService => Some(ServiceCategory::Pipeline),
            EntityType::StorageService => Some(ServiceCategory::Storage),
            _ => None,
        }
    }

    /// Stable identifier used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::DatabaseService => "databaseService",
            EntityType::DashboardService => "dashboardService",
            EntityType::PipelineService => "pipelineService",
            EntityType::StorageService => "storageService",
            EntityType::Table => "table",
            EntityType::Dashboard => "dashboard",
            EntityType::Pipeline => "pipeline",
            EntityType::Container => "container",
        }
    }

    /// REST collection name (e.g. `databaseServices`, `tables`).
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::DatabaseService => "databaseServices",
            EntityType::DashboardService => "dashboardServices",
            EntityType::PipelineService => "pipelineServices",
            EntityType::StorageService => "storageServices",
            EntityType::Table => "tables",
            EntityType::Dashboard => "dashboards",
            EntityType::Pipeline => "pipelines",
            EntityType::Container => "containers",
        }
    }

    /// Resolve a REST collection name.
    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.collection() == collection)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CatalogError::ValidationError(format!("Unknown entity type: {}", s)))
    }
}

/// A versioned catalog record.
///
/// Values handed out by the gateway are snapshots; mutating them never
/// touches the persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier
    pub id: Uuid,
    /// Type tag
    pub entity_type: EntityType,
    /// Name, unique per entity type
    pub name: String,
    /// Optional human-readable description
    pub description: Option<String>,
    /// Producing service name for data assets, service type for services
    pub service: Option<String>,
    /// Owner/responsible party
    pub owner: Option<String>,
    /// Entity version, bumped by the persistence layer on every change
    pub version: i64,
    /// Soft-delete marker
    pub deleted: bool,
    /// When the entity was first registered (microsecond precision)
    pub created_at: DateTime<Utc>,
    /// When the entity was last updated
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Service connection, only ever present on service entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
}

impl Entity {
    /// Create a new, live entity stamped with the current time.
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        let now = now_micros();
        Self {
            id: Uuid::new_v4(),
            entity_type,
            name: name.into(),
            description: None,
            service: None,
            owner: None,
            version: 1,
            deleted: false,
            created_at: now,
            updated_at: now,
            tags: None,
            followers: None,
            domain: None,
            connection: None,
        }
    }

    /// The composite `(created_at, id)` ordering key.
    pub fn sort_key(&self) -> SortKey {
        SortKey::new(self.created_at.timestamp_micros(), self.id)
    }

    /// Reference used for authorization decisions.
    pub fn reference(&self) -> EntityRef {
        EntityRef {
            id: self.id,
            entity_type: self.entity_type,
            name: self.name.clone(),
            owner: self.owner.clone(),
        }
    }
}

/// Current time truncated to the microsecond precision the store keeps.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Identity and ownership of an entity, as seen by the authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub name: String,
    pub owner: Option<String>,
}

/// Soft-delete filter for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Include {
    /// Live and soft-deleted entities
    All,
    /// Only soft-deleted entities
    Deleted,
    /// Only live entities
    #[default]
    NonDeleted,
}

impl std::fmt::Display for Include {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Include::All => write!(f, "all"),
            Include::Deleted => write!(f, "deleted"),
            Include::NonDeleted => write!(f, "non-deleted"),
        }
    }
}

impl std::str::FromStr for Include {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Include::All),
            "deleted" => Ok(Include::Deleted),
            "non-deleted" | "non_deleted" => Ok(Include::NonDeleted),
            _ => Err(CatalogError::InvalidArgument(format!(
                "Unknown include mode: {}",
                s
            ))),
        }
    }
}

/// Scroll direction of a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A single listing call, as received from the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Entity type being listed
    pub entity_type: EntityType,
    /// Optional associations to populate
    pub fields: Vec<String>,
    /// Restrict to entities of one service
    pub service: Option<String>,
    /// Page size, must be >= 1
    pub limit: usize,
    /// Opaque cursor: return the page that precedes this position
    pub before: Option<String>,
    /// Opaque cursor: return the page that follows this position
    pub after: Option<String>,
    /// Soft-delete filter
    pub include: Include,
}

impl PageRequest {
    /// First page of `entity_type` with default settings.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            fields: Vec::new(),
            service: None,
            limit: DEFAULT_PAGE_LIMIT,
            before: None,
            after: None,
            include: Include::default(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_include(mut self, include: Include) -> Self {
        self.include = include;
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// One page of a listing with its continuation tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in ascending sort-key order
    pub items: Vec<T>,
    /// Token for the page immediately before this one
    pub before: Option<String>,
    /// Token for the page immediately after this one
    pub after: Option<String>,
}

/// Errors that can occur in catalog operations
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Conflict detected: {0}")]
    ConflictError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Conflicting or missing pagination parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Undecodable or version-mismatched cursor; restart from the first page
    #[error("Malformed cursor: {0}")]
    MalformedCursor(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Decryption/encryption collaborator failure
    #[error("Secrets backend error: {0}")]
    SecretsBackend(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(String),
}

impl CatalogError {
    /// Whether the caller is at fault (maps to a 4xx at the transport).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CatalogError::InvalidArgument(_)
                | CatalogError::MalformedCursor(_)
                | CatalogError::UnknownField(_)
                | CatalogError::ValidationError(_)
                | CatalogError::EntityNotFound(_)
                | CatalogError::ConflictError(_)
        )
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::SerializationError(err.to_string())
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Initialize the SQLite schema for the catalog
///
/// Creates all necessary tables if they don't exist:
/// - `entities`: Entity registry, keyed by id and ordered by `(created_at, id)`
/// - `entity_tags`: Tag associations
/// - `entity_followers`: Follower associations
/// - `api_keys`: API keys and the principal each one resolves to
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    let ddl = r#"
    CREATE TABLE IF NOT EXISTS entities (
      id TEXT PRIMARY KEY,
      entity_type TEXT NOT NULL,
      name TEXT NOT NULL,
      description TEXT,
      service TEXT,
      owner TEXT,
      domain TEXT,
      version INTEGER NOT NULL DEFAULT 1,
      deleted INTEGER NOT NULL DEFAULT 0,
      created_at INTEGER NOT NULL,
      updated_at TEXT NOT NULL,
      connection TEXT,
      UNIQUE(entity_type, name)
    );

    -- Drives every page fetch: range scan on (created_at, id) within a type
    CREATE INDEX IF NOT EXISTS idx_entities_sort ON entities(entity_type, created_at, id);
    CREATE INDEX IF NOT EXISTS idx_entities_service ON entities(entity_type, service);

    CREATE TABLE IF NOT EXISTS entity_tags (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      entity_id TEXT NOT NULL,
      tag TEXT NOT NULL,
      FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE,
      UNIQUE(entity_id, tag)
    );

    CREATE INDEX IF NOT EXISTS idx_entity_tags_entity ON entity_tags(entity_id);

    CREATE TABLE IF NOT EXISTS entity_followers (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      entity_id TEXT NOT NULL,
      follower TEXT NOT NULL,
      FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE,
      UNIQUE(entity_id, follower)
    );

    CREATE INDEX IF NOT EXISTS idx_entity_followers_entity ON entity_followers(entity_id);

    CREATE TABLE IF NOT EXISTS api_keys (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      key_hash TEXT UNIQUE NOT NULL,
      name TEXT NOT NULL,
      roles TEXT NOT NULL DEFAULT '[]',
      is_admin INTEGER NOT NULL DEFAULT 0,
      is_bot INTEGER NOT NULL DEFAULT 0,
      created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
      revoked_at TEXT,
      last_used_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_api_keys_revoked_at ON api_keys(revoked_at);
    "#;

    conn.execute_batch(ddl)?;
    Ok(())
}
