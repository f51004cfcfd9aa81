//! Test Utilities Module
//!
//! Shared infrastructure for integration testing the gateway. Enable via the
//! `test-utils` feature flag.
//!
//! # Usage
//!
//! ```rust,ignore
//! use catalog_gateway_api::test_utils::TestCatalog;
//!
//! #[tokio::test]
//! async fn test_listing() {
//!     let catalog = TestCatalog::new().await.unwrap();
//!     catalog.seed_tables(&["a", "b", "c"]).await.unwrap();
//!     let gateway = catalog.gateway(catalog.builtin_authorizer());
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use crate::api_keys::{ApiKeyConfig, ApiKeyManager};
use crate::authorizer::{Authorizer, PolicyAuthorizer};
use crate::gateway::EntityGateway;
use crate::http::{build_router, AppState};
use crate::secrets::{LocalSecretsManager, SealingKey, SecretsManager, SecretsManagerProvider};
use catalog_gateway_core::{
    now_micros, CatalogError, Connection, ConnectionConfig, DatabaseConnection, Entity,
    EntityType, Principal, Result, SecretValue, ServiceType, DEFAULT_PAGE_LIMIT,
};
use catalog_gateway_storage::{DynCatalogBackend, LocalSqliteBackend, SqliteEntityStore};

/// A temporary catalog with a local-mode secrets manager.
///
/// Everything lives in a temporary directory that is deleted on drop.
pub struct TestCatalog {
    _temp_dir: TempDir,
    db_path: PathBuf,
    backend: Arc<DynCatalogBackend>,
    store: Arc<SqliteEntityStore>,
    secrets: Arc<SecretsManagerProvider>,
}

impl TestCatalog {
    pub async fn new() -> Result<Self> {
        let temp_dir = tempdir()
            .map_err(|e| CatalogError::Other(format!("Failed to create temp dir: {}", e)))?;
        let db_path = temp_dir.path().join("test_catalog.db");

        let backend: Arc<DynCatalogBackend> = Arc::new(LocalSqliteBackend::new(&db_path));
        backend.initialize().await?;

        let manager: Arc<dyn SecretsManager> =
            Arc::new(LocalSecretsManager::new(SealingKey::generate()));

        Ok(Self {
            _temp_dir: temp_dir,
            db_path,
            store: Arc::new(SqliteEntityStore::new(Arc::clone(&backend))),
            backend,
            secrets: Arc::new(SecretsManagerProvider::with_manager(manager)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn backend(&self) -> &Arc<DynCatalogBackend> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<SqliteEntityStore> {
        &self.store
    }

    pub fn secrets(&self) -> &Arc<SecretsManagerProvider> {
        &self.secrets
    }

    pub fn builtin_authorizer(&self) -> Arc<dyn Authorizer> {
        Arc::new(PolicyAuthorizer::builtin())
    }

    /// Insert tables in the given order, one microsecond apart.
    pub async fn seed_tables(&self, names: &[&str]) -> Result<Vec<Entity>> {
        self.seed(EntityType::Table, names).await
    }

    /// Insert entities of one type in the given order, one microsecond apart.
    pub async fn seed(&self, entity_type: EntityType, names: &[&str]) -> Result<Vec<Entity>> {
        let base = now_micros();
        let mut seeded = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let mut entity = Entity::new(entity_type, *name);
            entity.created_at = base + chrono::Duration::microseconds(i as i64);
            entity.updated_at = entity.created_at;
            self.store.create(&entity).await?;
            seeded.push(entity);
        }
        Ok(seeded)
    }

    /// Insert a Postgres database service whose password is sealed at rest.
    pub async fn seed_service(&self, name: &str, owner: &str, password: &str) -> Result<Entity> {
        let manager = self.secrets.get()?;
        let config = manager.encrypt(postgres_config(password), ServiceType::Postgres, name)?;

        let mut entity = Entity::new(EntityType::DatabaseService, name);
        entity.owner = Some(owner.to_string());
        entity.service = Some(ServiceType::Postgres.to_string());
        entity.connection = Some(Connection::new(ServiceType::Postgres, config)?);
        self.store.create(&entity).await?;
        Ok(entity)
    }

    pub fn gateway(&self, authorizer: Arc<dyn Authorizer>) -> EntityGateway {
        EntityGateway::new(self.store.clone(), authorizer, Arc::clone(&self.secrets))
    }

    pub fn app_state(&self, authorizer: Arc<dyn Authorizer>) -> AppState {
        AppState {
            backend: Arc::clone(&self.backend),
            gateway: Arc::new(self.gateway(authorizer)),
            secrets: Arc::clone(&self.secrets),
            default_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// API key manager with a low bcrypt cost so tests stay fast.
    pub fn api_keys(&self) -> Arc<ApiKeyManager> {
        let config = ApiKeyConfig {
            bcrypt_cost: 4,
            ..ApiKeyConfig::default()
        };
        Arc::new(ApiKeyManager::with_config(Arc::clone(&self.backend), config))
    }

    /// Router over this catalog plus the key manager guarding it.
    pub fn router(&self, authorizer: Arc<dyn Authorizer>) -> (axum::Router, Arc<ApiKeyManager>) {
        let api_keys = self.api_keys();
        let router = build_router(self.app_state(authorizer), Arc::clone(&api_keys));
        (router, api_keys)
    }
}

/// A bearer-token value for an API key created for `principal`.
pub async fn bearer_for(api_keys: &ApiKeyManager, principal: &Principal) -> Result<String> {
    Ok(format!("Bearer {}", api_keys.create_key(principal).await?))
}

pub fn postgres_config(password: &str) -> ConnectionConfig {
    ConnectionConfig::Database(DatabaseConnection {
        host_port: "db.internal:5432".to_string(),
        username: "etl".to_string(),
        password: Some(SecretValue::new(password)),
        database: Some("analytics".to_string()),
    })
}

/// Cleartext password of a Postgres connection, if present.
pub fn password_of(entity: &Entity) -> Option<&str> {
    match entity.connection.as_ref()?.config.as_ref()? {
        ConnectionConfig::Database(c) => c.password.as_ref().map(|p| p.expose()),
        _ => None,
    }
}
