//! API key authentication
//!
//! Every gateway request is made on behalf of a [`Principal`]. Callers prove
//! who they are with an API key sent as `Authorization: Bearer <key>`; the key
//! resolves to the name, roles and admin flag it was created with.
//!
//! Keys are stored as bcrypt hashes and never in plaintext. Valid keys are
//! cached in memory keyed by a hash of the plaintext, and the whole cache is
//! dropped whenever a key is revoked.
//!
//! ## Configuration
//!
//! - `CATALOG_GATEWAY_API_KEY_PREFIX`: Prefix for generated keys (default: "cgw_")
//! - `CATALOG_GATEWAY_BCRYPT_COST`: bcrypt cost factor (default: 12, range: 4-31)

use bcrypt::{hash, verify};
use catalog_gateway_core::{CatalogError, Principal, Result};
use catalog_gateway_storage::CatalogBackend;
use dashmap::DashMap;
use rand::RngCore;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_API_KEY_PREFIX: &str = "cgw_";
const DEFAULT_API_KEY_LENGTH: usize = 32; // 32 bytes = 64 hex characters
const DEFAULT_BCRYPT_COST: u32 = 12;
const CACHE_TTL_SECS: u64 = 300;

/// Configuration for API key generation and validation
#[derive(Clone, Debug)]
pub struct ApiKeyConfig {
    pub prefix: String,
    pub key_length: usize,
    pub bcrypt_cost: u32,
    pub cache_ttl_secs: u64,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_API_KEY_PREFIX.to_string(),
            key_length: DEFAULT_API_KEY_LENGTH,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            cache_ttl_secs: CACHE_TTL_SECS,
        }
    }
}

impl ApiKeyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prefix: std::env::var("CATALOG_GATEWAY_API_KEY_PREFIX").unwrap_or(defaults.prefix),
            bcrypt_cost: std::env::var("CATALOG_GATEWAY_BCRYPT_COST")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|cost| (4..=31).contains(cost))
                .unwrap_or(defaults.bcrypt_cost),
            ..defaults
        }
    }
}

/// Cached validation result, keyed by a hash of the plaintext key.
#[derive(Clone, Debug)]
struct CachedKey {
    bcrypt_hash: String,
    principal: Principal,
    cached_at: Instant,
}

fn cache_key_from_plaintext(plaintext: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    plaintext.hash(&mut hasher);
    hasher.finish()
}

/// API key metadata (returned by list_keys)
#[derive(Debug, Clone)]
pub struct ApiKeyInfo {
    pub id: i64,
    pub name: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
    pub created_at: String,
    pub revoked_at: Option<String>,
    pub last_used_at: Option<String>,
}

/// Row shape used while scanning candidate keys.
struct StoredKey {
    key_hash: String,
    name: String,
    roles: String,
    is_admin: bool,
    is_bot: bool,
}

impl StoredKey {
    fn into_principal(self) -> Result<Principal> {
        let roles: Vec<String> = serde_json::from_str(&self.roles)?;
        let mut principal = Principal::user(self.name).with_roles(roles);
        principal.is_admin = self.is_admin;
        principal.is_bot = self.is_bot;
        Ok(principal)
    }
}

fn join_error(e: tokio::task::JoinError) -> CatalogError {
    CatalogError::Other(format!("Task join error: {}", e))
}

/// API key manager with in-memory cache
pub struct ApiKeyManager {
    config: ApiKeyConfig,
    backend: Arc<dyn CatalogBackend>,
    cache: Arc<DashMap<u64, CachedKey>>,
    pending_updates: Arc<DashMap<String, Instant>>, // keyed by bcrypt hash
}

impl ApiKeyManager {
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        Self::with_config(backend, ApiKeyConfig::from_env())
    }

    pub fn with_config(backend: Arc<dyn CatalogBackend>, config: ApiKeyConfig) -> Self {
        Self {
            config,
            backend,
            cache: Arc::new(DashMap::new()),
            pending_updates: Arc::new(DashMap::new()),
        }
    }

    /// Create a key for a principal and store its hash.
    ///
    /// Returns the plaintext key. This is the only time it is available.
    pub async fn create_key(&self, principal: &Principal) -> Result<String> {
        let plaintext_key = self.generate_api_key();

        let key_hash = {
            let plaintext = plaintext_key.clone();
            let cost = self.config.bcrypt_cost;
            tokio::task::spawn_blocking(move || hash(&plaintext, cost))
                .await
                .map_err(join_error)?
                .map_err(|e| CatalogError::Other(format!("Failed to hash API key: {}", e)))?
        };

        let roles = serde_json::to_string(&principal.roles)?;
        let name = principal.name.clone();
        let is_admin = principal.is_admin;
        let is_bot = principal.is_bot;
        let conn = self.backend.get_connection().await?;

        tokio::task::spawn_blocking(move || {
            conn.execute(
                "INSERT INTO api_keys (key_hash, name, roles, is_admin, is_bot, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
                rusqlite::params![key_hash, name, roles, is_admin, is_bot],
            )?;
            Ok::<_, CatalogError>(())
        })
        .await
        .map_err(join_error)??;

        info!(name = %principal.name, is_admin = principal.is_admin, "Created new API key");
        Ok(plaintext_key)
    }

    /// Resolve an API key to the principal it was created for.
    ///
    /// Returns `Ok(None)` for unknown or revoked keys.
    pub async fn validate_key(&self, plaintext_key: &str) -> Result<Option<Principal>> {
        let cache_key = cache_key_from_plaintext(plaintext_key);

        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.cached_at.elapsed() < Duration::from_secs(self.config.cache_ttl_secs) {
                debug!("API key validation: cache hit");
                self.mark_key_used(&cached.bcrypt_hash);
                return Ok(Some(cached.principal.clone()));
            }
        }
        // Expired entries are dropped outside the read guard
        self.cache.remove(&cache_key);

        let conn = self.backend.get_connection().await?;
        let plaintext = plaintext_key.to_string();

        // bcrypt hashes are salted, so every live key is a candidate
        let found = tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare(
                "SELECT key_hash, name, roles, is_admin, is_bot
                 FROM api_keys WHERE revoked_at IS NULL",
            )?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(StoredKey {
                        key_hash: row.get(0)?,
                        name: row.get(1)?,
                        roles: row.get(2)?,
                        is_admin: row.get(3)?,
                        is_bot: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok::<_, CatalogError>(
                keys.into_iter()
                    .find(|key| verify(&plaintext, &key.key_hash).unwrap_or(false)),
            )
        })
        .await
        .map_err(join_error)??;

        let Some(stored) = found else {
            warn!("API key validation failed");
            return Ok(None);
        };

        let bcrypt_hash = stored.key_hash.clone();
        let principal = stored.into_principal()?;
        self.cache.insert(
            cache_key,
            CachedKey {
                bcrypt_hash: bcrypt_hash.clone(),
                principal: principal.clone(),
                cached_at: Instant::now(),
            },
        );
        self.mark_key_used(&bcrypt_hash);

        debug!(name = %principal.name, "API key validated successfully");
        Ok(Some(principal))
    }

    /// List all API keys, most recent first
    pub async fn list_keys(&self) -> Result<Vec<ApiKeyInfo>> {
        let conn = self.backend.get_connection().await?;

        tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare(
                "SELECT id, name, roles, is_admin, created_at, revoked_at, last_used_at
                 FROM api_keys ORDER BY created_at DESC, id DESC",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(
                    |(id, name, roles, is_admin, created_at, revoked_at, last_used_at)| {
                        Ok(ApiKeyInfo {
                            id,
                            name,
                            roles: serde_json::from_str(&roles)?,
                            is_admin,
                            created_at,
                            revoked_at,
                            last_used_at,
                        })
                    },
                )
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(join_error)?
    }

    /// Revoke an API key by ID (soft delete)
    ///
    /// Clears the entire cache so a revoked key stops working immediately.
    pub async fn revoke_key(&self, id: i64) -> Result<bool> {
        let conn = self.backend.get_connection().await?;

        let rows_affected = tokio::task::spawn_blocking(move || {
            conn.execute(
                "UPDATE api_keys SET revoked_at = datetime('now') WHERE id = ?1 AND revoked_at IS NULL",
                rusqlite::params![id],
            )
        })
        .await
        .map_err(join_error)??;

        if rows_affected > 0 {
            info!(id = id, "Revoked API key");
            // We can't map an ID back to a cache key
            self.cache.clear();
            self.pending_updates.clear();
            debug!("Cleared auth cache after key revocation");
            Ok(true)
        } else {
            warn!(id = id, "API key not found or already revoked");
            Ok(false)
        }
    }

    /// Write queued last-used timestamps in one transaction.
    pub async fn flush_pending_updates(&self) -> Result<usize> {
        let updates: Vec<String> = self
            .pending_updates
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        if updates.is_empty() {
            return Ok(0);
        }

        let count = updates.len();
        let mut conn = self.backend.get_connection().await?;
        tokio::task::spawn_blocking(move || {
            let tx = conn.transaction()?;
            for key_hash in &updates {
                tx.execute(
                    "UPDATE api_keys SET last_used_at = datetime('now') WHERE key_hash = ?1",
                    rusqlite::params![key_hash],
                )?;
            }
            tx.commit()?;
            Ok::<_, CatalogError>(())
        })
        .await
        .map_err(join_error)??;

        self.pending_updates.clear();
        debug!(count = count, "Flushed last_used_at updates");
        Ok(count)
    }

    fn generate_api_key(&self) -> String {
        let mut rng = rand::rngs::OsRng;
        let mut bytes = vec![0u8; self.config.key_length];
        rng.fill_bytes(&mut bytes);

        format!("{}{}", self.config.prefix, hex::encode(&bytes))
    }

    fn mark_key_used(&self, bcrypt_hash: &str) {
        self.pending_updates
            .insert(bcrypt_hash.to_string(), Instant::now());
    }
}

/// Axum middleware requiring a valid API key
///
/// On success the resolved [`Principal`] is attached to the request
/// extensions. Missing or invalid keys get a 401 before any handler runs.
pub async fn require_api_key(
    axum::extract::Extension(manager): axum::extract::Extension<Arc<ApiKeyManager>>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> std::result::Result<axum::response::Response, (axum::http::StatusCode, axum::Json<serde_json::Value>)>
{
    let request_id = uuid::Uuid::new_v4().to_string();

    let Some(key) = extract_api_key(&req) else {
        warn!("API key authentication failed: no key provided");
        return Err(unauthorized(
            "API key required. Provide it as an Authorization: Bearer header",
            request_id,
        ));
    };

    match manager.validate_key(&key).await {
        Ok(Some(principal)) => {
            debug!(principal = %principal.name, "Authenticated API key");
            req.extensions_mut().insert(principal);
            Ok(next.run(req).await)
        }
        Ok(None) => Err(unauthorized("Invalid API key", request_id)),
        Err(e) => {
            warn!(error = %e, request_id = %request_id, "API key validation error");
            Err((
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({
                    "error": "Failed to validate API key",
                    "request_id": request_id
                })),
            ))
        }
    }
}

fn unauthorized(
    message: &str,
    request_id: String,
) -> (axum::http::StatusCode, axum::Json<serde_json::Value>) {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({
            "error": message,
            "request_id": request_id
        })),
    )
}

/// Extract the bearer token. Keys in query strings are not accepted since
/// they end up in access logs.
fn extract_api_key(req: &axum::extract::Request) -> Option<String> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_gateway_storage::LocalSqliteBackend;

    async fn manager() -> (tempfile::TempDir, ApiKeyManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalSqliteBackend::new(temp_dir.path().join("test.db"));
        backend.initialize().await.unwrap();

        let config = ApiKeyConfig {
            bcrypt_cost: 4,
            ..ApiKeyConfig::default()
        };
        (temp_dir, ApiKeyManager::with_config(Arc::new(backend), config))
    }

    #[tokio::test]
    async fn test_create_and_validate_key() {
        let (_dir, manager) = manager().await;

        let steward = Principal::user("steward").with_roles(["DataSteward"]);
        let plaintext = manager.create_key(&steward).await.unwrap();
        assert!(plaintext.starts_with("cgw_"));
        assert_eq!(plaintext.len(), 4 + 64);

        let principal = manager.validate_key(&plaintext).await.unwrap().unwrap();
        assert_eq!(principal, steward);

        assert!(manager.validate_key("cgw_invalid").await.unwrap().is_none());
        assert!(manager.validate_key("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admin_flag_round_trips() {
        let (_dir, manager) = manager().await;
        let plaintext = manager.create_key(&Principal::admin("root")).await.unwrap();

        let principal = manager.validate_key(&plaintext).await.unwrap().unwrap();
        assert!(principal.is_admin);
        assert!(principal.holds_admin_rights());
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let (_dir, manager) = manager().await;
        let plaintext = manager.create_key(&Principal::user("ann")).await.unwrap();

        manager.validate_key(&plaintext).await.unwrap();
        assert!(manager
            .cache
            .contains_key(&cache_key_from_plaintext(&plaintext)));

        let principal = manager.validate_key(&plaintext).await.unwrap();
        assert_eq!(principal.map(|p| p.name).as_deref(), Some("ann"));
    }

    #[tokio::test]
    async fn test_revoke_clears_cache() {
        let (_dir, manager) = manager().await;
        let plaintext = manager.create_key(&Principal::user("ann")).await.unwrap();
        assert!(manager.validate_key(&plaintext).await.unwrap().is_some());
        assert!(!manager.pending_updates.is_empty());

        let keys = manager.list_keys().await.unwrap();
        assert!(manager.revoke_key(keys[0].id).await.unwrap());

        assert_eq!(manager.cache.len(), 0, "Cache should be cleared after revoke");
        assert_eq!(manager.pending_updates.len(), 0);
        assert!(manager.validate_key(&plaintext).await.unwrap().is_none());

        // Second revoke is a no-op
        assert!(!manager.revoke_key(keys[0].id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys() {
        let (_dir, manager) = manager().await;
        manager.create_key(&Principal::user("key1")).await.unwrap();
        manager
            .create_key(&Principal::user("key2").with_roles(["Auditor"]))
            .await
            .unwrap();

        let keys = manager.list_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "key2"); // Most recent first
        assert_eq!(keys[0].roles, vec!["Auditor".to_string()]);
        assert_eq!(keys[1].name, "key1");
    }

    #[tokio::test]
    async fn test_flush_pending_updates() {
        let (_dir, manager) = manager().await;
        let plaintext = manager.create_key(&Principal::user("ann")).await.unwrap();

        manager.validate_key(&plaintext).await.unwrap();
        assert_eq!(manager.flush_pending_updates().await.unwrap(), 1);
        assert_eq!(manager.flush_pending_updates().await.unwrap(), 0);

        let keys = manager.list_keys().await.unwrap();
        assert!(keys[0].last_used_at.is_some());
    }

    #[test]
    fn test_extract_api_key() {
        let req = axum::http::Request::builder()
            .header("Authorization", "Bearer cgw_abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_api_key(&req).as_deref(), Some("cgw_abc"));

        let req = axum::http::Request::builder()
            .uri("/api/v1/tables?api_key=cgw_abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(extract_api_key(&req).is_none());

        let req = axum::http::Request::builder()
            .header("Authorization", "Basic Zm9vOmJhcg==")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(extract_api_key(&req).is_none());
    }
}
