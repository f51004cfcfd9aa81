//! Secrets management for service connections
//!
//! Connection secrets are never stored in cleartext. A [`SecretsManager`]
//! converts a [`ConnectionConfig`] between its stored form and cleartext:
//!
//! - [`LocalSecretsManager`] seals each secret in place with ChaCha20-Poly1305
//!   (`sealed:v1:<base64(nonce || ciphertext)>`)
//! - [`ReferenceSecretsManager`] moves each secret into a [`SecretStore`] and
//!   leaves a `secret:/<category>/<serviceType>/<entity>/<field>` reference
//!
//! Both conversions are idempotent: sealing a sealed value or decrypting a
//! cleartext value leaves it unchanged.
//!
//! The process-wide manager is built exactly once by a
//! [`SecretsManagerProvider`], which is created at startup and handed to the
//! gateway explicitly.

use crate::config::{GatewayConfig, SecretsMode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use catalog_gateway_core::connection::{REFERENCE_PREFIX, SEALED_PREFIX};
use catalog_gateway_core::{CatalogError, ConnectionConfig, Result, SecretValue, ServiceType};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the sealing key in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Converts connection configs between stored and cleartext form.
pub trait SecretsManager: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether secrets are sealed in the catalog itself.
    fn is_local_mode(&self) -> bool;

    /// Encrypt (`encrypt = true`) or decrypt every secret in `config`.
    ///
    /// `service_type` and `entity_name` identify where the secrets belong;
    /// the config's category must match the service type's.
    fn decrypt_or_encrypt(
        &self,
        config: ConnectionConfig,
        service_type: ServiceType,
        entity_name: &str,
        encrypt: bool,
    ) -> Result<ConnectionConfig>;

    fn encrypt(
        &self,
        config: ConnectionConfig,
        service_type: ServiceType,
        entity_name: &str,
    ) -> Result<ConnectionConfig> {
        self.decrypt_or_encrypt(config, service_type, entity_name, true)
    }

    fn decrypt(
        &self,
        config: ConnectionConfig,
        service_type: ServiceType,
        entity_name: &str,
    ) -> Result<ConnectionConfig> {
        self.decrypt_or_encrypt(config, service_type, entity_name, false)
    }
}

fn check_category(config: &ConnectionConfig, service_type: ServiceType) -> Result<()> {
    if config.category() != service_type.category() {
        return Err(CatalogError::SecretsBackend(format!(
            "{} connection config does not match service type {}",
            config.category(),
            service_type
        )));
    }
    Ok(())
}

// ============================================================================
// Local mode
// ============================================================================

/// 256-bit sealing key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey {
    bytes: [u8; KEY_SIZE],
}

impl SealingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse a standard base64 key, as produced by [`SealingKey::to_base64`].
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| CatalogError::ValidationError(format!("invalid sealing key: {}", e)))?,
        );
        let bytes: [u8; KEY_SIZE] = decoded.as_slice().try_into().map_err(|_| {
            CatalogError::ValidationError(format!(
                "sealing key must be {} bytes, got {}",
                KEY_SIZE,
                decoded.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals secrets in place with ChaCha20-Poly1305.
#[derive(Debug)]
pub struct LocalSecretsManager {
    key: SealingKey,
}

impl LocalSecretsManager {
    pub fn new(key: SealingKey) -> Self {
        Self { key }
    }

    fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(self.key.as_bytes().into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CatalogError::SecretsBackend(format!("encryption failed: {}", e)))?;

        let mut bytes = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        bytes.extend_from_slice(&nonce_bytes);
        bytes.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", SEALED_PREFIX, STANDARD.encode(&bytes)))
    }

    fn unseal(&self, sealed: &str) -> Result<String> {
        let encoded = sealed.strip_prefix(SEALED_PREFIX).ok_or_else(|| {
            CatalogError::SecretsBackend("value is not a sealed secret".to_string())
        })?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CatalogError::SecretsBackend(format!("invalid base64: {}", e)))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CatalogError::SecretsBackend(
                "sealed secret too short".to_string(),
            ));
        }

        let cipher = ChaCha20Poly1305::new(self.key.as_bytes().into());
        let nonce = Nonce::from_slice(&bytes[..NONCE_SIZE]);
        let plaintext = Zeroizing::new(cipher.decrypt(nonce, &bytes[NONCE_SIZE..]).map_err(|_| {
            CatalogError::SecretsBackend(
                "decryption failed (wrong key or tampered data)".to_string(),
            )
        })?);

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| CatalogError::SecretsBackend(format!("invalid UTF-8: {}", e)))
    }
}

impl SecretsManager for LocalSecretsManager {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_local_mode(&self) -> bool {
        true
    }

    fn decrypt_or_encrypt(
        &self,
        mut config: ConnectionConfig,
        service_type: ServiceType,
        entity_name: &str,
        encrypt: bool,
    ) -> Result<ConnectionConfig> {
        check_category(&config, service_type)?;

        for (field, value) in config.secrets_mut() {
            let raw = value.expose();
            if raw.starts_with(REFERENCE_PREFIX) {
                return Err(CatalogError::SecretsBackend(format!(
                    "{}.{} holds a secret store reference, which local mode cannot resolve",
                    entity_name, field
                )));
            }

            let sealed = raw.starts_with(SEALED_PREFIX);
            if encrypt && !sealed {
                *value = SecretValue::new(self.seal(raw)?);
            } else if !encrypt && sealed {
                *value = SecretValue::new(self.unseal(raw)?);
            }
        }

        debug!(entity = %entity_name, service_type = %service_type, encrypt, "Processed local secrets");
        Ok(config)
    }
}

// ============================================================================
// Reference mode
// ============================================================================

/// Backing store for secrets moved out of the catalog.
pub trait SecretStore: Send + Sync {
    fn get(&self, path: &str) -> Result<Option<String>>;
    fn put(&self, path: &str, value: &str) -> Result<()>;
}

/// Process-local store, for tests and single-process deployments.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: DashMap<String, Zeroizing<String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn remove(&self, path: &str) {
        self.secrets.remove(path);
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, path: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(path).map(|v| v.as_str().to_string()))
    }

    fn put(&self, path: &str, value: &str) -> Result<()> {
        self.secrets
            .insert(path.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }
}

/// Secret store kept in its own SQLite file, shared between the CLI that
/// registers services and the server that reads them.
#[derive(Debug, Clone)]
pub struct SqliteSecretStore {
    path: PathBuf,
}

impl SqliteSecretStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> Result<rusqlite::Connection> {
        let conn = rusqlite::Connection::open(&self.path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS secrets (
               path TEXT PRIMARY KEY,
               value TEXT NOT NULL,
               updated_at TEXT NOT NULL
             );",
        )?;
        Ok(conn)
    }
}

impl SecretStore for SqliteSecretStore {
    fn get(&self, path: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        let conn = self
            .open()
            .map_err(|e| CatalogError::SecretsBackend(format!("secret store unavailable: {}", e)))?;
        conn.query_row("SELECT value FROM secrets WHERE path = ?1", [path], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| CatalogError::SecretsBackend(format!("secret store read failed: {}", e)))
    }

    fn put(&self, path: &str, value: &str) -> Result<()> {
        let conn = self
            .open()
            .map_err(|e| CatalogError::SecretsBackend(format!("secret store unavailable: {}", e)))?;
        conn.execute(
            "INSERT INTO secrets (path, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(path) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![path, value, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| CatalogError::SecretsBackend(format!("secret store write failed: {}", e)))?;
        Ok(())
    }
}

/// Replaces secrets with references into a [`SecretStore`].
pub struct ReferenceSecretsManager {
    store: Arc<dyn SecretStore>,
}

impl ReferenceSecretsManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySecretStore::new()))
    }

    /// Reference path for one secret field.
    pub fn reference_for(service_type: ServiceType, entity_name: &str, field: &str) -> String {
        format!(
            "{}{}/{}/{}/{}",
            REFERENCE_PREFIX,
            service_type.category(),
            service_type,
            entity_name,
            field
        )
    }
}

impl SecretsManager for ReferenceSecretsManager {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn is_local_mode(&self) -> bool {
        false
    }

    fn decrypt_or_encrypt(
        &self,
        mut config: ConnectionConfig,
        service_type: ServiceType,
        entity_name: &str,
        encrypt: bool,
    ) -> Result<ConnectionConfig> {
        check_category(&config, service_type)?;

        for (field, value) in config.secrets_mut() {
            let raw = value.expose();
            if raw.starts_with(SEALED_PREFIX) {
                return Err(CatalogError::SecretsBackend(format!(
                    "{}.{} is sealed with a local key, which reference mode cannot open",
                    entity_name, field
                )));
            }

            let is_reference = raw.starts_with(REFERENCE_PREFIX);
            if encrypt && !is_reference {
                let reference = Self::reference_for(service_type, entity_name, field);
                self.store.put(&reference, raw)?;
                *value = SecretValue::new(reference);
            } else if !encrypt && is_reference {
                let secret = self.store.get(raw)?.ok_or_else(|| {
                    CatalogError::SecretsBackend(format!("missing secret reference {}", raw))
                })?;
                *value = SecretValue::new(secret);
            }
        }

        debug!(entity = %entity_name, service_type = %service_type, encrypt, "Processed referenced secrets");
        Ok(config)
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Builds the process-wide secrets manager exactly once.
///
/// Concurrent first callers of [`SecretsManagerProvider::get`] all observe
/// the same instance; a failed construction is retried by the next caller.
pub struct SecretsManagerProvider {
    mode: SecretsMode,
    key: Option<Zeroizing<String>>,
    store_path: Option<PathBuf>,
    cell: OnceCell<Arc<dyn SecretsManager>>,
}

impl SecretsManagerProvider {
    pub fn new(mode: SecretsMode, key: Option<String>, store_path: Option<PathBuf>) -> Self {
        Self {
            mode,
            key: key.map(Zeroizing::new),
            store_path,
            cell: OnceCell::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.secrets_mode,
            config.secrets_key.clone(),
            config.secret_store.clone(),
        )
    }

    /// Provider that hands out an already built manager.
    pub fn with_manager(manager: Arc<dyn SecretsManager>) -> Self {
        let mode = if manager.is_local_mode() {
            SecretsMode::Local
        } else {
            SecretsMode::Reference
        };
        Self {
            mode,
            key: None,
            store_path: None,
            cell: OnceCell::with_value(manager),
        }
    }

    pub fn mode(&self) -> SecretsMode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get(&self) -> Result<Arc<dyn SecretsManager>> {
        self.cell.get_or_try_init(|| self.build()).cloned()
    }

    fn build(&self) -> Result<Arc<dyn SecretsManager>> {
        let manager: Arc<dyn SecretsManager> = match self.mode {
            SecretsMode::Local => {
                let encoded = self.key.as_ref().ok_or_else(|| {
                    CatalogError::SecretsBackend(
                        "local secrets mode requires a sealing key".to_string(),
                    )
                })?;
                let key = SealingKey::from_base64(encoded)
                    .map_err(|e| CatalogError::SecretsBackend(e.to_string()))?;
                Arc::new(LocalSecretsManager::new(key))
            }
            SecretsMode::Reference => match &self.store_path {
                Some(path) => Arc::new(ReferenceSecretsManager::new(Arc::new(
                    SqliteSecretStore::new(path),
                ))),
                None => {
                    warn!("No secret store configured, references will live in process memory");
                    Arc::new(ReferenceSecretsManager::in_memory())
                }
            },
        };

        info!(mode = %self.mode, manager = manager.name(), "Initialized secrets manager");
        Ok(manager)
    }
}
