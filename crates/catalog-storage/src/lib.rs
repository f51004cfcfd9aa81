//! Catalog Gateway Storage
//!
//! Persistence for the catalog entity gateway: a storage backend abstraction
//! over a local SQLite file, and the [`EntityStore`] page-fetch interface the
//! gateway's lister consumes.

use catalog_gateway_core::{init_sqlite_schema, CatalogError, Result};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub mod entity_store;

pub use entity_store::{EntityStore, PageQuery, SqliteEntityStore};

/// Convenience alias for trait objects.
pub type DynCatalogBackend = dyn CatalogBackend;

/// Backend abstraction for catalog storage (async)
///
/// # Safety
///
/// **CRITICAL**: Never hold `rusqlite::Connection` across `.await` points
/// while other work is pending on the same task. Move it into
/// `tokio::task::spawn_blocking` for every query.
///
/// # Manual Async Trait
///
/// This trait uses manual async implementation (`Pin<Box<dyn Future>>`)
/// instead of the async-trait crate for explicit Send bounds.
pub trait CatalogBackend: Send + Sync {
    /// Open a connection with foreign keys enabled and the schema in place.
    fn get_connection(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<rusqlite::Connection>> + Send + '_>>;

    /// Check if the catalog exists
    fn exists(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Initialize a new catalog (create the database file)
    fn initialize(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Parsed representation of a catalog URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLocation {
    Local(PathBuf),
}

impl fmt::Display for CatalogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogLocation::Local(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Parse a catalog URI into a structured location.
///
/// Accepts `file://` URIs and raw paths. Object-store schemes are rejected:
/// the gateway reads its catalog from a local file.
pub fn parse_catalog_uri(uri: &str) -> Result<CatalogLocation> {
    if let Some((scheme, _)) = uri.split_once("://") {
        if scheme != "file" {
            return Err(CatalogError::Other(format!(
                "Unsupported catalog URI scheme '{}://' (expected file:// or a path)",
                scheme
            )));
        }
    }

    let path = uri
        .strip_prefix("file://")
        .map(|p| p.to_string())
        .unwrap_or_else(|| uri.to_string());

    // Only validate if file:// prefix was present
    if uri.starts_with("file://") {
        catalog_gateway_core::validation::validate_file_uri_path(&path)?;
    }

    Ok(CatalogLocation::Local(PathBuf::from(path)))
}

/// Build a backend from a catalog URI.
pub fn backend_from_uri(uri: &str) -> Result<Box<dyn CatalogBackend>> {
    match parse_catalog_uri(uri)? {
        CatalogLocation::Local(path) => Ok(Box::new(LocalSqliteBackend::new(path))),
    }
}

/// Local filesystem SQLite backend
///
/// Stores the catalog as a SQLite file on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalSqliteBackend {
    /// Path to the SQLite database file
    path: PathBuf,
}

impl LocalSqliteBackend {
    /// Create a new local SQLite backend
    ///
    /// # Example
    /// ```no_run
    /// use catalog_gateway_storage::LocalSqliteBackend;
    ///
    /// let backend = LocalSqliteBackend::new("catalog.db");
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_catalog(path: &Path) -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    init_sqlite_schema(&conn)?;
    Ok(conn)
}

impl CatalogBackend for LocalSqliteBackend {
    fn get_connection(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<rusqlite::Connection>> + Send + '_>> {
        let path = self.path.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || open_catalog(&path))
                .await
                .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?
        })
    }

    fn exists(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let path = self.path.clone();
        Box::pin(async move { Ok(path.exists()) })
    }

    fn initialize(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = self.path.clone();
        Box::pin(async move {
            if path.exists() {
                return Err(CatalogError::Other(format!(
                    "Catalog already exists at {:?}",
                    path
                )));
            }

            tokio::task::spawn_blocking(move || open_catalog(&path).map(|_| ()))
                .await
                .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?
        })
    }
}
