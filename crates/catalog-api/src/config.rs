//! Gateway server configuration
//!
//! All settings come from environment variables with safe defaults:
//!
//! - `CATALOG_GATEWAY_DB`: catalog file path or `file://` URI (default: `catalog_gateway.db`)
//! - `CATALOG_GATEWAY_PORT`: listen port (default: 8080)
//! - `CATALOG_GATEWAY_AUTHORIZER`: `policy` or `noop` (default: `policy`)
//! - `CATALOG_GATEWAY_POLICY_FILE`: JSON role policies (default: built-in policies)
//! - `CATALOG_GATEWAY_SECRETS_MODE`: `local` or `reference` (default: `local`)
//! - `CATALOG_GATEWAY_SECRETS_KEY`: base64 256-bit sealing key, required in local mode
//! - `CATALOG_GATEWAY_SECRET_STORE`: SQLite secret store for reference mode (default: in memory)
//! - `CATALOG_GATEWAY_DEFAULT_LIMIT`: page size when none is requested (default: 10)
//! - `CATALOG_GATEWAY_MAX_LIMIT`: largest accepted page size (default: 1000)
//! - `CATALOG_GATEWAY_REDACTION_CONCURRENCY`: items redacted in parallel (default: 8)

use catalog_gateway_core::{CatalogError, Result, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "catalog_gateway.db";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REDACTION_CONCURRENCY: usize = 8;

/// Which authorizer implementation the server runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizerKind {
    /// Role policies
    #[default]
    Policy,
    /// Allow everything (trusted deployments only)
    Noop,
}

impl FromStr for AuthorizerKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "policy" => Ok(AuthorizerKind::Policy),
            "noop" => Ok(AuthorizerKind::Noop),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown authorizer '{}' (expected policy or noop)",
                s
            ))),
        }
    }
}

/// Where connection secrets live at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretsMode {
    /// Sealed in place in the catalog row
    #[default]
    Local,
    /// Moved to a secret store, leaving references
    Reference,
}

impl FromStr for SecretsMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SecretsMode::Local),
            "reference" => Ok(SecretsMode::Reference),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown secrets mode '{}' (expected local or reference)",
                s
            ))),
        }
    }
}

impl fmt::Display for SecretsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretsMode::Local => write!(f, "local"),
            SecretsMode::Reference => write!(f, "reference"),
        }
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub db_path: String,
    pub port: u16,
    pub authorizer: AuthorizerKind,
    pub policy_file: Option<PathBuf>,
    pub secrets_mode: SecretsMode,
    /// Base64 sealing key for local mode
    pub secrets_key: Option<String>,
    /// Secret store file for reference mode
    pub secret_store: Option<PathBuf>,
    pub default_limit: usize,
    pub max_limit: usize,
    pub redaction_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            port: DEFAULT_PORT,
            authorizer: AuthorizerKind::default(),
            policy_file: None,
            secrets_mode: SecretsMode::default(),
            secrets_key: None,
            secret_store: None,
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
            redaction_concurrency: DEFAULT_REDACTION_CONCURRENCY,
        }
    }
}

// Custom Debug to avoid printing the sealing key
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("authorizer", &self.authorizer)
            .field("policy_file", &self.policy_file)
            .field("secrets_mode", &self.secrets_mode)
            .field(
                "secrets_key",
                &self.secrets_key.as_ref().map(|_| "***REDACTED***"),
            )
            .field("secret_store", &self.secret_store)
            .field("default_limit", &self.default_limit)
            .field("max_limit", &self.max_limit)
            .field("redaction_concurrency", &self.redaction_concurrency)
            .finish()
    }
}

fn env_parsed<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| {
            CatalogError::ValidationError(format!("{} is invalid: {}", name, e))
        }),
        _ => Ok(default),
    }
}

impl GatewayConfig {
    /// Read the configuration from `CATALOG_GATEWAY_*` environment variables.
    ///
    /// Unset variables fall back to defaults; set but unparseable ones are an
    /// error rather than being silently replaced.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let db_path = std::env::var("CATALOG_GATEWAY_DB").unwrap_or(defaults.db_path);

        let policy_file = std::env::var("CATALOG_GATEWAY_POLICY_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let secrets_key = std::env::var("CATALOG_GATEWAY_SECRETS_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let secret_store = std::env::var("CATALOG_GATEWAY_SECRET_STORE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            db_path,
            port: env_parsed("CATALOG_GATEWAY_PORT", defaults.port)?,
            authorizer: env_parsed("CATALOG_GATEWAY_AUTHORIZER", defaults.authorizer)?,
            policy_file,
            secrets_mode: env_parsed("CATALOG_GATEWAY_SECRETS_MODE", defaults.secrets_mode)?,
            secrets_key,
            secret_store,
            default_limit: env_parsed("CATALOG_GATEWAY_DEFAULT_LIMIT", defaults.default_limit)?,
            max_limit: env_parsed("CATALOG_GATEWAY_MAX_LIMIT", defaults.max_limit)?,
            redaction_concurrency: env_parsed(
                "CATALOG_GATEWAY_REDACTION_CONCURRENCY",
                defaults.redaction_concurrency,
            )?,
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 || self.max_limit > MAX_PAGE_LIMIT {
            return Err(CatalogError::ValidationError(format!(
                "CATALOG_GATEWAY_MAX_LIMIT must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(CatalogError::ValidationError(format!(
                "CATALOG_GATEWAY_DEFAULT_LIMIT must be between 1 and {}",
                self.max_limit
            )));
        }
        if self.redaction_concurrency == 0 {
            return Err(CatalogError::ValidationError(
                "CATALOG_GATEWAY_REDACTION_CONCURRENCY must be at least 1".into(),
            ));
        }
        if self.secrets_mode == SecretsMode::Local && self.secrets_key.is_none() {
            return Err(CatalogError::ValidationError(
                "CATALOG_GATEWAY_SECRETS_KEY is required in local secrets mode \
                 (generate one with `catalog-gateway generate-key`)"
                    .into(),
            ));
        }
        Ok(())
    }
}
