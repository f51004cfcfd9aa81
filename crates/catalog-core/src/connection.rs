//! Service connection payloads.
//!
//! A [`Connection`] pairs a [`ServiceType`] with a [`ConnectionConfig`] whose
//! variant must match the service type's category. Secret-bearing fields are
//! held as [`SecretValue`]s, which never print their contents.

use crate::{CatalogError, EntityType, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of a secret sealed in place by the local secrets manager.
pub const SEALED_PREFIX: &str = "sealed:v1:";

/// Prefix of a secret moved out to a secret store, leaving a reference.
pub const REFERENCE_PREFIX: &str = "secret:/";

/// Broad family a service belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Database,
    Dashboard,
    Pipeline,
    Storage,
}

impl ServiceCategory {
    /// Entity type of services in this category.
    pub fn entity_type(&self) -> EntityType {
        match self {
            ServiceCategory::Database => EntityType::DatabaseService,
            ServiceCategory::Dashboard => EntityType::DashboardService,
            ServiceCategory::Pipeline => EntityType::PipelineService,
            ServiceCategory::Storage => EntityType::StorageService,
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCategory::Database => write!(f, "database"),
            ServiceCategory::Dashboard => write!(f, "dashboard"),
            ServiceCategory::Pipeline => write!(f, "pipeline"),
            ServiceCategory::Storage => write!(f, "storage"),
        }
    }
}

/// Closed registry of supported service implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Postgres,
    Mysql,
    Snowflake,
    Looker,
    Tableau,
    Airflow,
    Dagster,
    S3,
    Gcs,
}

impl ServiceType {
    pub const ALL: [ServiceType; 9] = [
        ServiceType::Postgres,
        ServiceType::Mysql,
        ServiceType::Snowflake,
        ServiceType::Looker,
        ServiceType::Tableau,
        ServiceType::Airflow,
        ServiceType::Dagster,
        ServiceType::S3,
        ServiceType::Gcs,
    ];

    pub fn category(&self) -> ServiceCategory {
        match self {
            ServiceType::Postgres | ServiceType::Mysql | ServiceType::Snowflake => {
                ServiceCategory::Database
            }
            ServiceType::Looker | ServiceType::Tableau => ServiceCategory::Dashboard,
            ServiceType::Airflow | ServiceType::Dagster => ServiceCategory::Pipeline,
            ServiceType::S3 | ServiceType::Gcs => ServiceCategory::Storage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Postgres => "Postgres",
            ServiceType::Mysql => "Mysql",
            ServiceType::Snowflake => "Snowflake",
            ServiceType::Looker => "Looker",
            ServiceType::Tableau => "Tableau",
            ServiceType::Airflow => "Airflow",
            ServiceType::Dagster => "Dagster",
            ServiceType::S3 => "S3",
            ServiceType::Gcs => "Gcs",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|service_type| service_type.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CatalogError::ValidationError(format!("Unknown service type: {}", s)))
    }
}

/// A sensitive string value.
///
/// The `Debug` implementation masks the contents so secrets never end up in
/// logs by accident.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value: cleartext, a sealed token or a store reference.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when the value is in stored form rather than cleartext.
    pub fn is_sealed(&self) -> bool {
        self.0.starts_with(SEALED_PREFIX) || self.0.starts_with(REFERENCE_PREFIX)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***REDACTED***\"")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConnection {
    pub host_port: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConnection {
    pub host_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConnection {
    pub host_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<SecretValue>,
}

/// Connection configuration, one variant per service category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ConnectionConfig {
    Database(DatabaseConnection),
    Dashboard(DashboardConnection),
    Pipeline(PipelineConnection),
    Storage(StorageConnection),
}

impl ConnectionConfig {
    pub fn category(&self) -> ServiceCategory {
        match self {
            ConnectionConfig::Database(_) => ServiceCategory::Database,
            ConnectionConfig::Dashboard(_) => ServiceCategory::Dashboard,
            ConnectionConfig::Pipeline(_) => ServiceCategory::Pipeline,
            ConnectionConfig::Storage(_) => ServiceCategory::Storage,
        }
    }

    /// Secret-bearing fields that are set, with their field names.
    pub fn secrets(&self) -> Vec<(&'static str, &SecretValue)> {
        let field = match self {
            ConnectionConfig::Database(c) => ("password", c.password.as_ref()),
            ConnectionConfig::Dashboard(c) => ("client_secret", c.client_secret.as_ref()),
            ConnectionConfig::Pipeline(c) => ("token", c.token.as_ref()),
            ConnectionConfig::Storage(c) => ("secret_access_key", c.secret_access_key.as_ref()),
        };
        match field {
            (name, Some(value)) => vec![(name, value)],
            (_, None) => Vec::new(),
        }
    }

    /// Mutable access to the secret-bearing fields that are set.
    pub fn secrets_mut(&mut self) -> Vec<(&'static str, &mut SecretValue)> {
        let field = match self {
            ConnectionConfig::Database(c) => ("password", c.password.as_mut()),
            ConnectionConfig::Dashboard(c) => ("client_secret", c.client_secret.as_mut()),
            ConnectionConfig::Pipeline(c) => ("token", c.token.as_mut()),
            ConnectionConfig::Storage(c) => ("secret_access_key", c.secret_access_key.as_mut()),
        };
        match field {
            (name, Some(value)) => vec![(name, value)],
            (_, None) => Vec::new(),
        }
    }

    /// Whether any secret is still in stored form.
    pub fn has_sealed_secrets(&self) -> bool {
        self.secrets().iter().any(|(_, value)| value.is_sealed())
    }
}

/// Service connection attached to a service entity.
///
/// `config` is `None` once the connection has been redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub service_type: ServiceType,
    pub config: Option<ConnectionConfig>,
}

impl Connection {
    /// Build a connection, rejecting a config of the wrong category.
    pub fn new(service_type: ServiceType, config: ConnectionConfig) -> Result<Self> {
        let connection = Self {
            service_type,
            config: Some(config),
        };
        connection.validate()?;
        Ok(connection)
    }

    /// Check that the config variant matches the service type.
    pub fn validate(&self) -> Result<()> {
        match &self.config {
            Some(config) if config.category() != self.service_type.category() => {
                Err(CatalogError::ValidationError(format!(
                    "{} connection config does not match service type {} ({})",
                    config.category(),
                    self.service_type,
                    self.service_type.category()
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn category(&self) -> ServiceCategory {
        self.service_type.category()
    }

    pub fn is_redacted(&self) -> bool {
        self.config.is_none()
    }
}
