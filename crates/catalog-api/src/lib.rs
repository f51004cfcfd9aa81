//! Catalog Gateway API Library
//!
//! Library components of the entity access gateway: authorization, secrets
//! handling and redaction, keyset pagination, API-key identity and the REST
//! router served by the `catalog-gateway-api` binary.

pub mod api_keys;
pub mod authorizer;
pub mod config;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lister;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod redactor;
pub mod secrets;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use api_keys::{ApiKeyConfig, ApiKeyManager};
pub use authorizer::{AccessDecision, Authorizer, NoopAuthorizer, PolicyAuthorizer, PolicySet};
pub use config::{AuthorizerKind, GatewayConfig, SecretsMode};
pub use gateway::{EntityGateway, Stage};
pub use http::{build_router, AppState, ListResponse};
pub use lister::{ListQuery, PaginatedLister};
pub use redactor::{Redacted, RedactionOutcome, SecretsRedactor};
pub use secrets::{
    LocalSecretsManager, ReferenceSecretsManager, SealingKey, SecretsManager,
    SecretsManagerProvider,
};

use std::sync::Arc;

/// Build the authorizer selected by the configuration.
pub fn authorizer_from_config(config: &GatewayConfig) -> catalog_gateway_core::Result<Arc<dyn Authorizer>> {
    match config.authorizer {
        AuthorizerKind::Noop => {
            tracing::warn!("Running with the no-op authorizer, every principal is allowed everything");
            Ok(Arc::new(NoopAuthorizer))
        }
        AuthorizerKind::Policy => {
            let policies = match &config.policy_file {
                Some(path) => PolicySet::from_file(path)?,
                None => PolicySet::builtin(),
            };
            Ok(Arc::new(PolicyAuthorizer::new(policies)))
        }
    }
}
