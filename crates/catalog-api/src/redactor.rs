//! Secrets redaction
//!
//! Every service entity leaving the gateway passes through
//! [`SecretsRedactor::redact`], which either returns its connection config in
//! cleartext or replaces it with `null`. There is no third shape: a config is
//! never returned partially decrypted.
//!
//! A denied authorization is an expected outcome, not an error. It turns into
//! a nulled config and the listing carries on. Only a failing secrets backend
//! fails the request.

use crate::authorizer::{AccessDecision, Authorizer};
use crate::secrets::SecretsManagerProvider;
use catalog_gateway_core::{CatalogError, Entity, Operation, Page, Principal, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What happened to an entity's connection config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionOutcome {
    /// Config returned in cleartext
    FullyVisible,
    /// Config replaced by null
    Redacted,
    /// No connection payload on the entity
    Withheld,
}

impl RedactionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionOutcome::FullyVisible => "fully_visible",
            RedactionOutcome::Redacted => "redacted",
            RedactionOutcome::Withheld => "withheld",
        }
    }
}

/// An entity as returned to callers, tagged with its redaction outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redacted {
    #[serde(flatten)]
    pub entity: Entity,
    pub redaction: RedactionOutcome,
}

impl Redacted {
    pub fn new(entity: Entity, redaction: RedactionOutcome) -> Self {
        Self { entity, redaction }
    }
}

pub struct SecretsRedactor {
    authorizer: Arc<dyn Authorizer>,
    secrets: Arc<SecretsManagerProvider>,
}

impl SecretsRedactor {
    pub fn new(authorizer: Arc<dyn Authorizer>, secrets: Arc<SecretsManagerProvider>) -> Self {
        Self {
            authorizer,
            secrets,
        }
    }

    /// Whether `principal` may see `entity`'s secrets.
    ///
    /// Admins always may. In local mode, a principal holding `ViewSecrets` on
    /// the entity itself may as well.
    pub fn decide(&self, principal: &Principal, entity: &Entity, local_mode: bool) -> AccessDecision {
        match self.authorizer.authorize_admin(principal) {
            AccessDecision::Allowed => AccessDecision::Allowed,
            denied if !local_mode => denied,
            AccessDecision::Denied(_) => {
                self.authorizer
                    .authorize(principal, &entity.reference(), Operation::ViewSecrets)
            }
        }
    }

    /// Redact a single entity.
    ///
    /// Idempotent: a nulled config stays null and a cleartext config is not
    /// sent through decryption again.
    pub async fn redact(&self, principal: &Principal, mut entity: Entity) -> Result<Redacted> {
        let service_type = match &entity.connection {
            None => return Ok(Redacted::new(entity, RedactionOutcome::Withheld)),
            Some(connection) if connection.is_redacted() => {
                return Ok(Redacted::new(entity, RedactionOutcome::Redacted))
            }
            Some(connection) => connection.service_type,
        };

        let manager = self.secrets.get()?;
        let decision = self.decide(principal, &entity, manager.is_local_mode());

        let config = match entity.connection.as_mut().and_then(|c| c.config.take()) {
            Some(config) => config,
            None => return Ok(Redacted::new(entity, RedactionOutcome::Redacted)),
        };

        if let AccessDecision::Denied(reason) = decision {
            debug!(
                principal = %principal.name,
                entity = %entity.name,
                reason = %reason,
                "Redacted connection config"
            );
            return Ok(Redacted::new(entity, RedactionOutcome::Redacted));
        }

        let config = if config.has_sealed_secrets() {
            let name = entity.name.clone();
            tokio::task::spawn_blocking(move || manager.decrypt(config, service_type, &name))
                .await
                .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))??
        } else {
            config
        };

        if let Some(connection) = entity.connection.as_mut() {
            connection.config = Some(config);
        }
        Ok(Redacted::new(entity, RedactionOutcome::FullyVisible))
    }

    /// Redact every item of a page, preserving order.
    ///
    /// At most `concurrency` items are in flight at once. Once `cancel` fires
    /// no further item starts; items already started run to completion and
    /// the page fails with `Cancelled`. Any item failing fails the page.
    pub async fn redact_page(
        &self,
        principal: &Principal,
        page: Page<Entity>,
        cancel: &CancellationToken,
        concurrency: usize,
    ) -> Result<Page<Redacted>> {
        let Page {
            items,
            before,
            after,
        } = page;

        let results: Vec<Result<Redacted>> = stream::iter(items)
            .map(|entity| async move {
                if cancel.is_cancelled() {
                    return Err(CatalogError::Cancelled);
                }
                self.redact(principal, entity).await
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let items = results.into_iter().collect::<Result<Vec<_>>>()?;

        #[cfg(feature = "metrics")]
        for item in &items {
            crate::metrics::record_redaction(item.redaction);
        }

        Ok(Page {
            items,
            before,
            after,
        })
    }
}
