//! Entity access gateway
//!
//! Composes validation, the [`PaginatedLister`] and the [`SecretsRedactor`]
//! into the single `list_entities` operation. Each call moves through
//! `VALIDATE_REQUEST → FETCH_PAGE → REDACT_ITEMS → DONE`, or to `FAILED` from
//! any stage. The gateway keeps no state between calls and never retries.

use crate::authorizer::Authorizer;
use crate::config::DEFAULT_REDACTION_CONCURRENCY;
use crate::lister::{ListQuery, PaginatedLister};
use crate::redactor::{Redacted, SecretsRedactor};
use crate::secrets::SecretsManagerProvider;
use catalog_gateway_core::{CatalogError, Page, PageRequest, Principal, Result, MAX_PAGE_LIMIT};
use catalog_gateway_storage::EntityStore;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Processing stage of a listing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateRequest,
    FetchPage,
    RedactItems,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ValidateRequest => write!(f, "VALIDATE_REQUEST"),
            Stage::FetchPage => write!(f, "FETCH_PAGE"),
            Stage::RedactItems => write!(f, "REDACT_ITEMS"),
            Stage::Done => write!(f, "DONE"),
            Stage::Failed => write!(f, "FAILED"),
        }
    }
}

pub struct EntityGateway {
    lister: PaginatedLister,
    redactor: SecretsRedactor,
    max_limit: usize,
    redaction_concurrency: usize,
}

impl EntityGateway {
    pub fn new(
        store: Arc<dyn EntityStore>,
        authorizer: Arc<dyn Authorizer>,
        secrets: Arc<SecretsManagerProvider>,
    ) -> Self {
        Self {
            lister: PaginatedLister::new(store),
            redactor: SecretsRedactor::new(authorizer, secrets),
            max_limit: MAX_PAGE_LIMIT,
            redaction_concurrency: DEFAULT_REDACTION_CONCURRENCY,
        }
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn with_redaction_concurrency(mut self, concurrency: usize) -> Self {
        self.redaction_concurrency = concurrency.max(1);
        self
    }

    /// List one page of entities on behalf of `principal`.
    pub async fn list_entities(
        &self,
        principal: &Principal,
        request: &PageRequest,
    ) -> Result<Page<Redacted>> {
        self.list_entities_with_cancel(principal, request, &CancellationToken::new())
            .await
    }

    /// Like [`EntityGateway::list_entities`], stopping between items once
    /// `cancel` fires.
    pub async fn list_entities_with_cancel(
        &self,
        principal: &Principal,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page<Redacted>> {
        let start = Instant::now();
        let result = self.run(principal, request, cancel).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(page) => info!(
                stage = %Stage::Done,
                principal = %principal.name,
                entity_type = %request.entity_type,
                items = page.items.len(),
                elapsed_ms,
                "Listed entities"
            ),
            Err(e) if e.is_client_error() => debug!(
                stage = %Stage::Failed,
                principal = %principal.name,
                entity_type = %request.entity_type,
                error = %e,
                "Rejected listing request"
            ),
            Err(e) => warn!(
                stage = %Stage::Failed,
                principal = %principal.name,
                entity_type = %request.entity_type,
                error = %e,
                elapsed_ms,
                "Listing failed"
            ),
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_listing(
            request.entity_type,
            match &result {
                Ok(_) => "ok",
                Err(e) if e.is_client_error() => "rejected",
                Err(CatalogError::Cancelled) => "cancelled",
                Err(_) => "error",
            },
        );

        result
    }

    async fn run(
        &self,
        principal: &Principal,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page<Redacted>> {
        debug!(
            stage = %Stage::ValidateRequest,
            entity_type = %request.entity_type,
            limit = request.limit,
            "Listing stage"
        );
        let query = ListQuery::from_request(request, self.max_limit)?;

        debug!(stage = %Stage::FetchPage, direction = ?query.direction, "Listing stage");
        let page = self.lister.list(&query).await?;

        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        debug!(stage = %Stage::RedactItems, items = page.items.len(), "Listing stage");
        self.redactor
            .redact_page(principal, page, cancel, self.redaction_concurrency)
            .await
    }
}
