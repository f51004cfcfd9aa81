//! REST surface of the gateway
//!
//! `GET /api/v1/{collection}` lists one page of a collection on behalf of the
//! authenticated principal:
//!
//! ```text
//! GET /api/v1/databaseServices?fields=tags,connection&limit=10&after=<cursor>
//! ```
//!
//! Responses are `{"data": [...], "paging": {"before": .., "after": ..}}`.
//! Errors are `{"error": .., "request_id": ..}`; client errors map to 400,
//! unknown collections to 404 and everything else to 500 with a generic
//! message (details are logged under the request id).

use crate::api_keys::{require_api_key, ApiKeyManager};
use crate::gateway::EntityGateway;
use crate::health::{health_check, readiness_check};
use crate::redactor::Redacted;
use crate::secrets::SecretsManagerProvider;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use catalog_gateway_core::{
    CatalogError, EntityType, Include, Page, PageRequest, Principal,
};
use catalog_gateway_storage::DynCatalogBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<DynCatalogBackend>,
    pub gateway: Arc<EntityGateway>,
    pub secrets: Arc<SecretsManagerProvider>,
    /// Page size used when a request has no `limit`
    pub default_limit: usize,
}

/// Listing response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub data: Vec<Redacted>,
    pub paging: Paging,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paging {
    pub before: Option<String>,
    pub after: Option<String>,
}

impl From<Page<Redacted>> for ListResponse {
    fn from(page: Page<Redacted>) -> Self {
        Self {
            data: page.items,
            paging: Paging {
                before: page.before,
                after: page.after,
            },
        }
    }
}

/// JSON error response with a request id for correlation
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    request_id: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        if err.is_client_error() {
            return Self::bad_request(err.to_string());
        }
        let api_error = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        error!(request_id = %api_error.request_id, error = %err, "Request failed");
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.message,
                "request_id": self.request_id,
            })),
        )
            .into_response()
    }
}

/// Build the gateway router.
pub fn build_router(state: AppState, api_keys: Arc<ApiKeyManager>) -> Router {
    let api = Router::new()
        .route("/api/v1/:collection", get(list_collection))
        .route_layer(middleware::from_fn(require_api_key));

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(api);

    #[cfg(feature = "metrics")]
    let router = router
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(middleware::from_fn(crate::metrics::track_metrics));

    router
        .layer(Extension(api_keys))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Translate query parameters into a [`PageRequest`].
///
/// Only the shape of the parameters is checked here; the gateway validates
/// their values.
pub fn page_request_from_query(
    entity_type: EntityType,
    params: &HashMap<String, String>,
    default_limit: usize,
) -> Result<PageRequest, ApiError> {
    let mut request = PageRequest::new(entity_type).with_limit(default_limit);

    if let Some(fields) = params.get("fields") {
        request = request.with_fields(
            fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty()),
        );
    }
    if let Some(limit) = params.get("limit") {
        let limit = limit
            .trim()
            .parse::<usize>()
            .map_err(|_| ApiError::bad_request(format!("Invalid limit: {}", limit)))?;
        request = request.with_limit(limit);
    }
    if let Some(service) = params.get("service") {
        request = request.with_service(service.clone());
    }
    if let Some(include) = params.get("include") {
        request = request.with_include(include.parse::<Include>()?);
    }
    request.before = params.get("before").cloned();
    request.after = params.get("after").cloned();

    Ok(request)
}

async fn list_collection(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(collection): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse>, ApiError> {
    let entity_type = EntityType::from_collection(&collection)
        .ok_or_else(|| ApiError::not_found(format!("Unknown collection: {}", collection)))?;
    let request = page_request_from_query(entity_type, &params, state.default_limit)?;

    // Dropping this handler (client gone) cancels the token; items already
    // being redacted finish, no new item starts.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let gateway = Arc::clone(&state.gateway);
    let task = tokio::spawn(async move {
        gateway
            .list_entities_with_cancel(&principal, &request, &cancel)
            .await
    });

    let result = task
        .await
        .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?;
    guard.disarm();

    let page = result?;
    debug!(collection = %collection, items = page.items.len(), "Served listing");
    Ok(Json(ListResponse::from(page)))
}
