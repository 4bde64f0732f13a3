//! Axum middleware that resolves the request context once per request.
//!
//! An upstream identity layer inserts a [`Principal`] extension; this layer
//! turns it into a [`ResolvedContext`] extension that handlers read through
//! the guard extractors.

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::resolver::{ContextResolver, OrgContext, ProjectContext, ResolvedContext, UserContext};

/// Route parameter naming the project for [`ProjectFromParam`].
pub const PROJECT_PARAM: &str = "project_id";

/// Identity established by an upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that resolves and injects the [`ResolvedContext`].
///
/// # Example
///
/// ```rust,ignore
/// use bastion_core::context::{ContextLayer, ContextResolver, RequireProject};
///
/// let app = Router::new()
///     .route("/projects/:project_id/campaigns", get(list_campaigns))
///     .layer(ContextLayer::new(resolver));
/// ```
#[derive(Clone)]
pub struct ContextLayer {
    resolver: Arc<ContextResolver>,
}

impl ContextLayer {
    pub fn new(resolver: ContextResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            resolver: self.resolver.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ContextService<S> {
    inner: S,
    resolver: Arc<ContextResolver>,
}

impl<S> Service<Request<Body>> for ContextService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let resolver = self.resolver.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let principal = request.extensions().get::<Principal>().cloned();

            let context = match resolver
                .resolve(principal.as_ref().map(|p| p.0.as_str()))
                .await
            {
                Ok(context) => context,
                Err(e) => return Ok(e.into_response()),
            };

            request.extensions_mut().insert(context);
            request.extensions_mut().insert(resolver);
            inner.call(request).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Extractors
// ═══════════════════════════════════════════════════════════════════════════════

fn missing_layer_response() -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": {
            "code": "MISSING_CONTEXT",
            "message": "Request context not available. Ensure ContextLayer is applied.",
        }
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

fn resolved(parts: &Parts) -> Result<&ResolvedContext, Response> {
    parts
        .extensions
        .get::<ResolvedContext>()
        .ok_or_else(missing_layer_response)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ResolvedContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolved(parts).cloned()
    }
}

/// Extracts the user; rejects with 401 when there is none.
#[derive(Debug, Clone)]
pub struct RequireUser(pub UserContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolved(parts)?
            .require_user_context()
            .map(|user| Self(user.clone()))
            .map_err(IntoResponse::into_response)
    }
}

/// Extracts the organization; rejects with 404 when there is none.
#[derive(Debug, Clone)]
pub struct RequireOrg(pub OrgContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireOrg
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolved(parts)?
            .require_org_context()
            .map(|org| Self(org.clone()))
            .map_err(IntoResponse::into_response)
    }
}

/// Extracts the default project; rejects with 404 when there is none.
#[derive(Debug, Clone)]
pub struct RequireProject(pub ProjectContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireProject
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolved(parts)?
            .require_project_context()
            .map(|project| Self(project.clone()))
            .map_err(IntoResponse::into_response)
    }
}

/// Context whose project comes from the `:project_id` route parameter.
///
/// Rejects with 401 without a user and 403 when the project is unknown or
/// belongs to an organization the user is not a member of.
#[derive(Debug, Clone)]
pub struct ProjectFromParam(pub ResolvedContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ProjectFromParam
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let mut context = resolved(parts)?.clone();
        let resolver = parts
            .extensions
            .get::<Arc<ContextResolver>>()
            .cloned()
            .ok_or_else(missing_layer_response)?;

        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let Some(project_id) = params.get(PROJECT_PARAM) else {
            warn!("ProjectFromParam used on a route without :{}", PROJECT_PARAM);
            return Err(missing_layer_response());
        };

        resolver
            .set_project_context_from_param(&mut context, project_id)
            .await
            .map_err(IntoResponse::into_response)?;

        Ok(Self(context))
    }
}
