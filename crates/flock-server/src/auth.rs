// ABOUTME: Bearer token authentication middleware for the flock API.
// ABOUTME: Attaches the authenticated Principal to /api/* requests; /health stays open.

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use flock_core::{BackupResponse, Principal};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A tower Layer that authenticates API routes and records who is calling.
///
/// With a token, a matching `Authorization: Bearer <token>` header acts as the
/// operator principal and anything else is rejected. Without a token the
/// server is loopback-only and every API request acts as `Principal::local()`.
#[derive(Clone)]
pub struct AuthLayer {
    token: Option<Arc<String>>,
    operator: Arc<Principal>,
}

impl AuthLayer {
    /// Require `token` on API routes; authenticated requests act as `operator`.
    pub fn new(token: String, operator: impl Into<String>) -> Self {
        Self {
            token: Some(Arc::new(token)),
            operator: Arc::new(Principal::new(operator)),
        }
    }

    /// Trust every caller as the local principal.
    pub fn local() -> Self {
        Self {
            token: None,
            operator: Arc::new(Principal::local()),
        }
    }

    /// Build from an optional token, as read from configuration.
    pub fn from_config(token: Option<String>, operator: &str) -> Self {
        match token {
            Some(token) => Self::new(token, operator),
            None => Self::local(),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            token: self.token.clone(),
            operator: Arc::clone(&self.operator),
        }
    }
}

/// The middleware service that checks bearer tokens on /api/* routes.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    token: Option<Arc<String>>,
    operator: Arc<Principal>,
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let path = req.uri().path();

        // Only authenticate /api and /api/* routes
        if !(path == "/api" || path.starts_with("/api/")) {
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await });
        }

        let authorized = match &self.token {
            None => true,
            Some(token) => req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .is_some_and(|presented| presented == token.as_str()),
        };

        if !authorized {
            tracing::warn!("rejected unauthenticated request to {}", path);
            return Box::pin(async move {
                let body: BackupResponse<()> = BackupResponse::err("Unauthorized");
                Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response())
            });
        }

        req.extensions_mut().insert(Principal::clone(&self.operator));
        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}
