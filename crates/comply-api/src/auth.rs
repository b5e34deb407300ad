//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware with role-based access control.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {role}:{actor_id}:{secret}
//! Bearer {secret}                      (treated as admin, actor "admin")
//! ```
//!
//! Roles are ordered `client < operations < reviewer < admin`; a caller may
//! use every endpoint whose minimum role is at or below its own. The actor
//! id is recorded on every transition the caller performs.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── Role ────────────────────────────────────────────────────────────────────

/// Caller roles, ordered by privilege. The derived `Ord` follows
/// declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Uploads documents for its own obligations.
    Client,
    /// Schedules and works obligations.
    Operations,
    /// Opens and decides quality reviews.
    Reviewer,
    /// Administers rules, services, templates and escalations.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Operations => "operations",
            Self::Reviewer => "reviewer",
            Self::Admin => "admin",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Self::Client),
            "operations" => Some(Self::Operations),
            "reviewer" => Some(Self::Reviewer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller, injected by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: Role,
    /// Recorded as the actor of transitions and reviews.
    pub actor_id: String,
}

impl CallerIdentity {
    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }

    fn dev_admin() -> Self {
        Self {
            role: Role::Admin,
            actor_id: "admin".to_string(),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Check that the caller has at least the required role (403 otherwise).
pub fn require_role(caller: &CallerIdentity, minimum: Role) -> Result<(), AppError> {
    if caller.has_role(minimum) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            minimum.as_str(),
            caller.role.as_str()
        )))
    }
}

// ── Secret handling ─────────────────────────────────────────────────────────

/// The shared bearer secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// Auth configuration injected into request extensions. `None` disables
/// authentication and every caller is treated as admin.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token: Option<SecretToken>,
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse `{role}:{actor_id}:{secret}` or a bare `{secret}`.
pub fn parse_bearer_token(provided: &str, expected: &SecretToken) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    match parts.as_slice() {
        [secret] => {
            if constant_time_token_eq(secret, expected.expose()) {
                Ok(CallerIdentity::dev_admin())
            } else {
                Err("invalid bearer token".into())
            }
        }
        [role, actor_id, secret] => {
            if !constant_time_token_eq(secret, expected.expose()) {
                return Err("invalid bearer token".into());
            }
            let role = Role::parse(role).ok_or_else(|| format!("unknown role: {role}"))?;
            if actor_id.trim().is_empty() {
                return Err("actor id must not be empty".into());
            }
            Ok(CallerIdentity {
                role,
                actor_id: actor_id.to_string(),
            })
        }
        _ => Err("invalid token format, expected {role}:{actor_id}:{secret}".into()),
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the bearer token and inject the [`CallerIdentity`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected = request
        .extensions()
        .get::<AuthConfig>()
        .and_then(|c| c.token.clone());

    let Some(expected) = expected else {
        request.extensions_mut().insert(CallerIdentity::dev_admin());
        return next.run(request).await;
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided) => match parse_bearer_token(provided, &expected) {
                Ok(identity) => {
                    request.extensions_mut().insert(identity);
                    next.run(request).await
                }
                Err(msg) => {
                    tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                    unauthorized_response(&msg)
                }
            },
            None => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                unauthorized_response("authorization header must use Bearer scheme")
            }
        },
        None => {
            tracing::warn!("authentication failed: missing authorization header");
            unauthorized_response("missing authorization header")
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn secret() -> SecretToken {
        SecretToken::new("s3cret")
    }

    async fn whoami(caller: CallerIdentity) -> String {
        format!("{}:{}", caller.role.as_str(), caller.actor_id)
    }

    fn test_app(token: Option<SecretToken>) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(AuthConfig { token }))
    }

    async fn call(app: Router, header: Option<&str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(h) = header {
            builder = builder.header("Authorization", h);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Client < Role::Operations);
        assert!(Role::Operations < Role::Reviewer);
        assert!(Role::Reviewer < Role::Admin);
    }

    #[test]
    fn require_role_checks_minimum() {
        let reviewer = CallerIdentity {
            role: Role::Reviewer,
            actor_id: "rev-1".into(),
        };
        assert!(require_role(&reviewer, Role::Operations).is_ok());
        assert!(require_role(&reviewer, Role::Reviewer).is_ok());
        assert!(matches!(
            require_role(&reviewer, Role::Admin),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn parses_role_actor_secret() {
        let id = parse_bearer_token("reviewer:rev-7:s3cret", &secret()).unwrap();
        assert_eq!(id.role, Role::Reviewer);
        assert_eq!(id.actor_id, "rev-7");
    }

    #[test]
    fn secret_may_contain_colons() {
        let token = SecretToken::new("a:b");
        assert!(parse_bearer_token("client:c-1:a:b", &token).is_ok());
    }

    #[test]
    fn rejects_bad_tokens() {
        assert!(parse_bearer_token("reviewer:rev-7:wrong", &secret()).is_err());
        assert!(parse_bearer_token("wizard:rev-7:s3cret", &secret()).is_err());
        assert!(parse_bearer_token("reviewer::s3cret", &secret()).is_err());
        assert!(parse_bearer_token("reviewer:s3cret", &secret()).is_err());
    }

    #[test]
    fn secret_redacted_in_debug() {
        let cfg = AuthConfig {
            token: Some(secret()),
        };
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("REDACTED"));
    }

    #[tokio::test]
    async fn middleware_injects_identity() {
        let (status, body) = call(test_app(Some(secret())), Some("Bearer operations:ops-1:s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "operations:ops-1");
    }

    #[tokio::test]
    async fn middleware_rejects_missing_and_non_bearer() {
        let (status, body) = call(test_app(Some(secret())), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("missing"));

        let (status, _) = call(test_app(Some(secret())), Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disabled_auth_is_admin() {
        let (status, body) = call(test_app(None), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin:admin");
    }
}
