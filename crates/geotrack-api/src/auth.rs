//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware with role-based access control.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {role}:{agent_id}:{secret}   role-scoped token
//! Bearer {secret}                     legacy token, treated as admin
//! ```
//!
//! `agent` tokens must carry the agent id they act for; `supervisor` and
//! `admin` tokens leave it empty.
//!
//! ## CallerIdentity
//!
//! Every authenticated request gets a [`CallerIdentity`] injected into the
//! request extensions. Handlers extract it via the `FromRequestParts` impl.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geotrack_core::AgentId;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody};

// ── Role ────────────────────────────────────────────────────────────────────

/// Caller roles, ordered by privilege: `Agent < Supervisor < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A field agent reporting its own position.
    Agent,
    /// Can see every agent and resolve violations.
    Supervisor,
    /// Full access, including zone administration and retention.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Supervisor => "supervisor",
            Self::Admin => "admin",
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: Role,
    /// Set for agent tokens, `None` for supervisors and admins.
    pub agent_id: Option<AgentId>,
}

impl CallerIdentity {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            agent_id: None,
        }
    }

    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }

    /// Agents may only act on their own records; supervisors and admins on
    /// any agent's.
    pub fn can_act_for(&self, agent_id: AgentId) -> bool {
        match self.role {
            Role::Admin | Role::Supervisor => true,
            Role::Agent => self.agent_id == Some(agent_id),
        }
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Returns 403 Forbidden if the caller's role is insufficient.
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

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value to prevent credential leakage in logs.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer tokens. A length mismatch still
/// performs a comparison so timing does not reveal the expected length.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token in format `{role}:{agent_id}:{secret}` or `{secret}`.
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    match parts.as_slice() {
        [secret] => {
            if constant_time_token_eq(secret, expected_secret) {
                Ok(CallerIdentity::admin())
            } else {
                Err("invalid bearer token".into())
            }
        }
        [role_str, agent_str, secret] => {
            if !constant_time_token_eq(secret, expected_secret) {
                return Err("invalid bearer token".into());
            }

            let role = match *role_str {
                "admin" => Role::Admin,
                "supervisor" => Role::Supervisor,
                "agent" => Role::Agent,
                other => return Err(format!("unknown role: {other}")),
            };

            let agent_id = if agent_str.is_empty() {
                None
            } else {
                Some(
                    agent_str
                        .parse::<AgentId>()
                        .map_err(|e| format!("invalid agent_id: {e}"))?,
                )
            };

            if role == Role::Agent && agent_id.is_none() {
                return Err("agent tokens must name an agent_id".into());
            }

            Ok(CallerIdentity { role, agent_id })
        }
        _ => Err("invalid token format, expected {role}:{agent_id}:{secret} or {secret}".into()),
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the bearer token and inject the caller's identity.
///
/// When `AuthConfig.token` is `None` every request runs as admin
/// (development mode).
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request.extensions().get::<AuthConfig>().cloned();

    match expected_token {
        Some(AuthConfig {
            token: Some(ref expected),
        }) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
                Some(provided) => match parse_bearer_token(provided, expected) {
                    Ok(identity) => {
                        request.extensions_mut().insert(identity);
                        next.run(request).await
                    }
                    Err(msg) => {
                        tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                        unauthorized_response(&msg)
                    }
                },
                None if auth_header.is_some() => {
                    tracing::warn!("authentication failed: non-Bearer authorization scheme");
                    unauthorized_response("authorization header must use Bearer scheme")
                }
                None => {
                    tracing::warn!("authentication failed: missing authorization header");
                    unauthorized_response("missing authorization header")
                }
            }
        }
        _ => {
            request.extensions_mut().insert(CallerIdentity::admin());
            next.run(request).await
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody::new("UNAUTHORIZED", message)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const AGENT: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn test_app(token: Option<String>) -> Router {
        let auth_config = AuthConfig { token };
        Router::new()
            .route(
                "/test",
                get(|caller: CallerIdentity| async move { caller.role.as_str() }),
            )
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(auth_config))
    }

    async fn call(app: Router, authorization: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/test");
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn legacy_token_runs_as_admin() {
        let (status, body) = call(test_app(Some("s3cret".into())), Some("Bearer s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin");
    }

    #[tokio::test]
    async fn agent_token_carries_identity() {
        let header = format!("Bearer agent:{AGENT}:s3cret");
        let (status, body) = call(test_app(Some("s3cret".into())), Some(&header)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "agent");
    }

    #[tokio::test]
    async fn missing_authorization_header_rejected() {
        let (status, body) = call(test_app(Some("s3cret".into())), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"]["code"], "UNAUTHORIZED");
        assert!(err["error"]["message"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let (status, body) =
            call(test_app(Some("s3cret".into())), Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Bearer scheme"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let (status, _) = call(
            test_app(Some("s3cret".into())),
            Some("Bearer supervisor::nope"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_disabled_runs_as_admin() {
        let (status, body) = call(test_app(None), Some("Bearer anything")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin");
    }

    #[test]
    fn constant_time_eq_rejects_prefix_and_empty() {
        assert!(constant_time_token_eq("secret-token", "secret-token"));
        assert!(!constant_time_token_eq("secret", "secret-token"));
        assert!(!constant_time_token_eq("", "secret-token"));
    }

    #[test]
    fn role_ordering_is_correct() {
        assert!(Role::Agent < Role::Supervisor);
        assert!(Role::Supervisor < Role::Admin);
    }

    #[test]
    fn agents_act_only_for_themselves() {
        let me = AgentId::new();
        let agent = CallerIdentity {
            role: Role::Agent,
            agent_id: Some(me),
        };
        assert!(agent.can_act_for(me));
        assert!(!agent.can_act_for(AgentId::new()));
        assert!(CallerIdentity::admin().can_act_for(me));
        assert!(require_role(&agent, Role::Supervisor).is_err());
        assert!(require_role(&agent, Role::Agent).is_ok());
    }

    #[test]
    fn parse_bearer_token_formats() {
        let supervisor = parse_bearer_token("supervisor::s", "s").unwrap();
        assert_eq!(supervisor.role, Role::Supervisor);
        assert!(supervisor.agent_id.is_none());

        let agent = parse_bearer_token(&format!("agent:{AGENT}:s"), "s").unwrap();
        assert_eq!(agent.agent_id.unwrap().to_string(), AGENT);

        assert!(parse_bearer_token("agent::s", "s")
            .unwrap_err()
            .contains("must name"));
        assert!(parse_bearer_token("root::s", "s")
            .unwrap_err()
            .contains("unknown role"));
        assert!(parse_bearer_token("agent:not-a-uuid:s", "s")
            .unwrap_err()
            .contains("invalid agent_id"));
        assert!(parse_bearer_token("role:s", "s").is_err());
    }
}
