//! Request authentication
//!
//! Two layers:
//! - an optional bearer API key guarding the whole router, for
//!   deployments that put the server behind a trusted gateway
//! - the caller identity headers set by that gateway, read per request
//!   by the [`CurrentUser`] extractor

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parley_config::AuthConfig;
use parley_core::{Language, Level, UserSettings};

use crate::state::AppState;
use crate::ServerError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const NATIVE_LANGUAGE_HEADER: &str = "x-native-language";
pub const TARGET_LANGUAGE_HEADER: &str = "x-target-language";
pub const LEVEL_HEADER: &str = "x-level";

static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

enum AuthCheck {
    Disabled,
    PublicPath,
    ConfigError(&'static str),
    CheckKey(String),
}

fn check_auth_config(auth: &AuthConfig, path: &str) -> AuthCheck {
    if !auth.enabled {
        if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "API authentication is disabled. Set PARLEY__SERVER__AUTH__ENABLED=true for production."
            );
        }
        return AuthCheck::Disabled;
    }

    if auth.public_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return AuthCheck::PublicPath;
    }

    match &auth.api_key {
        Some(key) if !key.is_empty() => AuthCheck::CheckKey(key.clone()),
        _ => AuthCheck::ConfigError("Auth is enabled but no API key is configured"),
    }
}

/// Bearer API key middleware
///
/// Public paths (health, readiness, metrics by default) pass through.
pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match check_auth_config(&state.config.server.auth, request.uri().path()) {
        AuthCheck::Disabled | AuthCheck::PublicPath => next.run(request).await,
        AuthCheck::ConfigError(msg) => {
            tracing::error!("{}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, "Server authentication not configured").into_response()
        }
        AuthCheck::CheckKey(expected) => {
            let provided = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.strip_prefix("Bearer ").map(str::to_string));

            match provided {
                Some(Some(key)) if constant_time_compare(key.as_bytes(), expected.as_bytes()) => {
                    next.run(request).await
                }
                Some(Some(_)) => {
                    tracing::warn!(
                        forwarded_for = ?request.headers().get("x-forwarded-for"),
                        "Invalid API key"
                    );
                    (StatusCode::UNAUTHORIZED, "Invalid API key").into_response()
                }
                Some(None) => (
                    StatusCode::BAD_REQUEST,
                    "Invalid Authorization header format. Expected: Bearer <token>",
                )
                    .into_response(),
                None => (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response(),
            }
        }
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Authenticated caller and their learning settings
///
/// `X-User-Id` is required. Missing language and level headers fall back
/// to the default settings; unparseable ones are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: String,
    pub settings: UserSettings,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(&parts.headers, USER_ID_HEADER)?
            .ok_or_else(|| ServerError::Auth("missing X-User-Id header".to_string()))?;

        let defaults = UserSettings::default();
        let settings = UserSettings {
            native_language: parse_header::<Language>(&parts.headers, NATIVE_LANGUAGE_HEADER)?
                .unwrap_or(defaults.native_language),
            target_language: parse_header::<Language>(&parts.headers, TARGET_LANGUAGE_HEADER)?
                .unwrap_or(defaults.target_language),
            level: parse_header::<Level>(&parts.headers, LEVEL_HEADER)?.unwrap_or(defaults.level),
        };

        Ok(Self { user_id, settings })
    }
}

/// Trimmed header value; blank counts as absent
fn header_value(headers: &HeaderMap, name: &str) -> Result<Option<String>, ServerError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ServerError::InvalidRequest(format!("{} is not valid text", name)))?
                .trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
    }
}

fn parse_header<T>(headers: &HeaderMap, name: &str) -> Result<Option<T>, ServerError>
where
    T: std::str::FromStr<Err = String>,
{
    header_value(headers, name)?
        .map(|v| v.parse::<T>().map_err(ServerError::InvalidRequest))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    async fn extract(request: HttpRequest<()>) -> Result<CurrentUser, ServerError> {
        let (mut parts, _) = request.into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"secret", b"secret"));
        assert!(!constant_time_compare(b"secret", b"secre"));
        assert!(!constant_time_compare(b"secret", b"secreT"));
    }

    #[test]
    fn test_public_paths_bypass() {
        let auth = AuthConfig {
            enabled: true,
            api_key: Some("k".to_string()),
            ..AuthConfig::default()
        };
        assert!(matches!(check_auth_config(&auth, "/health"), AuthCheck::PublicPath));
        assert!(matches!(
            check_auth_config(&auth, "/api/conversation/turn"),
            AuthCheck::CheckKey(_)
        ));
    }

    #[tokio::test]
    async fn test_current_user_defaults() {
        let request = HttpRequest::builder()
            .header("X-User-Id", " user-1 ")
            .body(())
            .unwrap();

        let user = extract(request).await.unwrap();
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.settings, UserSettings::default());
    }

    #[tokio::test]
    async fn test_current_user_settings_headers() {
        let request = HttpRequest::builder()
            .header("X-User-Id", "user-1")
            .header("X-Native-Language", "de")
            .header("X-Target-Language", "FR")
            .header("X-Level", "b2")
            .body(())
            .unwrap();

        let user = extract(request).await.unwrap();
        assert_eq!(user.settings.native_language, Language::De);
        assert_eq!(user.settings.target_language, Language::Fr);
        assert_eq!(user.settings.level, Level::B2);
    }

    #[tokio::test]
    async fn test_current_user_rejections() {
        let missing = HttpRequest::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(ServerError::Auth(_))));

        let bad_level = HttpRequest::builder()
            .header("X-User-Id", "user-1")
            .header("X-Level", "Z9")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(bad_level).await,
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
