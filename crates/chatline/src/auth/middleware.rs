//! Authentication middleware.

use axum::{
    extract::{FromRequestParts, State},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, warn};
use std::sync::Arc;

use super::{AuthConfig, AuthError, Claims};
use crate::identity::Identity;

const TOKEN_ISSUER: &str = "chatline";
const TOKEN_LIFETIME_SECS: i64 = 3600 * 24;

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name.trim() == cookie_name).then(|| value.trim())
    })
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    secret: Option<String>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create auth state from config, resolving `env:VAR_NAME` secrets.
    pub fn new(config: AuthConfig) -> Self {
        let secret = match config.resolve_jwt_secret() {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Ignoring JWT secret: {}", e);
                None
            }
        };
        let decoding_key = secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            config: Arc::new(config),
            secret,
            decoding_key,
        }
    }

    /// Check if dev mode is enabled.
    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Get allowed origins from config.
    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Whether a browser `Origin` may open connections.
    ///
    /// An empty allow-list accepts every origin.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        let allowed = self.allowed_origins();
        allowed.is_empty() || allowed.iter().any(|o| o == origin)
    }

    /// Validate a JWT token.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        if self.config.dev_mode
            && let Some(user_id) = token.strip_prefix("dev:")
        {
            return self.dev_user_claims(user_id);
        }

        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            warn!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        Ok(token_data.claims)
    }

    fn dev_user_claims(&self, user_id: &str) -> Result<Claims, AuthError> {
        let user = self
            .config
            .dev_users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or(AuthError::UserNotFound)?;

        let now = Utc::now().timestamp();
        Ok(Claims {
            sub: user.id.clone(),
            iss: Some("dev".to_string()),
            exp: now + TOKEN_LIFETIME_SECS,
            iat: Some(now),
            name: Some(user.name.clone()),
        })
    }

    /// Mint a signed token for `identity`, valid for 24 hours.
    pub fn generate_token(
        &self,
        identity: &Identity,
        name: Option<&str>,
    ) -> Result<String, AuthError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: identity.to_string(),
            iss: Some(TOKEN_ISSUER.to_string()),
            exp: now + TOKEN_LIFETIME_SECS,
            iat: Some(now),
            name: name.map(str::to_string),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Resolve the caller from request headers and query string.
    ///
    /// Sources in priority order:
    /// 1. Authorization: Bearer <token> header
    /// 2. auth cookie
    /// 3. token query parameter (browsers can't set headers on WS)
    /// 4. X-Dev-User header (dev mode only)
    fn authenticate(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Claims, AuthError> {
        if let Some(header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
            return self.validate_token(bearer_token_from_header(header)?);
        }

        let cookie_token = headers
            .get(COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|cookies| token_from_cookie_header(cookies, self.cookie_name()));
        if let Some(token) = cookie_token {
            return self.validate_token(token);
        }

        if let Some(token) = query.and_then(token_from_query) {
            return self.validate_token(&token);
        }

        if self.is_dev_mode()
            && let Some(user_id) = headers.get("X-Dev-User").and_then(|h| h.to_str().ok())
        {
            debug!("Using dev user: {}", user_id);
            return self.validate_token(&format!("dev:{}", user_id));
        }

        Err(AuthError::MissingAuthHeader)
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// User claims.
    pub claims: Claims,
}

impl CurrentUser {
    /// Get the user identity.
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn identity(&self) -> Identity {
        self.claims.identity()
    }

    /// Get display name.
    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Authentication middleware.
///
/// Validates the caller's token and injects `CurrentUser` into request
/// extensions.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = auth.authenticate(req.headers(), req.uri().query())?;

    req.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(req).await)
}
