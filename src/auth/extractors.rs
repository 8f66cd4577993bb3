use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tracing::{debug, warn};

use crate::{
    auth::{
        jwt::TokenVerifyError,
        repo::StoreError,
        repo_types::{Role, User},
        session::SESSION_COOKIE,
    },
    error::{AppError, AppResult},
    state::AppState,
};

/// Principal resolved by `protect`. Holding one proves the hard gate ran.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Principal resolved by the soft gate; `None` means proceed as anonymous.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[derive(Debug)]
enum AuthFailure {
    MissingToken,
    BadToken(TokenVerifyError),
    UserGone,
    PasswordChanged,
    Store(StoreError),
}

impl From<AuthFailure> for AppError {
    fn from(f: AuthFailure) -> Self {
        match f {
            AuthFailure::MissingToken => AppError::Unauthenticated(
                "You are not logged in! Please log in to get access.".into(),
            ),
            AuthFailure::BadToken(TokenVerifyError::Expired) => {
                AppError::Unauthenticated("Your token has expired! Please log in again.".into())
            }
            AuthFailure::BadToken(_) => {
                AppError::Unauthenticated("Invalid token. Please log in again!".into())
            }
            AuthFailure::UserGone => AppError::Unauthenticated(
                "The user belonging to this token no longer exists.".into(),
            ),
            AuthFailure::PasswordChanged => AppError::Unauthenticated(
                "User recently changed password! Please log in again.".into(),
            ),
            AuthFailure::Store(e) => {
                AppError::Internal(anyhow::Error::new(e).context("resolve principal"))
            }
        }
    }
}

/// Bearer header first, then the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// Shared by both gates so the security checks cannot drift apart.
async fn resolve_principal(headers: &HeaderMap, state: &AppState) -> Result<User, AuthFailure> {
    let token = extract_token(headers).ok_or(AuthFailure::MissingToken)?;

    let verified = state.tokens.verify(&token).map_err(AuthFailure::BadToken)?;

    let user = state
        .store
        .find_by_id(verified.subject)
        .await
        .map_err(AuthFailure::Store)?
        .ok_or(AuthFailure::UserGone)?;

    if user.changed_password_after(verified.issued_at) {
        return Err(AuthFailure::PasswordChanged);
    }
    Ok(user)
}

impl AuthUser {
    /// Hard gate. Fails on any problem with the credential.
    pub async fn protect(headers: &HeaderMap, state: &AppState) -> AppResult<Self> {
        resolve_principal(headers, state)
            .await
            .map(AuthUser)
            .map_err(|f| {
                if !matches!(f, AuthFailure::Store(_)) {
                    warn!(reason = ?f, "protect rejected request");
                }
                f.into()
            })
    }

    pub fn restrict_to(&self, roles: &[Role]) -> AppResult<()> {
        if roles.contains(&self.0.role) {
            return Ok(());
        }
        warn!(user_id = %self.0.id, role = %self.0.role, allowed = ?roles, "role not permitted");
        Err(AppError::Forbidden(
            "You do not have permission to perform this action".into(),
        ))
    }
}

impl MaybeUser {
    /// Soft gate. Every failure downgrades to anonymous; that is its contract.
    pub async fn is_logged_in(headers: &HeaderMap, state: &AppState) -> Self {
        match resolve_principal(headers, state).await {
            Ok(user) => MaybeUser(Some(user)),
            Err(AuthFailure::MissingToken) => MaybeUser(None),
            Err(f) => {
                debug!(reason = ?f, "soft gate proceeding as anonymous");
                MaybeUser(None)
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<AuthUser>() {
            return Ok(existing.clone());
        }
        let user = AuthUser::protect(&parts.headers, state).await?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<AuthUser>() {
            return Ok(MaybeUser(Some(existing.0.clone())));
        }
        let maybe = MaybeUser::is_logged_in(&parts.headers, state).await;
        if let Some(user) = &maybe.0 {
            parts.extensions.insert(AuthUser(user.clone()));
        }
        Ok(maybe)
    }
}

/// Layer form of the hard gate for whole route groups.
pub async fn protect(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match AuthUser::protect(req.headers(), &state).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
