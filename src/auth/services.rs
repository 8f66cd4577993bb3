use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, SignupRequest,
            UpdatePasswordRequest,
        },
        extractors::AuthUser,
        repo::StoreError,
        repo_types::{NewUser, Role, User},
        reset::ResetTokenManager,
    },
    email::password_reset_email,
    error::{AppError, AppResult},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required<'a>(value: &'a Option<String>, message: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

fn validate_new_password<'a>(
    password: &'a Option<String>,
    confirm: &Option<String>,
) -> AppResult<&'a str> {
    let password = required(password, "Please provide a password")?;
    let confirm = required(confirm, "Please confirm your password")?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.chars().count() > MAX_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(AppError::Validation("Passwords are not the same".into()));
    }
    Ok(password)
}

/// Timestamp recorded for a password change. Backdated a second so a token
/// issued right after the change is not mistaken for a stale one.
fn password_changed_at(now: OffsetDateTime) -> OffsetDateTime {
    now - Duration::seconds(1)
}

pub async fn signup(state: &AppState, req: SignupRequest) -> AppResult<User> {
    let name = required(&req.name, "Please tell us your name!")?.trim().to_string();
    let email = normalize_email(required(&req.email, "Please provide your email")?);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::Validation("Please provide a valid email".into()));
    }
    let password = validate_new_password(&req.password, &req.password_confirm)?;

    let password_hash = state.hasher.hash_async(password.to_string()).await?;

    let user = state
        .store
        .create(NewUser {
            name,
            email,
            photo: req.photo.filter(|p| !p.trim().is_empty()),
            password_hash,
        })
        .await
        .map_err(|e| match e {
            StoreError::DuplicateEmail => AppError::Validation(
                "Duplicate field value: email. Please use another value!".into(),
            ),
            other => AppError::Internal(anyhow::Error::new(other).context("create user")),
        })?;

    info!(user_id = %user.id, "user signed up");
    Ok(user)
}

pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<User> {
    let (Some(email), Some(password)) = (
        req.email.as_deref().filter(|e| !e.trim().is_empty()),
        req.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::Validation("Please provide email and password!".into()));
    };
    let email = normalize_email(email);

    let user = state
        .store
        .find_by_email(&email)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("find user by email")))?;

    // Unknown emails still pay for one verification so response time does not
    // reveal which addresses are registered.
    let stored_hash = user
        .as_ref()
        .map(|u| u.password_hash.clone())
        .unwrap_or_else(|| state.hasher.dummy_hash().to_string());
    let ok = state
        .hasher
        .verify_async(password.to_string(), stored_hash)
        .await;

    match user {
        Some(user) if ok => {
            info!(user_id = %user.id, "user logged in");
            Ok(user)
        }
        Some(user) => {
            warn!(user_id = %user.id, "login invalid password");
            Err(AppError::Unauthenticated("Incorrect email or password".into()))
        }
        None => {
            warn!("login unknown email");
            Err(AppError::Unauthenticated("Incorrect email or password".into()))
        }
    }
}

pub async fn forgot_password(state: &AppState, req: ForgotPasswordRequest) -> AppResult<()> {
    let email = normalize_email(required(&req.email, "Please provide your email")?);

    let user = state
        .store
        .find_by_email(&email)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("find user by email")))?
        .ok_or_else(|| AppError::NotFound("There is no user with that email address.".into()))?;

    let token = ResetTokenManager::generate();
    state
        .store
        .set_reset_token(user.id, &token.hash, token.expires_at)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("store reset token")))?;

    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.email.public_base_url, token.raw
    );
    let message = password_reset_email(&user.email, &user.name, &reset_url);

    if let Err(send_err) = state.mailer.send(message).await {
        error!(user_id = %user.id, error = ?send_err, "reset email delivery failed; rolling back");
        state.store.clear_reset_token(user.id, &token.hash).await.map_err(|e| {
            AppError::Internal(
                anyhow::Error::new(e).context("roll back reset token after delivery failure"),
            )
        })?;
        return Err(AppError::ExternalService(
            "There was an error sending the email. Try again later!".into(),
        ));
    }

    info!(user_id = %user.id, "reset token sent");
    Ok(())
}

pub async fn reset_password(
    state: &AppState,
    raw_token: &str,
    req: ResetPasswordRequest,
) -> AppResult<User> {
    let password = validate_new_password(&req.password, &req.password_confirm)?;
    let invalid = || AppError::TokenError("Token is invalid or has expired".into());

    let token_hash = ResetTokenManager::hash_token(raw_token);
    let user = state
        .store
        .find_by_reset_token(&token_hash)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("find user by reset token")))?
        .ok_or_else(invalid)?;

    let (Some(stored_hash), Some(stored_expiry)) =
        (user.password_reset_token.as_deref(), user.password_reset_expires)
    else {
        return Err(AppError::internal(format!(
            "user {} has a reset token without an expiry",
            user.id
        )));
    };

    let now = OffsetDateTime::now_utc();
    if !ResetTokenManager::verify(raw_token, stored_hash, stored_expiry, now) {
        if now >= stored_expiry {
            warn!(user_id = %user.id, "expired reset token presented; clearing");
            state.store.clear_reset_token(user.id, &token_hash).await.map_err(|e| {
                AppError::Internal(anyhow::Error::new(e).context("clear expired reset token"))
            })?;
        }
        return Err(invalid());
    }

    let new_hash = state.hasher.hash_async(password.to_string()).await?;

    let updated = state
        .store
        .consume_reset_token(user.id, &token_hash, now, &new_hash, password_changed_at(now))
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("consume reset token")))?
        .ok_or_else(|| {
            warn!(user_id = %user.id, "reset token consumed concurrently");
            invalid()
        })?;

    info!(user_id = %updated.id, "password reset");
    Ok(updated)
}

pub async fn update_password(
    state: &AppState,
    principal: &AuthUser,
    req: UpdatePasswordRequest,
) -> AppResult<User> {
    let current = required(&req.password_current, "Please provide your current password")?;
    let password = validate_new_password(&req.password, &req.password_confirm)?;
    let user = &principal.0;

    if !state
        .hasher
        .verify_async(current.to_string(), user.password_hash.clone())
        .await
    {
        warn!(user_id = %user.id, "update password with wrong current password");
        return Err(AppError::Unauthenticated("Your current password is wrong".into()));
    }

    let new_hash = state.hasher.hash_async(password.to_string()).await?;
    let now = OffsetDateTime::now_utc();
    let updated = state
        .store
        .update_password(user.id, &user.password_hash, &new_hash, password_changed_at(now))
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("update password")))?
        .ok_or_else(|| {
            warn!(user_id = %user.id, "password changed while update was in flight");
            AppError::Unauthenticated(
                "User recently changed password! Please log in again.".into(),
            )
        })?;

    info!(user_id = %updated.id, "password updated");
    Ok(updated)
}

pub async fn deactivate(state: &AppState, principal: &AuthUser) -> AppResult<()> {
    let closed = state
        .store
        .deactivate(principal.0.id)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("deactivate user")))?;
    if !closed {
        return Err(AppError::NotFound("User no longer exists".into()));
    }
    info!(user_id = %principal.0.id, "account deactivated");
    Ok(())
}

/// Caller must already have passed `restrict_to(&[Role::Admin])`.
pub async fn change_role(
    state: &AppState,
    admin: &AuthUser,
    target: Uuid,
    role: &str,
) -> AppResult<User> {
    let role: Role = role
        .parse()
        .map_err(|e: crate::auth::repo_types::UnknownRole| AppError::Validation(e.to_string()))?;

    let updated = state
        .store
        .set_role(target, role)
        .await
        .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("set role")))?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".into()))?;

    info!(admin_id = %admin.0.id, user_id = %updated.id, role = %role, "role changed");
    Ok(updated)
}
