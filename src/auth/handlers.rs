use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header::SET_COOKIE, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser, ResetPasswordRequest,
            SessionStatus, SignupRequest, UpdatePasswordRequest, UpdateRoleRequest, UserEnvelope,
        },
        extractors::{protect, AuthUser, MaybeUser},
        repo_types::{Role, User},
        services,
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub fn user_routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
        .route("/session", get(session));

    // The gate stores the principal in extensions; `AuthUser` picks it up.
    let protected = Router::new()
        .route("/updateMyPassword", patch(update_my_password))
        .route("/me", get(me))
        .route("/deleteMe", delete(delete_me))
        .route("/:id/role", patch(update_role))
        .route_layer(middleware::from_fn_with_state(state, protect));

    public.merge(protected)
}

/// Malformed bodies surface as a validation failure in the usual envelope.
fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload.map(|Json(body)| body).map_err(|e| {
        warn!(error = %e, "rejected request body");
        AppError::Validation(format!("Invalid input data. {}", e.body_text()))
    })
}

fn issue_session(state: &AppState, user: &User, status: StatusCode) -> AppResult<Response> {
    Ok(state.sessions().issue(user)?.into_response_with(status)?)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> AppResult<Response> {
    let user = services::signup(&state, body(payload)?).await?;
    issue_session(&state, &user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Response> {
    let user = services::login(&state, body(payload)?).await?;
    issue_session(&state, &user, StatusCode::OK)
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> AppResult<Response> {
    let cookie = state.sessions().logout_cookie().header_value()?;
    let mut res = Json(MessageResponse {
        status: "success",
        message: None,
    })
    .into_response();
    res.headers_mut().insert(SET_COOKIE, cookie);
    Ok(res)
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    services::forgot_password(&state, body(payload)?).await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: Some("Token sent to email!"),
    }))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AppResult<Response> {
    let user = services::reset_password(&state, &token, body(payload)?).await?;
    issue_session(&state, &user, StatusCode::OK)
}

#[instrument(skip(state, principal, payload), fields(user_id = %principal.0.id))]
pub async fn update_my_password(
    State(state): State<AppState>,
    principal: AuthUser,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> AppResult<Response> {
    let user = services::update_password(&state, &principal, body(payload)?).await?;
    issue_session(&state, &user, StatusCode::OK)
}

#[instrument(skip(principal), fields(user_id = %principal.0.id))]
pub async fn me(principal: AuthUser) -> Json<UserEnvelope> {
    Json(UserEnvelope::success(&principal.0))
}

#[instrument(skip(state, principal), fields(user_id = %principal.0.id))]
pub async fn delete_me(State(state): State<AppState>, principal: AuthUser) -> AppResult<StatusCode> {
    services::deactivate(&state, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Never fails: a bad or missing credential just reads as anonymous.
pub async fn session(MaybeUser(user): MaybeUser) -> Json<SessionStatus> {
    Json(SessionStatus {
        authenticated: user.is_some(),
        user: user.as_ref().map(PublicUser::from),
    })
}

#[instrument(skip(state, principal, payload), fields(admin_id = %principal.0.id))]
pub async fn update_role(
    State(state): State<AppState>,
    principal: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> AppResult<Json<UserEnvelope>> {
    principal.restrict_to(&[Role::Admin])?;
    let Path(id) = id.map_err(|e| AppError::Validation(format!("Invalid id. {}", e.body_text())))?;
    let req = body(payload)?;
    let user = services::change_role(&state, &principal, id, &req.role).await?;
    Ok(Json(UserEnvelope::success(&user)))
}
