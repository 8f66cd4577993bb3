use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Role, User};

/// Request body for signup. Any client-supplied role is ignored.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "passwordConfirm")]
    pub password_confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "passwordConfirm")]
    pub password_confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    #[serde(default, rename = "passwordCurrent")]
    pub password_current: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "passwordConfirm")]
    pub password_confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            photo: u.photo.clone(),
            role: u.role,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub status: &'static str,
    pub data: UserData,
}

impl UserEnvelope {
    pub fn success(user: &User) -> Self {
        Self {
            status: "success",
            data: UserData {
                user: PublicUser::from(user),
            },
        }
    }
}

/// Body returned by every endpoint that issues a session.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub status: &'static str,
    pub token: String,
    pub data: UserData,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
}
