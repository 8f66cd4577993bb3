use axum::{
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use time::{format_description::well_known::Rfc2822, Duration, OffsetDateTime};

use crate::{
    auth::{
        dto::{AuthResponse, PublicUser, UserData},
        jwt::TokenService,
        repo_types::User,
    },
    config::{Environment, JwtConfig},
};

pub const SESSION_COOKIE: &str = "jwt";

const LOGGED_OUT_VALUE: &str = "loggedout";

/// Everything needed to render one `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSpec {
    pub name: &'static str,
    pub value: String,
    pub expires: OffsetDateTime,
    pub http_only: bool,
    pub secure: bool,
}

impl CookieSpec {
    pub fn header_value(&self) -> anyhow::Result<HeaderValue> {
        // Cookie dates use the IMF-fixdate form, which RFC 2822 with GMT matches.
        let expires = self
            .expires
            .format(&Rfc2822)?
            .replace("+0000", "GMT");
        let mut cookie = format!("{}={}; Path=/; Expires={}", self.name, self.value, expires);
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        Ok(HeaderValue::from_str(&cookie)?)
    }
}

/// A credential ready to hand to the client, with the sanitized identity.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub cookie: CookieSpec,
    pub user: PublicUser,
}

impl IssuedSession {
    /// Standard envelope: `status`, `token`, `data.user`, plus the cookie.
    pub fn into_response_with(self, status: StatusCode) -> anyhow::Result<Response> {
        let cookie = self.cookie.header_value()?;
        let body = AuthResponse {
            status: "success",
            token: self.token,
            data: UserData { user: self.user },
        };
        let mut res = (status, Json(body)).into_response();
        res.headers_mut().insert(SET_COOKIE, cookie);
        Ok(res)
    }
}

/// Stateless: only borrows the token service and the cookie settings.
pub struct SessionIssuer<'a> {
    tokens: &'a TokenService,
    cookie_ttl: Duration,
    secure: bool,
}

impl<'a> SessionIssuer<'a> {
    pub fn new(tokens: &'a TokenService, jwt: &JwtConfig, env: Environment) -> Self {
        Self {
            tokens,
            cookie_ttl: Duration::days(jwt.cookie_ttl_days),
            secure: env.is_production(),
        }
    }

    pub fn issue(&self, user: &User) -> anyhow::Result<IssuedSession> {
        let token = self.tokens.sign(user.id)?;
        let cookie = CookieSpec {
            name: SESSION_COOKIE,
            value: token.clone(),
            expires: OffsetDateTime::now_utc() + self.cookie_ttl,
            http_only: true,
            secure: self.secure,
        };
        Ok(IssuedSession {
            token,
            cookie,
            user: PublicUser::from(user),
        })
    }

    /// Overwrites the session cookie with a throwaway value that expires in seconds.
    pub fn logout_cookie(&self) -> CookieSpec {
        CookieSpec {
            name: SESSION_COOKIE,
            value: LOGGED_OUT_VALUE.to_string(),
            expires: OffsetDateTime::now_utc() + Duration::seconds(10),
            http_only: true,
            secure: self.secure,
        }
    }
}
