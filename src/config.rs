use anyhow::ensure;

use crate::auth::password::Argon2Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
    pub cookie_ttl_days: i64,
}

/// Upper bounds keep expiry arithmetic far from `time`'s representable range.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;
pub const MAX_COOKIE_TTL_DAYS: i64 = 365 * 10;

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.secret.is_empty(), "JWT_SECRET must not be empty");
        ensure!(
            (1..=MAX_TOKEN_TTL_MINUTES).contains(&self.ttl_minutes),
            "JWT_EXPIRES_IN_MINUTES must be between 1 and {MAX_TOKEN_TTL_MINUTES}, got {}",
            self.ttl_minutes
        );
        ensure!(
            (1..=MAX_COOKIE_TTL_DAYS).contains(&self.cookie_ttl_days),
            "JWT_COOKIE_EXPIRES_IN_DAYS must be between 1 and {MAX_COOKIE_TTL_DAYS}, got {}",
            self.cookie_ttl_days
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum EmailTransportConfig {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
    File {
        path: String,
    },
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub transport: EmailTransportConfig,
    pub from_email: String,
    pub from_name: String,
    /// Scheme and host the reset link points at, without a trailing slash.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub argon2: Argon2Params,
    pub email: EmailConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = std::env::var("APP_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            ttl_minutes: env_or("JWT_EXPIRES_IN_MINUTES", 60 * 24 * 90),
            cookie_ttl_days: env_or("JWT_COOKIE_EXPIRES_IN_DAYS", 90),
        };
        jwt.validate()?;

        let defaults = Argon2Params::default();
        let argon2 = Argon2Params {
            memory_kib: env_or("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_or("ARGON2_PARALLELISM", defaults.parallelism),
        };

        let transport = match std::env::var("EMAIL_TRANSPORT").as_deref() {
            Ok("smtp") => EmailTransportConfig::Smtp {
                host: std::env::var("SMTP_HOST")?,
                port: env_or("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME")?,
                password: std::env::var("SMTP_PASSWORD")?,
            },
            _ => EmailTransportConfig::File {
                path: std::env::var("EMAIL_FILE_DIR").unwrap_or_else(|_| "./emails".into()),
            },
        };
        let email = EmailConfig {
            transport,
            from_email: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "no-reply@tourauth.local".into()),
            from_name: std::env::var("EMAIL_FROM_NAME").unwrap_or_else(|_| "Tours".into()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
        };

        Ok(Self {
            environment,
            database_url,
            jwt,
            argon2,
            email,
        })
    }
}
