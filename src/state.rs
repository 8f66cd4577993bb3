use std::sync::Arc;

use anyhow::Context;

use crate::{
    auth::{
        jwt::TokenService,
        password::PasswordHasher,
        repo::{CredentialStore, PgCredentialStore},
        session::SessionIssuer,
    },
    config::AppConfig,
    email::{EmailSender, LettreMailer},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub mailer: Arc<dyn EmailSender>,
    pub tokens: TokenService,
    pub hasher: PasswordHasher,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let store = Arc::new(PgCredentialStore::new(db)) as Arc<dyn CredentialStore>;
        let mailer = Arc::new(LettreMailer::new(&config.email)?) as Arc<dyn EmailSender>;

        Self::from_parts(config, store, mailer)
    }

    /// Secret material and hashing cost are fixed here, once per process.
    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn EmailSender>,
    ) -> anyhow::Result<Self> {
        config.jwt.validate()?;
        let tokens = TokenService::new(&config.jwt);
        let hasher = PasswordHasher::new(config.argon2)?;
        Ok(Self {
            config,
            store,
            mailer,
            tokens,
            hasher,
        })
    }

    pub fn sessions(&self) -> SessionIssuer<'_> {
        SessionIssuer::new(&self.tokens, &self.config.jwt, self.config.environment)
    }
}
