use crate::state::AppState;
use axum::Router;

mod claims;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
#[cfg(test)]
pub(crate) mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod reset;
pub mod services;
pub mod session;

pub fn router(state: AppState) -> Router<AppState> {
    handlers::user_routes(state)
}
