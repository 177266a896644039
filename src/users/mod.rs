use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod store;
pub mod validation;

pub fn router() -> Router<AppState> {
    handlers::admin_routes()
}
