use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod services;

pub fn router(max_file_size: u64) -> Router<AppState> {
    handlers::upload_routes(max_file_size)
}
