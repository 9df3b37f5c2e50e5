pub mod realtime;
pub mod status;

use axum::Router;

use crate::state::AppState;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(realtime::routes(state.clone()))
        .merge(status::routes(state))
}
