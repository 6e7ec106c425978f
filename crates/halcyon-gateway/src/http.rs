use std::sync::Arc;

use axum::Router;

use crate::app::AppState;

pub mod health;
pub mod management;
pub mod ui;

pub fn management_router() -> Router<Arc<AppState>> {
    management::router()
}
