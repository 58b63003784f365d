pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod messaging;
pub mod ports;
pub mod use_cases;
pub mod worker;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::use_cases::CreateTopUp;

#[derive(Clone)]
pub struct AppState {
    pub create_topup: Arc<CreateTopUp>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/topup", post(handlers::create_topup))
        .with_state(state)
}
