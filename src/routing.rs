//! Application router configuration.

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::{
    AppState,
    csv_export::export_csv_endpoint,
    endpoints,
    transaction::{
        create_transaction_endpoint, list_transactions_endpoint, reset_transactions_endpoint,
        upload_receipt_endpoint,
    },
};

/// Receipt photos from phones are larger than axum's default body limit.
const MAX_RECEIPT_BYTES: usize = 20 * 1024 * 1024;

/// Return a router with all the app's routes.
///
/// Uploaded receipts are served from [AppState::upload_dir] under
/// [endpoints::UPLOADS]. Cross-origin requests are allowed from anywhere so
/// that the web front end can be hosted separately.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(endpoints::ROOT, get(get_root))
        .route(
            endpoints::TRANSACTIONS,
            get(list_transactions_endpoint).post(create_transaction_endpoint),
        )
        .route(
            endpoints::UPLOAD_RECEIPT,
            post(upload_receipt_endpoint).layer(DefaultBodyLimit::max(MAX_RECEIPT_BYTES)),
        )
        .route(
            endpoints::RESET_TRANSACTIONS,
            delete(reset_transactions_endpoint),
        )
        .route(endpoints::EXPORT_CSV, get(export_csv_endpoint))
        .nest_service(endpoints::UPLOADS, ServeDir::new(&state.upload_dir))
        .fallback(get_404_not_found)
        .layer(cors)
        .with_state(state)
}

/// Report that the API is up.
async fn get_root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Family Ledger API is running" }))
}

async fn get_404_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" }))).into_response()
}
