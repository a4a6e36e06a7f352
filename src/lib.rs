//! Family Ledger is an expense tracker for a family that spends money in both
//! Mainland China (CNY) and Hong Kong (HKD).
//!
//! This library provides a JSON REST API over a SQLite ledger, a Telegram bot
//! that turns chat messages and receipt photos into expenses, and the parsing
//! heuristics that sit between the two.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::QueryRejection;
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
pub mod bot;
mod bot_state;
mod config;
mod csv_export;
mod currency;
mod database_id;
mod db;
mod endpoints;
mod logging;
pub mod parsing;
mod routing;
mod timezone;
mod transaction;

pub use app_state::AppState;
pub use bot_state::PendingExpense;
pub use config::Config;
pub use currency::Currency;
pub use database_id::TransactionId;
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;
pub use timezone::find_timezone;
pub use transaction::{Transaction, TransactionBuilder, create_transaction};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install the terminate signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The requested resource was not found.
    ///
    /// For HTTP request handlers, the client should check that the parameters
    /// (e.g., ID) are correct and that the resource has been created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// The request body or query string could not be read, e.g. a malformed
    /// JSON body or a currency other than `CNY` or `HKD`.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A currency code other than `CNY` or `HKD` was used.
    #[error("unsupported currency \"{0}\", expected CNY or HKD")]
    InvalidCurrency(String),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// The multipart form could not be parsed or did not contain a file.
    #[error("could not parse multipart form: {0}")]
    MultipartError(String),

    /// Reading or writing a file failed, e.g. when saving a receipt image.
    #[error("file operation failed: {0}")]
    FileError(String),

    /// A value could not be converted to or from JSON.
    #[error("could not (de)serialize JSON: {0}")]
    JSONSerializationError(String),

    /// Writing the CSV export failed.
    #[error("could not write CSV: {0}")]
    CsvError(String),

    /// The chat-completion API could not be reached or returned an unusable response.
    #[error("language model request failed: {0}")]
    LlmError(String),

    /// The OCR engine failed or timed out.
    #[error("OCR failed: {0}")]
    OcrError(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::InvalidRequest(rejection.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::JSONSerializationError(value.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Error::NotFound => (StatusCode::NOT_FOUND, "Transaction not found".to_owned()),
            Error::InvalidRequest(_) | Error::InvalidCurrency(_) | Error::MultipartError(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Error::FileError(ref reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to save file: {reason}"),
            ),
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred, check the server logs for more details."
                        .to_owned(),
                )
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
