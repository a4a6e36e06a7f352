//! Defines the endpoint for listing transactions.
use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
};
// axum_extra's Query treats empty strings as missing values.
use axum_extra::extract::{Query, WithRejection};
use rusqlite::Connection;
use serde::Deserialize;

use crate::{
    AppState, Error,
    transaction::{Transaction, core::list_transactions},
};

/// The state needed to list transactions.
#[derive(Debug, Clone)]
pub struct ListTransactionsState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for ListTransactionsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The page of transactions to return.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// How many of the newest transactions to skip.
    #[serde(default)]
    pub skip: Option<u64>,
    /// The maximum number of transactions to return.
    #[serde(default)]
    pub limit: Option<u64>,
}

const DEFAULT_LIMIT: u64 = 100;

/// A route handler that returns transactions as JSON, newest first.
pub async fn list_transactions_endpoint(
    State(state): State<ListTransactionsState>,
    WithRejection(Query(params), _): WithRejection<Query<ListParams>, Error>,
) -> Result<Json<Vec<Transaction>>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let transactions = list_transactions(
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(DEFAULT_LIMIT),
        &connection,
    )?;

    Ok(Json(transactions))
}
