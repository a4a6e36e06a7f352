//! Defines the endpoint that clears the ledger.
use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{AppState, Error, transaction::core::delete_all_transactions};

/// The state needed to delete all transactions.
#[derive(Debug, Clone)]
pub struct ResetTransactionsState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for ResetTransactionsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A human readable summary of a bulk operation.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// The summary.
    pub message: String,
}

/// A route handler that deletes every transaction and reports how many were deleted.
pub async fn reset_transactions_endpoint(
    State(state): State<ResetTransactionsState>,
) -> Result<Json<MessageResponse>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let deleted = delete_all_transactions(&connection)
        .inspect_err(|error| tracing::error!("Could not reset transactions: {error}"))?;
    tracing::warn!("Deleted all {deleted} transactions");

    Ok(Json(MessageResponse {
        message: format!("Deleted {deleted} transactions"),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Router, routing::delete};
    use axum_test::TestServer;
    use rusqlite::Connection;

    use crate::{
        Currency,
        db::initialize,
        endpoints,
        transaction::{Transaction, core::count_transactions, create_transaction},
    };

    use super::{MessageResponse, ResetTransactionsState, reset_transactions_endpoint};

    #[tokio::test]
    async fn deletes_everything() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        for amount in [1.0, 2.0] {
            create_transaction(Transaction::build("1", "Alice", amount, Currency::CNY), &conn)
                .unwrap();
        }
        let state = ResetTransactionsState {
            db_connection: Arc::new(Mutex::new(conn)),
        };
        let app = Router::new()
            .route(
                endpoints::RESET_TRANSACTIONS,
                delete(reset_transactions_endpoint),
            )
            .with_state(state.clone());
        let server = TestServer::new(app).expect("Could not create test server.");

        let response = server.delete(endpoints::RESET_TRANSACTIONS).await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<MessageResponse>(),
            MessageResponse {
                message: "Deleted 2 transactions".to_owned()
            }
        );
        let connection = state.db_connection.lock().unwrap();
        assert_eq!(count_transactions(&connection), Ok(0));
    }
}
