//! Defines the endpoint for creating a new transaction.
use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
};
use axum_extra::extract::WithRejection;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    currency::Currency,
    transaction::{
        Transaction,
        core::{DEFAULT_CATEGORY, DEFAULT_ITEM, create_transaction},
    },
};

/// The state needed to create a transaction.
#[derive(Debug, Clone)]
pub struct CreateTransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CreateTransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The JSON body for creating a transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionCreate {
    /// The chat platform ID of the person who spent the money.
    pub user_id: String,
    /// The display name of the person who spent the money.
    pub user_name: String,
    /// The amount of money spent.
    pub amount: f64,
    /// `CNY` or `HKD`; any other code is rejected.
    pub currency: Currency,
    /// A short category name.
    #[serde(default = "default_category")]
    pub category: String,
    /// What the money was spent on.
    #[serde(default = "default_item")]
    pub item: String,
    /// The text the expense was parsed from, if any.
    #[serde(default)]
    pub raw_text: String,
    /// Path of a previously uploaded receipt image.
    #[serde(default)]
    pub receipt_image_path: Option<String>,
    /// When the expense happened, defaults to now.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_owned()
}

fn default_item() -> String {
    DEFAULT_ITEM.to_owned()
}

/// A route handler for creating a new transaction, responds with the stored transaction.
pub async fn create_transaction_endpoint(
    State(state): State<CreateTransactionState>,
    WithRejection(Json(body), _): WithRejection<Json<TransactionCreate>, Error>,
) -> Result<Json<Transaction>, Error> {
    let builder = Transaction::build(&body.user_id, &body.user_name, body.amount, body.currency)
        .category(&body.category)
        .item(&body.item)
        .raw_text(&body.raw_text)
        .receipt_image_path(body.receipt_image_path)
        .created_at(body.created_at);

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let transaction = create_transaction(builder, &connection)?;
    tracing::debug!("created transaction #{}", transaction.id);

    Ok(Json(transaction))
}
