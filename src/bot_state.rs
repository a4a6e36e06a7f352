//! Per-user conversation state for the chat bot.
//!
//! After the bot parses an expense it asks the user to name the item. The
//! parsed draft waits in the `bot_state` table, one row per user, until the
//! user's next text message. Storing a new draft replaces the old one.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    currency::Currency,
    transaction::{Transaction, TransactionBuilder},
};

/// A parsed expense waiting for the user to confirm the item name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExpense {
    /// The chat platform ID of the user.
    pub user_id: String,
    /// The user's display name.
    pub user_name: String,
    /// The parsed amount.
    pub amount: f64,
    /// The parsed currency.
    pub currency: Currency,
    /// The parsed category.
    pub category: String,
    /// The item name suggested by the parser, used if the user replies with nothing usable.
    pub item: String,
    /// The message text, or a marker for image receipts.
    pub raw_text: String,
    /// The stored receipt image, for drafts created from photos.
    pub receipt_image_path: Option<String>,
    /// When the expense happened, if the receipt said so.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl PendingExpense {
    /// Turn the draft into a transaction named `item`.
    pub fn into_transaction(self, item: &str) -> TransactionBuilder {
        Transaction::build(&self.user_id, &self.user_name, self.amount, self.currency)
            .category(&self.category)
            .item(item)
            .raw_text(&self.raw_text)
            .receipt_image_path(self.receipt_image_path)
            .created_at(self.created_at)
    }
}

/// Store `pending` as the draft for its user, replacing any earlier draft.
///
/// # Errors
/// Returns an error if the draft cannot be serialized or stored.
pub fn set_pending_expense(pending: &PendingExpense, connection: &Connection) -> Result<(), Error> {
    let data = serde_json::to_string(pending)?;

    connection.execute(
        "INSERT INTO bot_state (user_id, data) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET data = excluded.data",
        (&pending.user_id, data),
    )?;

    Ok(())
}

/// Remove and return the draft for `user_id`, if there is one.
///
/// # Errors
/// Returns an error if the query fails or the stored draft cannot be parsed.
pub fn take_pending_expense(
    user_id: &str,
    connection: &Connection,
) -> Result<Option<PendingExpense>, Error> {
    let data: Option<String> = connection
        .query_row(
            "DELETE FROM bot_state WHERE user_id = ?1 RETURNING data",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

/// Create the bot state table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_bot_state_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS bot_state (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}
