//! Transaction management for the family ledger.
//!
//! This module contains everything related to transactions:
//! - The `Transaction` model and `TransactionBuilder` for creating transactions
//! - Database functions for storing, querying, and managing transactions
//! - The JSON route handlers for transactions

mod core;
mod create_endpoint;
mod list_endpoint;
mod reset_endpoint;
mod upload_receipt_endpoint;

pub use self::core::{
    DEFAULT_CATEGORY, DEFAULT_ITEM, Transaction, TransactionBuilder, create_transaction,
    create_transaction_table, delete_user_transaction, get_all_transactions,
    get_latest_user_transaction, get_transaction, update_user_transaction_item,
};
pub use create_endpoint::{TransactionCreate, create_transaction_endpoint};
pub use list_endpoint::list_transactions_endpoint;
pub use reset_endpoint::{MessageResponse, reset_transactions_endpoint};
pub use upload_receipt_endpoint::{receipt_path, upload_receipt_endpoint};
