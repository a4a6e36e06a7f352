//! Defines the core data models and database queries for transactions.

use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

use crate::{Error, currency::Currency, database_id::TransactionId};

// ============================================================================
// MODELS
// ============================================================================

/// The category used when nothing better is known.
pub const DEFAULT_CATEGORY: &str = "其他";

/// The item name used when the user did not name the expense.
pub const DEFAULT_ITEM: &str = "消费";

/// An expense recorded by one member of the family.
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The chat platform ID of the person who recorded the expense.
    pub user_id: String,
    /// The display name of the person who recorded the expense.
    pub user_name: String,
    /// The amount of money spent.
    pub amount: f64,
    /// Which ledger the expense belongs to.
    pub currency: Currency,
    /// A short category name, e.g. "餐饮" or "交通".
    pub category: String,
    /// What the money was spent on.
    pub item: String,
    /// The message or OCR text the expense was parsed from.
    pub raw_text: String,
    /// Path of the receipt image relative to the server root, e.g. "uploads/abc.jpg".
    pub receipt_image_path: Option<String>,
    /// When the expense happened, always stored in UTC.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(user_id: &str, user_name: &str, amount: f64, currency: Currency) -> TransactionBuilder {
        TransactionBuilder {
            user_id: user_id.to_owned(),
            user_name: user_name.to_owned(),
            amount,
            currency,
            category: DEFAULT_CATEGORY.to_owned(),
            item: DEFAULT_ITEM.to_owned(),
            raw_text: String::new(),
            receipt_image_path: None,
            created_at: None,
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// The user, amount and currency are required. The category defaults to
/// [DEFAULT_CATEGORY], the item to [DEFAULT_ITEM] and the timestamp to the
/// time the row is inserted.
///
/// # Examples
///
/// ```ignore
/// use crate::{Currency, transaction::Transaction};
///
/// let builder = Transaction::build("42", "Alice", 80.0, Currency::HKD)
///     .category("交通")
///     .item("打车去旺角")
///     .raw_text("打车去旺角 80");
/// ```
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    /// The chat platform ID of the person who recorded the expense.
    pub user_id: String,
    /// The display name of the person who recorded the expense.
    pub user_name: String,
    /// The amount of money spent.
    pub amount: f64,
    /// Which ledger the expense belongs to.
    pub currency: Currency,
    /// A short category name.
    pub category: String,
    /// What the money was spent on.
    pub item: String,
    /// The text the expense was parsed from.
    pub raw_text: String,
    /// Optional path to a receipt image.
    pub receipt_image_path: Option<String>,
    /// When the expense happened. `None` means "now".
    pub created_at: Option<OffsetDateTime>,
}

impl TransactionBuilder {
    /// Set the category for the transaction.
    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_owned();
        self
    }

    /// Set the item for the transaction.
    pub fn item(mut self, item: &str) -> Self {
        self.item = item.to_owned();
        self
    }

    /// Set the raw text for the transaction.
    pub fn raw_text(mut self, raw_text: &str) -> Self {
        self.raw_text = raw_text.to_owned();
        self
    }

    /// Set the receipt image path for the transaction.
    pub fn receipt_image_path(mut self, receipt_image_path: Option<String>) -> Self {
        self.receipt_image_path = receipt_image_path;
        self
    }

    /// Set when the transaction happened.
    pub fn created_at(mut self, created_at: Option<OffsetDateTime>) -> Self {
        self.created_at = created_at;
        self
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const SELECT_COLUMNS: &str = "SELECT id, user_id, user_name, amount, currency, category, item, \
    raw_text, receipt_image_path, created_at FROM \"transaction\"";

const NEWEST_FIRST: &str = "ORDER BY created_at DESC, id DESC";

/// The number of rows changed by an `UPDATE` or `DELETE` statement.
pub type RowsAffected = usize;

/// Create a new transaction in the database from a builder.
///
/// The timestamp is converted to UTC before it is stored so that rows sort
/// chronologically.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn create_transaction(
    builder: TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let created_at = builder
        .created_at
        .unwrap_or_else(OffsetDateTime::now_utc)
        .to_offset(UtcOffset::UTC);

    let transaction = connection
        .prepare(
            "INSERT INTO \"transaction\"
                (user_id, user_name, amount, currency, category, item, raw_text, receipt_image_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING id, user_id, user_name, amount, currency, category, item, raw_text, receipt_image_path, created_at",
        )?
        .query_row(
            (
                builder.user_id,
                builder.user_name,
                builder.amount,
                builder.currency,
                builder.category,
                builder.item,
                builder.raw_text,
                builder.receipt_image_path,
                created_at,
            ),
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!("{SELECT_COLUMNS} WHERE id = :id"))?
        .query_row(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// Get a page of transactions, newest first.
///
/// `offset` rows are skipped and at most `limit` rows are returned.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn list_transactions(
    offset: u64,
    limit: u64,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "{SELECT_COLUMNS} {NEWEST_FIRST} LIMIT :limit OFFSET :offset"
        ))?
        .query_map(
            &[(":limit", &(limit as i64)), (":offset", &(offset as i64))],
            map_transaction_row,
        )?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Get every transaction, newest first, optionally only those in `currency`.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_all_transactions(
    currency: Option<Currency>,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    let mut statement = connection.prepare(&format!(
        "{SELECT_COLUMNS} WHERE (:currency IS NULL OR currency = :currency) {NEWEST_FIRST}"
    ))?;

    statement
        .query_map(&[(":currency", &currency)], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Get the most recent transaction recorded by `user_id`, if any.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn get_latest_user_transaction(
    user_id: &str,
    connection: &Connection,
) -> Result<Option<Transaction>, Error> {
    connection
        .prepare(&format!(
            "{SELECT_COLUMNS} WHERE user_id = :user_id {NEWEST_FIRST} LIMIT 1"
        ))?
        .query_row(&[(":user_id", &user_id)], map_transaction_row)
        .optional()
        .map_err(Error::from)
}

/// Get the total number of transactions in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
#[cfg(test)]
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| {
            row.get(0)
        })
        .map_err(|error| error.into())
}

/// Delete the transaction `id` if it was recorded by `user_id`.
///
/// Returns the number of deleted rows, zero when the transaction does not
/// exist or belongs to someone else.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn delete_user_transaction(
    id: TransactionId,
    user_id: &str,
    connection: &Connection,
) -> Result<RowsAffected, Error> {
    connection
        .execute(
            "DELETE FROM \"transaction\" WHERE id = ?1 AND user_id = ?2",
            (id, user_id),
        )
        .map_err(|err| err.into())
}

/// Delete every transaction and return how many were deleted.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn delete_all_transactions(connection: &Connection) -> Result<RowsAffected, Error> {
    connection
        .execute("DELETE FROM \"transaction\"", ())
        .map_err(|err| err.into())
}

/// Rename the item of transaction `id` if it was recorded by `user_id`.
///
/// Returns the number of updated rows, zero when the transaction does not
/// exist or belongs to someone else.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn update_user_transaction_item(
    id: TransactionId,
    user_id: &str,
    item: &str,
    connection: &Connection,
) -> Result<RowsAffected, Error> {
    connection
        .execute(
            "UPDATE \"transaction\" SET item = ?1 WHERE id = ?2 AND user_id = ?3",
            (item, id, user_id),
        )
        .map_err(|err| err.into())
}

/// Attach a receipt image to transaction `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn set_receipt_image_path(
    id: TransactionId,
    receipt_image_path: &str,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "UPDATE \"transaction\" SET receipt_image_path = ?1 WHERE id = ?2
             RETURNING id, user_id, user_name, amount, currency, category, item, raw_text, receipt_image_path, created_at",
        )?
        .query_row((receipt_image_path, id), map_transaction_row)?;

    Ok(transaction)
}

/// Create the transaction table in the database.
///
/// Tables created by older versions lack the `receipt_image_path` column,
/// which is added here when missing.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL CHECK (currency IN ('CNY', 'HKD')),
                category TEXT NOT NULL,
                item TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                receipt_image_path TEXT,
                created_at TEXT NOT NULL
                )",
        (),
    )?;

    add_missing_receipt_column(connection)?;

    // Used by /undo and by the newest-first listings.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_created ON \"transaction\"(user_id, created_at);",
        (),
    )?;

    Ok(())
}

fn add_missing_receipt_column(connection: &Connection) -> Result<(), rusqlite::Error> {
    let has_column = connection
        .prepare("SELECT 1 FROM pragma_table_info('transaction') WHERE name = 'receipt_image_path'")?
        .exists([])?;

    if !has_column {
        tracing::info!("Migrating database: adding receipt_image_path column");
        connection.execute(
            "ALTER TABLE \"transaction\" ADD COLUMN receipt_image_path TEXT",
            (),
        )?;
    }

    Ok(())
}

/// Map a database row to a Transaction.
fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        category: row.get(5)?,
        item: row.get(6)?,
        raw_text: row.get(7)?,
        receipt_image_path: row.get(8)?,
        created_at: row.get(9)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod database_tests {
    use rusqlite::Connection;
    use time::macros::datetime;

    use crate::{
        Currency, Error,
        db::initialize,
        transaction::core::{
            Transaction, count_transactions, create_transaction, delete_all_transactions,
            delete_user_transaction, get_all_transactions, get_latest_user_transaction,
            get_transaction, list_transactions, set_receipt_image_path,
            update_user_transaction_item,
        },
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn create_succeeds() {
        let conn = get_test_connection();

        let result = create_transaction(
            Transaction::build("1", "Alice", 12.3, Currency::HKD)
                .category("餐饮")
                .item("午饭"),
            &conn,
        );

        match result {
            Ok(transaction) => {
                assert_eq!(transaction.amount, 12.3);
                assert_eq!(transaction.currency, Currency::HKD);
                assert_eq!(transaction.item, "午饭");
                assert_eq!(transaction.receipt_image_path, None);
            }
            Err(error) => panic!("Unexpected error: {error}"),
        }
    }

    #[test]
    fn create_stores_timestamps_in_utc() {
        let conn = get_test_connection();

        let transaction = create_transaction(
            Transaction::build("1", "Alice", 1.0, Currency::CNY)
                .created_at(Some(datetime!(2025-03-01 10:00 +8))),
            &conn,
        )
        .unwrap();

        assert_eq!(transaction.created_at, datetime!(2025-03-01 02:00 UTC));
        assert!(transaction.created_at.offset().is_utc());
    }

    #[test]
    fn get_missing_transaction_is_not_found() {
        let conn = get_test_connection();

        assert_eq!(get_transaction(42, &conn), Err(Error::NotFound));
    }

    #[test]
    fn list_is_newest_first_and_paged() {
        let conn = get_test_connection();
        for day in 1..=5 {
            create_transaction(
                Transaction::build("1", "Alice", day as f64, Currency::CNY).created_at(Some(
                    datetime!(2025-01-01 00:00 UTC).replace_day(day).unwrap(),
                )),
                &conn,
            )
            .unwrap();
        }

        let page = list_transactions(1, 2, &conn).unwrap();

        let amounts: Vec<f64> = page.iter().map(|transaction| transaction.amount).collect();
        assert_eq!(amounts, vec![4.0, 3.0]);
    }

    #[test]
    fn get_all_filters_by_currency() {
        let conn = get_test_connection();
        create_transaction(Transaction::build("1", "Alice", 1.0, Currency::CNY), &conn).unwrap();
        create_transaction(Transaction::build("1", "Alice", 2.0, Currency::HKD), &conn).unwrap();

        let hkd = get_all_transactions(Some(Currency::HKD), &conn).unwrap();
        let all = get_all_transactions(None, &conn).unwrap();

        assert_eq!(hkd.len(), 1);
        assert_eq!(hkd[0].amount, 2.0);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn latest_user_transaction_ignores_other_users() {
        let conn = get_test_connection();
        let mine = create_transaction(
            Transaction::build("1", "Alice", 1.0, Currency::CNY)
                .created_at(Some(datetime!(2025-01-01 00:00 UTC))),
            &conn,
        )
        .unwrap();
        create_transaction(
            Transaction::build("2", "Bob", 2.0, Currency::CNY)
                .created_at(Some(datetime!(2025-01-02 00:00 UTC))),
            &conn,
        )
        .unwrap();

        let latest = get_latest_user_transaction("1", &conn).unwrap();

        assert_eq!(latest, Some(mine));
        assert_eq!(get_latest_user_transaction("3", &conn).unwrap(), None);
    }

    #[test]
    fn delete_is_scoped_to_user() {
        let conn = get_test_connection();
        let transaction =
            create_transaction(Transaction::build("1", "Alice", 1.0, Currency::CNY), &conn)
                .unwrap();

        assert_eq!(delete_user_transaction(transaction.id, "2", &conn), Ok(0));
        assert_eq!(delete_user_transaction(transaction.id, "1", &conn), Ok(1));
        assert_eq!(get_transaction(transaction.id, &conn), Err(Error::NotFound));
    }

    #[test]
    fn update_item_is_scoped_to_user() {
        let conn = get_test_connection();
        let transaction =
            create_transaction(Transaction::build("1", "Alice", 1.0, Currency::CNY), &conn)
                .unwrap();

        assert_eq!(
            update_user_transaction_item(transaction.id, "2", "偷改", &conn),
            Ok(0)
        );
        assert_eq!(
            update_user_transaction_item(transaction.id, "1", "买水", &conn),
            Ok(1)
        );
        assert_eq!(get_transaction(transaction.id, &conn).unwrap().item, "买水");
    }

    #[test]
    fn delete_all_reports_count() {
        let conn = get_test_connection();
        for i in 1..=3 {
            create_transaction(Transaction::build("1", "Alice", i as f64, Currency::CNY), &conn)
                .unwrap();
        }

        assert_eq!(delete_all_transactions(&conn), Ok(3));
        assert_eq!(count_transactions(&conn), Ok(0));
    }

    #[test]
    fn set_receipt_path_on_missing_transaction_is_not_found() {
        let conn = get_test_connection();

        assert_eq!(
            set_receipt_image_path(7, "uploads/a.jpg", &conn),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn legacy_table_gains_receipt_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                category TEXT NOT NULL,
                item TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            (),
        )
        .unwrap();

        initialize(&conn).unwrap();
        let transaction =
            create_transaction(Transaction::build("1", "Alice", 1.0, Currency::CNY), &conn)
                .unwrap();
        let updated = set_receipt_image_path(transaction.id, "uploads/a.jpg", &conn).unwrap();

        assert_eq!(updated.receipt_image_path.as_deref(), Some("uploads/a.jpg"));
    }
}
