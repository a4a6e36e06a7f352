//! Export of the ledger as a CSV file.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    http::header,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{Query, WithRejection};
use rusqlite::Connection;
use serde::Deserialize;
use time::{format_description::BorrowedFormatItem, macros::format_description};
use time_tz::Tz;

use crate::{
    AppState, Error,
    currency::Currency,
    timezone::{find_timezone, to_local},
    transaction::{Transaction, get_all_transactions},
};

/// The state needed to export transactions.
#[derive(Debug, Clone)]
pub struct ExportState {
    /// The database connection for reading transactions.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The canonical timezone that exported timestamps are shown in.
    pub local_timezone: String,
}

impl FromRef<AppState> for ExportState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// Optional filters for the export.
#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    /// Only export one ledger.
    #[serde(default)]
    pub currency: Option<Currency>,
    /// Only export transactions from this year (UTC).
    #[serde(default)]
    pub year: Option<i32>,
    /// Only export transactions from this month (UTC), requires `year`.
    #[serde(default)]
    pub month: Option<u8>,
}

impl ExportParams {
    fn matches(&self, transaction: &Transaction) -> bool {
        let Some(year) = self.year else {
            return true;
        };

        let created_at = transaction.created_at;
        created_at.year() == year
            && self
                .month
                .is_none_or(|month| u8::from(created_at.month()) == month)
    }

    /// The download name, e.g. `transactions_HKD_2025_03.csv`.
    pub fn file_name(&self) -> String {
        let mut parts = vec!["transactions".to_owned()];

        if let Some(currency) = self.currency {
            parts.push(currency.to_string());
        }

        if let Some(year) = self.year {
            parts.push(year.to_string());

            if let Some(month) = self.month {
                parts.push(format!("{month:02}"));
            }
        }

        format!("{}.csv", parts.join("_"))
    }
}

const HEADER: [&str; 9] = [
    "ID",
    "时间",
    "记账人",
    "金额",
    "币种",
    "类别",
    "项目",
    "备注",
    "票据路径",
];

const TIMESTAMP_FORMAT: &[BorrowedFormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Write `transactions` as CSV, showing timestamps as local time in `timezone`.
///
/// The output only depends on the arguments, so exporting the same
/// transactions twice gives identical files.
///
/// # Errors
/// Returns an [Error::CsvError] if a record cannot be written.
pub fn write_csv(transactions: &[Transaction], timezone: &Tz) -> Result<String, Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(HEADER)
        .map_err(|error| Error::CsvError(error.to_string()))?;

    for transaction in transactions {
        let local_time = to_local(transaction.created_at, timezone)
            .format(TIMESTAMP_FORMAT)
            .map_err(|error| Error::CsvError(error.to_string()))?;

        writer
            .write_record([
                transaction.id.to_string(),
                local_time,
                transaction.user_name.clone(),
                format!("{:.2}", transaction.amount),
                transaction.currency.to_string(),
                transaction.category.clone(),
                transaction.item.clone(),
                transaction.raw_text.clone(),
                transaction.receipt_image_path.clone().unwrap_or_default(),
            ])
            .map_err(|error| Error::CsvError(error.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| Error::CsvError(error.to_string()))?;

    String::from_utf8(bytes).map_err(|error| Error::CsvError(error.to_string()))
}

/// A route handler that downloads the (optionally filtered) ledger as a CSV attachment.
pub async fn export_csv_endpoint(
    State(state): State<ExportState>,
    WithRejection(Query(params), _): WithRejection<Query<ExportParams>, Error>,
) -> Result<Response, Error> {
    let timezone = find_timezone(&state.local_timezone)?;

    let transactions = {
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        get_all_transactions(params.currency, &connection)?
    };

    let transactions: Vec<Transaction> = transactions
        .into_iter()
        .filter(|transaction| params.matches(transaction))
        .collect();

    let body = write_csv(&transactions, timezone)?;
    tracing::info!(
        "Exporting {} transactions as {}",
        transactions.len(),
        params.file_name()
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", params.file_name()),
            ),
        ],
        body,
    )
        .into_response())
}
