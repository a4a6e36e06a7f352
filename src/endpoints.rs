//! The API endpoints URIs.
//!
//! For endpoints that take a parameter, e.g., '/transactions/{transaction_id}/upload-receipt',
//! use [format_endpoint].

/// The root route, reports that the API is running.
pub const ROOT: &str = "/";
/// The route to list and create transactions.
pub const TRANSACTIONS: &str = "/transactions/";
/// The route for attaching a receipt image to a transaction.
pub const UPLOAD_RECEIPT: &str = "/transactions/{transaction_id}/upload-receipt";
/// The route that deletes every transaction.
pub const RESET_TRANSACTIONS: &str = "/transactions/reset";
/// The route for downloading transactions as a CSV file.
pub const EXPORT_CSV: &str = "/export-csv/";
/// The route that serves uploaded receipt images.
pub const UPLOADS: &str = "/uploads";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// Expects `endpoint_path` to contain exactly one parameter in braces, e.g. `{transaction_id}`.
/// If there is no parameter, `endpoint_path` is returned unchanged.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let (Some(start), Some(end)) = (endpoint_path.find('{'), endpoint_path.find('}')) else {
        return endpoint_path.to_owned();
    };

    format!("{}{id}{}", &endpoint_path[..start], &endpoint_path[end + 1..])
}
