//! Defines the endpoint for attaching a receipt image to a transaction.
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    extract::{FromRef, Multipart, Path, State},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppState, Error,
    database_id::TransactionId,
    transaction::core::{get_transaction, set_receipt_image_path},
};

/// The state needed to store receipt images.
#[derive(Debug, Clone)]
pub struct UploadReceiptState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The directory receipt images are written to.
    pub upload_dir: PathBuf,
}

impl FromRef<AppState> for UploadReceiptState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            upload_dir: state.upload_dir.clone(),
        }
    }
}

/// Where the uploaded receipt was stored.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadReceiptResponse {
    /// The generated file name.
    pub filename: String,
    /// The path clients should request, relative to the server root.
    pub file_path: String,
}

/// The multipart field that carries the image.
const FILE_FIELD: &str = "file";

const DEFAULT_EXTENSION: &str = ".jpg";

/// Build the path stored in the database for an uploaded file.
///
/// The upload directory is served under `/uploads` whatever its location on
/// disk, so the stored path always starts with `uploads/`.
pub fn receipt_path(filename: &str) -> String {
    format!("uploads/{filename}")
}

/// A route handler that saves a receipt image and links it to the transaction.
///
/// The image is saved under a random name that keeps the uploaded file's
/// extension (`.jpg` when there is none).
pub async fn upload_receipt_endpoint(
    State(state): State<UploadReceiptState>,
    Path(transaction_id): Path<TransactionId>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceiptResponse>, Error> {
    {
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        get_transaction(transaction_id, &connection)?;
    }

    let (original_name, data) = read_file_field(&mut multipart).await?;

    let extension = std::path::Path::new(&original_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .filter(|extension| !extension.is_empty())
        .map(|extension| format!(".{extension}"))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_owned());
    let filename = format!("{}{extension}", Uuid::new_v4());

    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|error| Error::FileError(error.to_string()))?;
    tokio::fs::write(state.upload_dir.join(&filename), data)
        .await
        .inspect_err(|error| tracing::error!("Could not save receipt {filename}: {error}"))
        .map_err(|error| Error::FileError(error.to_string()))?;

    let file_path = receipt_path(&filename);
    {
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        set_receipt_image_path(transaction_id, &file_path, &connection)?;
    }

    tracing::info!("Stored receipt {file_path} for transaction #{transaction_id}");

    Ok(Json(UploadReceiptResponse {
        filename,
        file_path,
    }))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>), Error> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| Error::MultipartError(error.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_owned();
        let data = field.bytes().await.map_err(|error| {
            tracing::error!("Could not read data from multipart form field: {error}");
            Error::MultipartError("could not read the uploaded file".to_owned())
        })?;

        return Ok((file_name, data.to_vec()));
    }

    Err(Error::MultipartError(format!(
        "the form has no \"{FILE_FIELD}\" field"
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Router, http::StatusCode, routing::post};
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use rusqlite::Connection;
    use tempfile::TempDir;

    use crate::{
        Currency,
        db::initialize,
        endpoints::{self, format_endpoint},
        transaction::{Transaction, core::get_transaction, create_transaction},
    };

    use super::{UploadReceiptResponse, UploadReceiptState, upload_receipt_endpoint};

    fn get_test_state(upload_dir: &TempDir) -> UploadReceiptState {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        create_transaction(Transaction::build("1", "Alice", 45.0, Currency::HKD), &conn).unwrap();

        UploadReceiptState {
            db_connection: Arc::new(Mutex::new(conn)),
            upload_dir: upload_dir.path().join("uploads"),
        }
    }

    fn get_test_server(state: UploadReceiptState) -> TestServer {
        let app = Router::new()
            .route(endpoints::UPLOAD_RECEIPT, post(upload_receipt_endpoint))
            .with_state(state);

        TestServer::new(app).expect("Could not create test server.")
    }

    #[tokio::test]
    async fn saves_file_and_links_transaction() {
        let upload_dir = TempDir::new().unwrap();
        let state = get_test_state(&upload_dir);
        let server = get_test_server(state.clone());
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"not really a png".to_vec())
                .file_name("receipt.png")
                .mime_type("image/png"),
        );

        let response = server
            .post(&format_endpoint(endpoints::UPLOAD_RECEIPT, 1))
            .multipart(form)
            .await;

        response.assert_status_ok();
        let body = response.json::<UploadReceiptResponse>();
        assert!(body.filename.ends_with(".png"), "got {}", body.filename);
        assert_eq!(body.file_path, format!("uploads/{}", body.filename));

        let saved = std::fs::read(state.upload_dir.join(&body.filename)).unwrap();
        assert_eq!(saved, b"not really a png");

        let connection = state.db_connection.lock().unwrap();
        let transaction = get_transaction(1, &connection).unwrap();
        assert_eq!(transaction.receipt_image_path, Some(body.file_path));
    }

    #[tokio::test]
    async fn defaults_to_jpg_extension() {
        let upload_dir = TempDir::new().unwrap();
        let server = get_test_server(get_test_state(&upload_dir));
        let form = MultipartForm::new()
            .add_part("file", Part::bytes(b"jpeg".to_vec()).file_name("receipt"));

        let body = server
            .post(&format_endpoint(endpoints::UPLOAD_RECEIPT, 1))
            .multipart(form)
            .await
            .json::<UploadReceiptResponse>();

        assert!(body.filename.ends_with(".jpg"), "got {}", body.filename);
    }

    #[tokio::test]
    async fn missing_transaction_is_404() {
        let upload_dir = TempDir::new().unwrap();
        let server = get_test_server(get_test_state(&upload_dir));
        let form = MultipartForm::new()
            .add_part("file", Part::bytes(b"jpeg".to_vec()).file_name("a.jpg"));

        let response = server
            .post(&format_endpoint(endpoints::UPLOAD_RECEIPT, 99))
            .multipart(form)
            .expect_failure()
            .await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn form_without_file_is_400() {
        let upload_dir = TempDir::new().unwrap();
        let server = get_test_server(get_test_state(&upload_dir));
        let form = MultipartForm::new().add_text("note", "no image here");

        let response = server
            .post(&format_endpoint(endpoints::UPLOAD_RECEIPT, 1))
            .multipart(form)
            .expect_failure()
            .await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }
}
