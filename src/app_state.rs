//! Implements a struct that holds the state of the REST server.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use rusqlite::Connection;

use crate::{Error, db::initialize, timezone::find_timezone};

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,

    /// The directory uploaded receipt images are stored in.
    pub upload_dir: PathBuf,

    /// The local timezone as a canonical timezone name, e.g. "Asia/Shanghai".
    pub local_timezone: String,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    /// `local_timezone` should be a valid, canonical timezone name, e.g. "Asia/Shanghai".
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized or the timezone is unknown.
    pub fn new(
        db_connection: Arc<Mutex<Connection>>,
        upload_dir: impl Into<PathBuf>,
        local_timezone: &str,
    ) -> Result<Self, Error> {
        find_timezone(local_timezone)?;

        {
            let connection = db_connection
                .lock()
                .map_err(|_| Error::DatabaseLockError)?;
            initialize(&connection)?;
        }

        Ok(Self {
            db_connection,
            upload_dir: upload_dir.into(),
            local_timezone: local_timezone.to_owned(),
        })
    }
}
