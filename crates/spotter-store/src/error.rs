use rusqlite::ErrorCode;
use spotter_core::StoreError;

/// Map rusqlite failures onto the store boundary error.
pub trait SqlResultExt<T> {
    fn store_err(self) -> Result<T, StoreError>;
}

impl<T> SqlResultExt<T> for Result<T, rusqlite::Error> {
    fn store_err(self) -> Result<T, StoreError> {
        self.map_err(from_sqlite)
    }
}

pub fn from_sqlite(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::ConstraintViolation => StoreError::Conflict(e.to_string()),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        },
        _ => StoreError::Database(e.to_string()),
    }
}
