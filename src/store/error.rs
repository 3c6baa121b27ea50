use thiserror::Error;

/// Errors from the local store.
///
/// The local database is assumed always available, so any of these indicates
/// a real problem (disk full, corruption) and propagates to the immediate
/// caller instead of being retried.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("local database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not create local store directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
