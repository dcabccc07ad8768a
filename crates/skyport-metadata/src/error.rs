use skyport_types::StoreError;

/// Maps a raw sqlx error onto the store's closed vocabulary. `RowNotFound`
/// is the only variant we expect callers to treat as a normal outcome
/// rather than an infrastructure failure.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("no matching row".to_string()),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::AlreadyExists(db_err.message().to_string())
        }
        other => StoreError::ConnectionFailed(other.to_string()),
    }
}
