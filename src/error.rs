use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unsafe archive entry: {0}")]
    UnsafeArchiveEntry(String),

    #[error("Dangling foreign key: {0}")]
    DanglingForeignKey(String),

    #[error("Unique conflict: {0}")]
    UniqueConflict(String),

    #[error("Another restore is already in progress, please try again later")]
    RestoreInProgress,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure category reported across the action boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CorruptPayload,
    SchemaMismatch,
    UnsafeArchiveEntry,
    DanglingForeignKey,
    UniqueConflict,
    RestoreInProgress,
    StoreUnavailable,
    Unauthenticated,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CorruptPayload => "CORRUPT_PAYLOAD",
            ErrorKind::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorKind::UnsafeArchiveEntry => "UNSAFE_ARCHIVE_ENTRY",
            ErrorKind::DanglingForeignKey => "DANGLING_FOREIGN_KEY",
            ErrorKind::UniqueConflict => "UNIQUE_CONFLICT",
            ErrorKind::RestoreInProgress => "RESTORE_IN_PROGRESS",
            ErrorKind::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::CorruptPayload(_) => ErrorKind::CorruptPayload,
            AppError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            AppError::UnsafeArchiveEntry(_) => ErrorKind::UnsafeArchiveEntry,
            AppError::DanglingForeignKey(_) => ErrorKind::DanglingForeignKey,
            AppError::UniqueConflict(_) => ErrorKind::UniqueConflict,
            AppError::RestoreInProgress => ErrorKind::RestoreInProgress,
            AppError::StoreUnavailable(_) | AppError::Database(_) | AppError::Storage(_) => {
                ErrorKind::StoreUnavailable
            }
            AppError::Unauthenticated => ErrorKind::Unauthenticated,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::CorruptPayload(_)
            | AppError::SchemaMismatch(_)
            | AppError::UnsafeArchiveEntry(_) => Status::invalid_argument(err.to_string()),
            AppError::DanglingForeignKey(_) | AppError::UniqueConflict(_) => {
                Status::failed_precondition(err.to_string())
            }
            AppError::RestoreInProgress => Status::unavailable(err.to_string()),
            AppError::StoreUnavailable(msg) => Status::unavailable(msg),
            AppError::Database(e) => Status::internal(format!("Database error: {}", e)),
            AppError::Storage(msg) => Status::internal(format!("Storage error: {}", msg)),
            AppError::Unauthenticated => Status::unauthenticated("Authentication required"),
            AppError::Internal(msg) => Status::internal(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failures_share_one_kind() {
        assert_eq!(
            AppError::Storage("disk full".into()).kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(ErrorKind::StoreUnavailable.as_str(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_status_mapping() {
        let status: Status = AppError::Unauthenticated.into();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        let status: Status = AppError::RestoreInProgress.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
