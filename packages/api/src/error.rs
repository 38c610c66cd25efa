//! Error type of the orchestration API.

use storage::MediaDir;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown {dir} file: {name}")]
    MissingMedia { dir: MediaDir, name: String },

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error(transparent)]
    Db(#[from] db::DbError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Actor(#[from] actors::ActorError),
}

impl ApiError {
    /// Whether the error was caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidRequest(_)
                | ApiError::MissingMedia { .. }
                | ApiError::InvalidJobId(_)
                | ApiError::Db(db::DbError::NotFound(_))
                | ApiError::Storage(
                    storage::StorageError::InvalidName(_)
                        | storage::StorageError::UnsupportedMediaType(_)
                        | storage::StorageError::UnknownDir(_)
                        | storage::StorageError::NotFound { .. }
                )
        )
    }
}
