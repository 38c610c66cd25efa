//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Global database instance using lazy initialization.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "ws://host:port" or "rocksdb://path"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "faceswap".to_string(),
            database: "jobs".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for a shared SurrealDB server.
    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `DB_ENDPOINT` (default: `mem://`)
    /// - `DB_NAMESPACE` (default: `faceswap`)
    /// - `DB_DATABASE` (default: `jobs`)
    /// - `DB_USER` / `DB_PASS` (optional, both required to sign in)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let credentials = match (var("DB_USER"), var("DB_PASS")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        };

        Self {
            endpoint: var("DB_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: var("DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: var("DB_DATABASE").unwrap_or(defaults.database),
            credentials,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Lifecycle(#[from] queue_core::LifecycleError),
}

impl DbError {
    /// Whether the error is a write conflict between concurrent
    /// transactions, which the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Connection(surrealdb::Error::Db(surrealdb::error::Db::TxRetryable)) => true,
            // Remote engines only forward the message text: "Failed to commit
            // transaction due to a read or write conflict. This transaction can be retried"
            DbError::Connection(surrealdb::Error::Api(surrealdb::error::Api::Query(message))) => {
                message.contains("This transaction can be retried")
            }
            _ => false,
        }
    }
}

/// Initialize the database connection.
///
/// This should be called once at application startup before any database operations.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        // Select namespace and database
        db.use_ns(&config.namespace).use_db(&config.database).await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}

/// Try to get the database connection.
///
/// Returns None if the database hasn't been initialized yet.
pub fn try_get_db() -> Option<&'static Database> {
    DB.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let conflict = DbError::Connection(surrealdb::Error::Db(surrealdb::error::Db::TxRetryable));
        assert!(conflict.is_retryable());

        let remote = DbError::Connection(surrealdb::Error::Api(surrealdb::error::Api::Query(
            "Failed to commit transaction due to a read or write conflict. \
             This transaction can be retried"
                .to_string(),
        )));
        assert!(remote.is_retryable());

        let other = DbError::Connection(surrealdb::Error::Api(surrealdb::error::Api::Query(
            "Parse error".to_string(),
        )));
        assert!(!other.is_retryable());
        assert!(!DbError::NotFound("job:1".to_string()).is_retryable());
        assert!(!DbError::NotInitialized.is_retryable());
    }
}
