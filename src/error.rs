use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Stack Exchange API error: {0}")]
    StackApi(String),

    #[error("Telegram API error: {0}")]
    TelegramApi(String),

    #[error("recipient {0} is unreachable")]
    RecipientUnreachable(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Store errors are retried on the next cycle rather than killing the
    /// scheduler; the store is embedded, so there is no connection to re-dial.
    pub fn is_recoverable_store(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Sqlite(_))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
