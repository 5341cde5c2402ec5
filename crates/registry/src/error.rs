use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("player not found: {account_id}")]
    PlayerNotFound { account_id: String },

    #[error("player {account_id} violates record invariant: {message}")]
    Invariant { account_id: String, message: String },
}

impl Error {
    #[must_use]
    pub fn player_not_found(account_id: impl Into<String>) -> Self {
        Self::PlayerNotFound {
            account_id: account_id.into(),
        }
    }

    #[must_use]
    pub fn invariant(account_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invariant {
            account_id: account_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
