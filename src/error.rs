use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database error: {0}")]
    Postgres(#[from] postgres::Error),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    /// Serializable-transaction retry budget exhausted on a bulk replace.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An identity-provider or content-store call failed. Carries the
    /// upstream status when one was received.
    #[error("upstream failure: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn upstream(message: impl Into<String>) -> Self {
        Error::Upstream {
            status: None,
            message: message.into(),
        }
    }

    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Error::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
