use labsync_api::ApiError;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: String },
    #[error("session failed: {0}")]
    Failed(String),
    #[error("config: {0}")]
    Config(String),
}
