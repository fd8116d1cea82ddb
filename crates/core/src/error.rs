use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A change notification or object lacks a field the engine needs.
    #[error("malformed: missing {0}")]
    MissingField(&'static str),
    #[error("invalid resource kind: {0} (expect instance|template|tenant, v1/Kind or group/v1/Kind)")]
    InvalidKind(String),
}
