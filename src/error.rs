//! Error type shared by the backend store and the entry services.
//! CLI, capture and OCR code works in `anyhow` and converts on the way up.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuildError>;

#[derive(Debug, Error)]
pub enum GuildError {
    /// Input rejected before anything was written.
    #[error("{0}")]
    Validation(String),

    /// The write would duplicate an existing row (member name, event date).
    #[error("{0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Non-2xx answer from the backend or the webhook.
    #[error("backend error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

impl GuildError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GuildError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        GuildError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GuildError::NotFound(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, GuildError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_passed_through() {
        let err = GuildError::validation("Name is required");
        assert_eq!(err.to_string(), "Name is required");

        let err = GuildError::Backend { status: 409, message: "duplicate key".into() };
        assert_eq!(err.to_string(), "backend error 409: duplicate key");
    }

    #[test]
    fn test_conflict_detection() {
        assert!(GuildError::conflict("taken").is_conflict());
        assert!(!GuildError::not_found("member 7").is_conflict());
    }
}
