use thiserror::Error;

use crate::providers::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::User => 2,
            ErrorKind::Runtime => 1,
        }
    }
}

/// Failure of one fetch-and-parse cycle. Every variant is caught at the
/// registry boundary and stored in the location's error slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<ProviderError> for FeedError {
    fn from(value: ProviderError) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<FeedError> for AppError {
    fn from(value: FeedError) -> Self {
        match value {
            FeedError::Configuration(_) => Self::user(value.to_string()),
            _ => Self::runtime(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_map_to_user_exit_code() {
        let error: AppError = FeedError::Configuration("missing key".to_string()).into();
        assert_eq!(error.kind, ErrorKind::User);
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn transport_errors_keep_provider_message() {
        let error: FeedError = ProviderError::Http {
            status: 503,
            message: "owm: unavailable".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "transport error: http error (503): owm: unavailable"
        );

        let app: AppError = error.into();
        assert_eq!(app.exit_code(), 1);
    }
}
