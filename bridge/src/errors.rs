use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid authentication: {0}")]
    InvalidAuth(String),

    #[error("Cannot connect: {0}")]
    CannotConnect(String),

    #[error("Rate limited by Minut API")]
    RateLimited,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// User-facing failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidAuth,
    CannotConnect,
    RateLimited,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAuth => "invalid_auth",
            ErrorKind::CannotConnect => "cannot_connect",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAuth(_) => ErrorKind::InvalidAuth,
            Error::CannotConnect(_) | Error::UnexpectedResponse(_) => ErrorKind::CannotConnect,
            Error::RateLimited => ErrorKind::RateLimited,
            Error::Config(_)
            | Error::Mqtt(_)
            | Error::Json(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

impl Error {
    /// Maps a failed HTTP status from the Minut API
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        use reqwest::StatusCode;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::InvalidAuth(format!("{} returned HTTP {}", context, status.as_u16()))
            }
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited,
            s if s.is_server_error() => {
                Error::CannotConnect(format!("{} returned HTTP {}", context, s.as_u16()))
            }
            s => Error::UnexpectedResponse(format!("{} returned HTTP {}", context, s.as_u16())),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::UnexpectedResponse(err.to_string())
        } else {
            Error::CannotConnect(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
