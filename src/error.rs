/*!
Error kinds surfaced by sync and analytics operations
*/
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Referenced user (or resource) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied unusable input
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Provider rejected the stored credential
    #[error("upstream rejected credentials: {0}")]
    UpstreamAuth(String),

    /// Any other provider-side failure (rate limits, 5xx, transport)
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A fetched record did not have the expected shape
    #[error("malformed upstream data: {0}")]
    MalformedUpstreamData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used at the service boundary
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::BadRequest(_) => 400,
            Error::UpstreamAuth(_) => 401,
            Error::Upstream(_) => 503,
            Error::MalformedUpstreamData(_) => 502,
            Error::Database(_) | Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code so callers can tell
    /// "re-authenticate" from "retry later" from "bad input"
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::BadRequest(_) => "bad_request",
            Error::UpstreamAuth(_) => "upstream_auth",
            Error::Upstream(_) => "upstream",
            Error::MalformedUpstreamData(_) => "malformed_upstream_data",
            Error::Database(_) | Error::Internal(_) => "internal",
        }
    }

    pub fn malformed(what: &str, value: &serde_json::Value) -> Self {
        Error::MalformedUpstreamData(format!("{}: unexpected shape {}", what, value))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
