use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefineError {
    #[error("validation failed: {0}")] Validation(String),
    #[error("missing data: {0}")] MissingData(String),
    #[error("upstream error: {0}")] Upstream(String),
    #[error("rejected: {0}")] Rejected(String),
    #[error("another request is still in flight")] Busy,
    #[error("config error: {0}")] Config(String),
}

impl From<reqwest::Error> for RefineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RefineError::Upstream(format!("request timed out: {e}"))
        } else {
            RefineError::Upstream(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RefineError {
    fn from(e: serde_json::Error) -> Self {
        RefineError::Upstream(format!("malformed response body: {e}"))
    }
}

impl RefineError {
    /// Short headline used by the terminal notifications.
    pub fn headline(&self) -> &'static str {
        match self {
            RefineError::Validation(_) => "Prompt is not ready to submit",
            RefineError::MissingData(_) => "Nothing to work on",
            RefineError::Upstream(_) => "Request failed. Try again",
            RefineError::Rejected(_) => "Action not allowed right now",
            RefineError::Busy => "Please wait for the current request",
            RefineError::Config(_) => "Configuration problem",
        }
    }
}

pub type Result<T> = std::result::Result<T, RefineError>;
