use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch failed for filter `{filter}` (status {}): {message}", status_label(.status))]
    FetchFailed {
        filter: String,
        status: Option<u16>,
        message: String,
    },

    #[error("no specs found for `{0}`")]
    NotFound(String),
}

pub type ScanResult<T> = Result<T, ScanError>;

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}
