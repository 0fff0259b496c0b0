use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extraction request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extraction service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("extraction response was malformed: {0}")]
    Malformed(String),

    #[error("extraction did not finish within {0:?}")]
    TimedOut(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("roster query failed: {0}")]
    Database(#[from] sqlx::Error),
}
