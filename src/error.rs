/// Failure while calling the catalog procedure.
///
/// The orchestrator turns every variant into a failed sync; nothing here is
/// retried.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("catalog procedure call failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed catalog procedure response: {0}")]
    Malformed(String),

    #[error("limit {0} does not fit the procedure's integer argument")]
    LimitOutOfRange(u32),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Failure while pushing a catalog payload to the partner endpoint.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    /// Anything other than exactly 200, including 201.
    #[error("partner endpoint answered with status {0}")]
    Status(u16),

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}
