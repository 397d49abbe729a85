use crate::gateway::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("relay request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("relay api error {status}: {message}")]
    Api { status: u16, message: String },
}

impl ClientError {
    /// HTTP status for API errors; None for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// Pass through a 2xx response, otherwise turn the `{ error }` body into `ClientError::Api`.
pub(crate) async fn check(res: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
