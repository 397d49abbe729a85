use crate::store::StoreError;

/// Failures of the relay endpoints. Every variant maps to one stable HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("message not found")]
    NotFound,
    /// Ownership violation. Carries no detail about the real owner.
    #[error("forbidden")]
    Forbidden,
    /// The placeholder was already resolved. A retrying worker treats this as success.
    #[error("message already replied")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Unauthorized => 401,
            RelayError::BadRequest(_) => 400,
            RelayError::NotFound => 404,
            RelayError::Forbidden => 403,
            RelayError::Conflict => 409,
            RelayError::Store(_) | RelayError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(RelayError::Unauthorized.status_code(), 401);
        assert_eq!(RelayError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(RelayError::NotFound.status_code(), 404);
        assert_eq!(RelayError::Forbidden.status_code(), 403);
        assert_eq!(RelayError::Conflict.status_code(), 409);
        assert_eq!(
            RelayError::Store(StoreError::Backend("down".into())).status_code(),
            500
        );
    }
}
