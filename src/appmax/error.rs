use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppmaxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network failure or timeout before a response arrived.
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl AppmaxError {
    /// HTTP status reported by the gateway, if it answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AppmaxError::ApiError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_only_for_api_errors() {
        let api = AppmaxError::ApiError {
            status_code: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(api.status_code(), Some(502));
        assert_eq!(AppmaxError::HttpError("timeout".to_string()).status_code(), None);
    }
}
