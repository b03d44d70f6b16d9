pub mod diagnostics;
pub mod error;
pub mod refund;
pub mod types;
pub mod webhook;

use error::AppmaxError;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

pub const PRODUCTION_BASE_URL: &str = "https://admin.appmax.com.br/api/v3";
pub const SANDBOX_BASE_URL: &str = "https://homolog.sandboxappmax.com.br/api/v3";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Gateway settings. Both secrets are optional: a missing access token
/// disables outbound calls, a missing webhook secret puts ingestion in
/// permissive mode.
#[derive(Clone, Default)]
pub struct AppmaxConfig {
    pub access_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub sandbox: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AppmaxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppmaxConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("sandbox", &self.sandbox)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppmaxConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppmaxError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppmaxError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sandbox = match get("APPMAX_SANDBOX") {
            Some(v) => v.trim().parse::<bool>().map_err(|_| {
                AppmaxError::ConfigError(format!("APPMAX_SANDBOX must be true or false, got {v}"))
            })?,
            None => false,
        };

        let base_url = get("APPMAX_BASE_URL")
            .unwrap_or_else(|| {
                if sandbox {
                    SANDBOX_BASE_URL.to_string()
                } else {
                    PRODUCTION_BASE_URL.to_string()
                }
            })
            .trim_end_matches('/')
            .to_string();

        let timeout_secs = match get("APPMAX_TIMEOUT_SECS") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                AppmaxError::ConfigError(format!("APPMAX_TIMEOUT_SECS must be an integer, got {v}"))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let webhook_tolerance_secs = match get("APPMAX_WEBHOOK_TOLERANCE_SECS") {
            Some(v) => v.trim().parse::<i64>().map_err(|_| {
                AppmaxError::ConfigError(format!(
                    "APPMAX_WEBHOOK_TOLERANCE_SECS must be an integer, got {v}"
                ))
            })?,
            None => DEFAULT_WEBHOOK_TOLERANCE_SECS,
        };

        Ok(AppmaxConfig {
            access_token: get("APPMAX_ACCESS_TOKEN"),
            webhook_secret: get("APPMAX_WEBHOOK_SECRET"),
            webhook_tolerance_secs,
            sandbox,
            base_url,
            timeout_secs,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Appmax v3 API client
#[derive(Clone)]
pub struct AppmaxClient {
    config: Arc<AppmaxConfig>,
    access_token: String,
    http_client: Client,
}

impl AppmaxClient {
    /// Fails with `ConfigError` when no access token is configured.
    pub fn new(config: AppmaxConfig) -> Result<Self, AppmaxError> {
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| AppmaxError::ConfigError("Missing APPMAX_ACCESS_TOKEN".to_string()))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AppmaxError::HttpError(e.to_string()))?;

        Ok(AppmaxClient {
            config: Arc::new(config),
            access_token,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self, AppmaxError> {
        Self::new(AppmaxConfig::from_env()?)
    }

    /// Make a POST request to the Appmax API
    pub(crate) async fn post<T: serde::de::DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AppmaxError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .header("access-token", &self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppmaxError::HttpError(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Non-2xx responses and 2xx bodies carrying `"success": false` both
    /// become `ApiError` with the body text attached.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppmaxError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        if !status.is_success() {
            return Err(AppmaxError::ApiError {
                status_code: status.as_u16(),
                message: body,
            });
        }

        let value: JsonValue = if body.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&body).map_err(|e| AppmaxError::ParseError(e.to_string()))?
        };

        if value.get("success").and_then(JsonValue::as_bool) == Some(false) {
            return Err(AppmaxError::ApiError {
                status_code: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_value(value).map_err(|e| AppmaxError::ParseError(e.to_string()))
    }

    pub fn config(&self) -> &AppmaxConfig {
        &self.config
    }
}
