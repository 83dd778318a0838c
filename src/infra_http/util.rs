use crate::domain_port::ProviderError;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;

/// Shared connection details for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

impl BackendConfig {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    pub fn authorize(&self, request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
    }
}

/// First non-empty human-readable message in a backend error body.
pub fn error_message(body: &Value) -> Option<String> {
    ["error_description", "msg", "message", "error"]
        .iter()
        .filter_map(|field| body.get(*field).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub async fn provider_error(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });
    ProviderError::new(message).with_status(status.as_u16())
}

pub fn transport_error(error: reqwest::Error) -> ProviderError {
    ProviderError::new(format!("network error: {error}"))
}
