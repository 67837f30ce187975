use crate::domain::model::GatewayResponse;
use crate::utils::error::{LoadTestError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{multipart, Client, RequestBuilder};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// 對 gateway 發送請求的薄包裝；連線錯誤一律轉成 status 0 的回應
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration, headers: &HashMap<String, String>) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                LoadTestError::InvalidConfigValueError {
                    field: "target.headers".to_string(),
                    value: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                LoadTestError::InvalidConfigValueError {
                    field: format!("target.headers.{}", name),
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            default_headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .user_agent(concat!("gateway-loadtest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str, bearer: Option<&str>) -> GatewayResponse {
        let request = self.client.get(self.url(path));
        self.send(with_bearer(request, bearer)).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> GatewayResponse {
        let request = self.client.post(self.url(path)).json(body);
        self.send(with_bearer(request, bearer)).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: multipart::Form,
        bearer: Option<&str>,
    ) -> GatewayResponse {
        let request = self.client.post(self.url(path)).multipart(form);
        self.send(with_bearer(request, bearer)).await
    }

    async fn send(&self, request: RequestBuilder) -> GatewayResponse {
        let started = Instant::now();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(started.elapsed(), e),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => GatewayResponse {
                status,
                body,
                duration: started.elapsed(),
                error: None,
            },
            Err(e) => {
                tracing::debug!("Failed to read response body ({}): {}", status, e);
                GatewayResponse {
                    status,
                    body: String::new(),
                    duration: started.elapsed(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn with_bearer(request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

fn transport_failure(elapsed: Duration, error: reqwest::Error) -> GatewayResponse {
    tracing::debug!("Request failed before a response arrived: {}", error);
    GatewayResponse {
        status: 0,
        body: String::new(),
        duration: elapsed,
        error: Some(error.to_string()),
    }
}
