//! HTTP client for the Open Build Service API.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use std::sync::OnceLock;
use std::time::Duration;

use super::BuildService;
use crate::config::ObsConfig;
use crate::error::ObsError;

fn status_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<status\b[^>]*?\bcode\s*=\s*["']([^"']*)["']"#)
            .expect("status code pattern is valid")
    })
}

/// Extracts the `code` attribute of the root `<status>` element.
pub fn parse_status_code(xml: &str) -> Option<String> {
    status_code_re()
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// OBS API client using HTTP basic auth.
pub struct ObsClient {
    client: Client,
    config: ObsConfig,
}

impl ObsClient {
    pub fn new(config: ObsConfig) -> Result<Self, ObsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ObsError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn api(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    fn source_url(&self, package: &str, file_name: &str) -> String {
        format!(
            "{}/source/{}/{}/{}",
            self.api(),
            self.config.target_project,
            urlencoding::encode(package),
            urlencoding::encode(file_name)
        )
    }

    fn build_url(&self, package: &str, leaf: &str) -> String {
        format!(
            "{}/build/{}/{}/{}/{}/{}",
            self.api(),
            self.config.target_project,
            self.config.repository_name,
            self.config.architecture_name,
            urlencoding::encode(package),
            leaf
        )
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.config.user_name, Some(&self.config.password))
            .header("Accept", "application/xml")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ObsError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| ObsError::RequestFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ObsError::Status {
                code: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BuildService for ObsClient {
    async fn probe(&self) -> Result<(), ObsError> {
        let url = format!("{}/about", self.api());
        self.send(self.client.get(url)).await.map(|_| ())
    }

    async fn upload_file(&self, package: &str, file_name: &str, body: Vec<u8>) -> Result<(), ObsError> {
        let url = self.source_url(package, file_name);
        tracing::debug!(package = package, file = file_name, "Uploading source file");
        self.send(
            self.client
                .put(url)
                .header("Content-Type", "application/octet-stream")
                .body(body),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_status_code(&self, package: &str) -> Result<String, ObsError> {
        let url = self.build_url(package, "_status");
        let text = self
            .send(self.client.get(url))
            .await?
            .text()
            .await
            .map_err(|e| ObsError::RequestFailed(e.to_string()))?;
        parse_status_code(&text).ok_or(ObsError::MissingStatusCode)
    }

    async fn fetch_build_log(&self, package: &str) -> Result<Vec<u8>, ObsError> {
        let url = self.build_url(package, "_log");
        let bytes = self
            .send(self.client.get(url))
            .await?
            .bytes()
            .await
            .map_err(|e| ObsError::RequestFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
