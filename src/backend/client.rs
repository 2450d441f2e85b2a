//! HTTP client for the canarytokens backend.
//!
//! Generic token endpoints live under `/api`; the awsinfra endpoints under the
//! configured route prefix. No automatic retries: every failure is reported
//! to the caller, which decides whether to try again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use super::{ApiReply, AwsInfraApi, AwsInfraEndpoint};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::canarydrop::{
    DownloadFormat, ManageResponse, Setting, SettingsRequest, TokenHistory,
};
use crate::models::token::{GenerateResponse, TokenRequest};

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    api_route: String,
}

impl BackendClient {
    pub fn new(cfg: &Config) -> Result<Self, AppError> {
        Self::with_timeout(&cfg.backend_url, &cfg.api_route, cfg.http_timeout())
    }

    pub fn with_timeout(
        base_url: &str,
        api_route: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("canary-console/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_route: api_route.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn awsinfra_url(&self, endpoint: AwsInfraEndpoint) -> String {
        format!("{}{}{}", self.base_url, self.api_route, endpoint.path())
    }

    /// `POST /api/generate`.
    pub async fn generate(&self, req: &TokenRequest) -> Result<GenerateResponse, AppError> {
        req.validate()?;
        let resp = self.http.post(self.url("/api/generate")).json(req).send().await?;
        let created: GenerateResponse = decode_ok(read_reply(resp).await?)?;
        tracing::info!(
            token = %created.token,
            token_type = %req.kind.as_str(),
            "canarytoken created"
        );
        Ok(created)
    }

    /// `GET /api/manage`.
    pub async fn manage(&self, token: &str, auth: &str) -> Result<ManageResponse, AppError> {
        let resp = self
            .http
            .get(self.url("/api/manage"))
            .query(&[("token", token), ("auth", auth)])
            .send()
            .await?;
        decode_ok(read_reply(resp).await?)
    }

    /// `GET /api/history`.
    pub async fn history(&self, token: &str, auth: &str) -> Result<TokenHistory, AppError> {
        let resp = self
            .http
            .get(self.url("/api/history"))
            .query(&[("token", token), ("auth", auth)])
            .send()
            .await?;
        decode_ok(read_reply(resp).await?)
    }

    /// `POST /api/settings`.
    pub async fn update_setting(
        &self,
        token: &str,
        auth: &str,
        setting: Setting,
        enabled: bool,
    ) -> Result<(), AppError> {
        let body = SettingsRequest::new(token, auth, setting, enabled);
        let resp = self.http.post(self.url("/api/settings")).json(&body).send().await?;
        let reply = read_reply(resp).await?;
        if let Some(Value::String(msg)) = reply.data.get("message") {
            if msg == "failure" {
                return Err(AppError::Backend {
                    status: reply.status,
                    message: format!("could not update {}", setting.as_str()),
                });
            }
        }
        reply.into_ok()?;
        tracing::debug!(setting = setting.as_str(), enabled, "token setting updated");
        Ok(())
    }

    /// `GET /api/download`, streamed into `dir`. Returns the written path.
    ///
    /// The file name comes from `content-disposition` when the backend sends one.
    pub async fn download_to(
        &self,
        token: &str,
        auth: &str,
        fmt: DownloadFormat,
        dir: &Path,
    ) -> Result<PathBuf, AppError> {
        let resp = self
            .http
            .get(self.url("/api/download"))
            .query(&[("fmt", fmt.as_str()), ("token", token), ("auth", auth)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let reply = read_reply(resp).await?;
            return Err(AppError::from_body(reply.status, &reply.data));
        }

        let filename = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| format!("{}.{}", token, fmt.as_str()));
        let path = dir.join(filename);

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("create {}: {}", path.display(), e)))?;
        let mut written = 0usize;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("write {}: {}", path.display(), e)))?;
        }
        file.flush()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("flush {}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), bytes = written, fmt = fmt.as_str(), "download saved");
        Ok(path)
    }
}

#[async_trait]
impl AwsInfraApi for BackendClient {
    async fn post(&self, endpoint: AwsInfraEndpoint, body: Value) -> Result<ApiReply, AppError> {
        let url = self.awsinfra_url(endpoint);
        let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
            tracing::warn!(endpoint = endpoint.path(), error = %e, "awsinfra request failed");
            AppError::Transport(e)
        })?;
        let reply = read_reply(resp).await?;
        tracing::debug!(endpoint = endpoint.path(), status = reply.status, "awsinfra reply");
        Ok(reply)
    }
}

async fn read_reply(resp: Response) -> Result<ApiReply, AppError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    let data = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(ApiReply::new(status, data))
}

fn decode_ok<T: DeserializeOwned>(reply: ApiReply) -> Result<T, AppError> {
    let data = reply.into_ok()?;
    serde_json::from_value(data).map_err(|e| AppError::InvalidResponse(e.to_string()))
}

/// `attachment; filename="creds.txt"` → `creds.txt`. Path separators are rejected.
fn disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != "..")
}
