//! Credential and offer/answer exchanges with the realtime API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::credential::{SessionCredential, SessionParams};
use crate::config::RealtimeConfig;

/// Trades the long-lived API key for a short-lived session credential.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, params: &SessionParams) -> Result<SessionCredential>;
}

/// Submits a local offer document and returns the remote answer.
#[async_trait]
pub trait SignalingExchange: Send + Sync {
    async fn exchange(&self, offer_sdp: &str, credential: &SessionCredential) -> Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("session response carried an empty client secret")]
    EmptyCredential,
}

impl ApiError {
    /// Whether this error anywhere in `err`'s chain is an HTTP 401.
    pub fn is_unauthorized(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<ApiError>(),
                Some(ApiError::Status { status: 401, .. })
            )
        })
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

fn parse_session_response(body: &str) -> Result<SessionCredential> {
    let response: SessionResponse =
        serde_json::from_str(body).context("Failed to parse session response")?;
    if response.client_secret.value.is_empty() {
        return Err(ApiError::EmptyCredential.into());
    }
    let expires_at = response
        .client_secret
        .expires_at
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    Ok(SessionCredential::new(response.client_secret.value, expires_at))
}

/// HTTP client for the OpenAI Realtime session and WebRTC endpoints.
pub struct RealtimeApiClient {
    http: reqwest::Client,
    api_key: String,
    base: Url,
    model: String,
}

impl RealtimeApiClient {
    pub fn new(config: &RealtimeConfig) -> Result<Self> {
        let mut base = Url::parse(&config.api_base)
            .with_context(|| format!("Invalid API base URL {:?}", config.api_base))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base,
            model: config.model.clone(),
        })
    }

    fn sessions_url(&self) -> Result<Url> {
        self.base
            .join("v1/realtime/sessions")
            .context("Failed to build sessions URL")
    }

    fn signaling_url(&self) -> Result<Url> {
        let mut url = self
            .base
            .join("v1/realtime")
            .context("Failed to build signaling URL")?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }
}

#[async_trait]
impl TokenExchange for RealtimeApiClient {
    async fn exchange(&self, params: &SessionParams) -> Result<SessionCredential> {
        let response = self
            .http
            .post(self.sessions_url()?)
            .bearer_auth(&self.api_key)
            .json(params)
            .send()
            .await
            .context("Failed to send session request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read session response")?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let credential = parse_session_response(&body)?;
        info!(
            "Acquired session credential (expires {:?})",
            credential.expires_at()
        );
        Ok(credential)
    }
}

#[async_trait]
impl SignalingExchange for RealtimeApiClient {
    async fn exchange(&self, offer_sdp: &str, credential: &SessionCredential) -> Result<String> {
        let url = self.signaling_url()?;
        debug!("Posting offer to {}", url);

        let response = self
            .http
            .post(url)
            .bearer_auth(credential.value())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_owned())
            .send()
            .await
            .context("Failed to send offer")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read answer")?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RealtimeApiClient {
        let config = RealtimeConfig {
            api_key: "sk-test".into(),
            api_base: base.into(),
            model: "gpt-4o-realtime-preview-2024-12-17".into(),
            ..RealtimeConfig::default()
        };
        RealtimeApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client("https://api.openai.com");
        assert_eq!(
            client.sessions_url().unwrap().as_str(),
            "https://api.openai.com/v1/realtime/sessions"
        );
        assert_eq!(
            client.signaling_url().unwrap().as_str(),
            "https://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
        );
    }

    #[test]
    fn test_urls_keep_base_path() {
        let client = client("http://localhost:8080/proxy");
        assert_eq!(
            client.sessions_url().unwrap().as_str(),
            "http://localhost:8080/proxy/v1/realtime/sessions"
        );
    }

    #[test]
    fn test_parse_session_response() {
        let credential = parse_session_response(
            r#"{"id":"sess_1","client_secret":{"value":"ek_abc","expires_at":1735689600}}"#,
        )
        .unwrap();
        assert_eq!(credential.value(), "ek_abc");
        assert_eq!(credential.expires_at().unwrap().timestamp(), 1_735_689_600);
    }

    #[test]
    fn test_parse_rejects_empty_secret() {
        let err = parse_session_response(r#"{"client_secret":{"value":""}}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::EmptyCredential)
        ));
        assert!(parse_session_response("not json").is_err());
    }

    #[test]
    fn test_unauthorized_detection() {
        let err: anyhow::Error = ApiError::Status {
            status: 401,
            body: "expired".into(),
        }
        .into();
        let wrapped = err.context("Failed to exchange offer");
        assert!(ApiError::is_unauthorized(&wrapped));

        let other: anyhow::Error = ApiError::Status {
            status: 500,
            body: String::new(),
        }
        .into();
        assert!(!ApiError::is_unauthorized(&other));
    }
}
