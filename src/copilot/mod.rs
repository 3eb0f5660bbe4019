// GitHub Copilot authentication: OAuth device-code login and the exchange of
// the stored GitHub token for a short-lived Copilot API token.

pub mod store;

pub use store::TokenStore;

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::llm::error::{LlmError, Result};

const VENDOR: &str = "copilot";
const CLIENT_ID: &str = "Iv23liXYYLdDjdQbE0BB";
const GITHUB_URL: &str = "https://github.com";
const GITHUB_API_URL: &str = "https://api.github.com";
const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Extra delay GitHub asks for with a `slow_down` reply.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Answer to the device-code request; `user_code` is shown to the user.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTokenReply {
    token: String,
}

/// Client for GitHub's OAuth device flow and Copilot token endpoint.
pub struct CopilotAuth {
    client: reqwest::Client,
    github_url: String,
    api_url: String,
}

impl CopilotAuth {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoints(client, GITHUB_URL, GITHUB_API_URL)
    }

    pub fn with_endpoints(client: reqwest::Client, github_url: &str, api_url: &str) -> Self {
        Self {
            client,
            github_url: github_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start a device-code login.
    pub async fn request_device_code(&self, cancel: &CancellationToken) -> Result<DeviceCode> {
        let url = format!("{}/login/device/code", self.github_url);
        or_cancel(cancel, async {
            let response = self
                .client
                .post(&url)
                .header("accept", "application/json")
                .json(&json!({ "client_id": CLIENT_ID, "scope": "copilot" }))
                .send()
                .await
                .map_err(|e| LlmError::transport(VENDOR, e))?;
            let response = check_status(response).await?;
            response
                .json()
                .await
                .map_err(|e| LlmError::decode(VENDOR, e))
        })
        .await
    }

    /// Check once whether the user has authorized the device.
    ///
    /// `Ok(None)` means authorization is still pending.
    async fn verify(&self, device_code: &str) -> Result<PollOutcome> {
        let url = format!("{}/login/oauth/access_token", self.github_url);
        let response = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .json(&json!({
                "client_id": CLIENT_ID,
                "device_code": device_code,
                "grant_type": DEVICE_GRANT,
            }))
            .send()
            .await
            .map_err(|e| LlmError::transport(VENDOR, e))?;
        let response = check_status(response).await?;
        let reply: TokenReply = response
            .json()
            .await
            .map_err(|e| LlmError::decode(VENDOR, e))?;
        Ok(PollOutcome::from_reply(reply))
    }

    /// Poll until the user authorizes the device, waiting the vendor-supplied
    /// interval between attempts. Gives up with `Cancelled` when `cancel` fires.
    pub async fn poll_for_token(
        &self,
        cancel: &CancellationToken,
        device: &DeviceCode,
    ) -> Result<String> {
        let mut interval = Duration::from_secs(device.interval.max(1));
        or_cancel(cancel, async {
            loop {
                match self.verify(&device.device_code).await? {
                    PollOutcome::Token(token) => {
                        tracing::info!(len = token.len(), "received github token");
                        return Ok(token);
                    }
                    PollOutcome::Pending => tracing::debug!("authorization pending"),
                    PollOutcome::SlowDown => {
                        interval += SLOW_DOWN_STEP;
                        tracing::debug!(secs = interval.as_secs(), "asked to slow down");
                    }
                    PollOutcome::Failed(message) => return Err(LlmError::decode(VENDOR, message)),
                }
                tokio::time::sleep(interval).await;
            }
        })
        .await
    }

    /// Exchange a GitHub OAuth token for a Copilot API token.
    pub async fn fetch_api_token(
        &self,
        cancel: &CancellationToken,
        github_token: &str,
    ) -> Result<String> {
        let url = format!("{}/copilot_internal/v2/token", self.api_url);
        let mut req = self
            .client
            .get(&url)
            .header("authorization", format!("token {}", github_token))
            .header("accept", "application/json");
        for (name, value) in crate::llm::openai::COPILOT_EDITOR_HEADERS {
            req = req.header(*name, *value);
        }
        or_cancel(cancel, async {
            let response = req.send().await.map_err(|e| LlmError::transport(VENDOR, e))?;
            let response = check_status(response).await?;
            let reply: ApiTokenReply = response
                .json()
                .await
                .map_err(|e| LlmError::decode(VENDOR, e))?;
            Ok(reply.token)
        })
        .await
    }
}

async fn or_cancel<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        res = work => res,
    }
}

#[derive(Debug, PartialEq)]
enum PollOutcome {
    Token(String),
    Pending,
    SlowDown,
    Failed(String),
}

impl PollOutcome {
    fn from_reply(reply: TokenReply) -> Self {
        if let Some(token) = reply.access_token.filter(|t| !t.is_empty()) {
            return Self::Token(token);
        }
        match reply.error.as_deref() {
            Some("authorization_pending") => Self::Pending,
            Some("slow_down") => Self::SlowDown,
            Some(code) => Self::Failed(match reply.error_description {
                Some(desc) => format!("{}: {}", code, desc),
                None => code.to_string(),
            }),
            None => Self::Failed("no access token in response".to_string()),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(LlmError::Provider {
        vendor: VENDOR.to_string(),
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(token: Option<&str>, error: Option<&str>) -> TokenReply {
        TokenReply {
            access_token: token.map(String::from),
            error: error.map(String::from),
            error_description: None,
        }
    }

    #[test]
    fn test_poll_outcomes() {
        assert_eq!(
            PollOutcome::from_reply(reply(Some("gho_x"), None)),
            PollOutcome::Token("gho_x".into())
        );
        assert_eq!(
            PollOutcome::from_reply(reply(None, Some("authorization_pending"))),
            PollOutcome::Pending
        );
        assert_eq!(
            PollOutcome::from_reply(reply(None, Some("slow_down"))),
            PollOutcome::SlowDown
        );
        assert_eq!(
            PollOutcome::from_reply(reply(Some(""), Some("expired_token"))),
            PollOutcome::Failed("expired_token".into())
        );
        assert!(matches!(
            PollOutcome::from_reply(reply(None, None)),
            PollOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_device_code_default_interval() {
        let device: DeviceCode = serde_json::from_str(
            r#"{"device_code":"d","user_code":"ABCD-1234","verification_uri":"https://github.com/login/device"}"#,
        )
        .unwrap();
        assert_eq!(device.interval, 5);
        assert_eq!(device.user_code, "ABCD-1234");
    }
}
