use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::CloudConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "loginId")]
    pub login_id: String,
}

/// The identity provider as consumed by this client: who is signed in, and a
/// way to sign out. The sign-in flow itself lives with the provider.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn current_session(&self) -> Result<UserSession, AppError>;
    async fn sign_out(&self) -> Result<(), AppError>;
}

pub struct HttpAuthClient {
    client: Client,
    config: CloudConfig,
}

impl HttpAuthClient {
    pub fn new(config: CloudConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn current_session(&self) -> Result<UserSession, AppError> {
        let response = self
            .client
            .get(format!("{}/session", self.config.api_base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Fetching session failed {}: {}",
                status, body
            )));
        }

        response
            .json::<UserSession>()
            .await
            .map_err(|e| AppError::Auth(format!("Failed to parse session: {}", e)))
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        let response = self
            .client
            .post(format!("{}/session/sign-out", self.config.api_base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Sign-out failed {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Fixed identity for tests and offline mode.
pub struct StaticAuthClient {
    session: UserSession,
}

impl StaticAuthClient {
    pub fn new(user_id: impl Into<String>, login_id: impl Into<String>) -> Self {
        Self {
            session: UserSession {
                user_id: user_id.into(),
                login_id: login_id.into(),
            },
        }
    }
}

#[async_trait]
impl AuthClient for StaticAuthClient {
    async fn current_session(&self) -> Result<UserSession, AppError> {
        Ok(self.session.clone())
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        Ok(())
    }
}
