//! REST collaborators: persisted history and the partner directory.
//!
//! Every response is wrapped in `{ success, data, message }`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::CredentialSource;
use crate::error::ApiError;
use crate::message::{Message, Partner, UserId};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: String,
}

pub struct ChatApi<C> {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<C>,
}

impl<C: CredentialSource> ChatApi<C> {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<C>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Persisted conversation with `partner`, oldest first.
    pub async fn history(&self, partner: &UserId) -> Result<Vec<Message>, ApiError> {
        self.get(&format!("/api/v1/chat/history/{partner}")).await
    }

    /// Users the local identity has exchanged messages with, excluding
    /// `local` itself.
    pub async fn chat_partners(&self, local: &UserId) -> Result<Vec<Partner>, ApiError> {
        let partners: Vec<Partner> = self.get("/api/v1/users/chat-partners").await?;
        Ok(exclude_self(partners, local))
    }

    /// Every user available for chat, excluding `local` itself.
    pub async fn all_users(&self, local: &UserId) -> Result<Vec<Partner>, ApiError> {
        let partners: Vec<Partner> = self.get("/api/v1/users").await?;
        Ok(exclude_self(partners, local))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let credential = self.credentials.fetch().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.bearer())
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ApiError::NotAuthenticated);
            }
            status if !status.is_success() => return Err(ApiError::Status(status.as_u16())),
            _ => {}
        }

        let body: ApiResponse<T> = response.json().await?;
        match body {
            ApiResponse {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            ApiResponse { message, .. } => Err(ApiError::Rejected(if message.is_empty() {
                "request unsuccessful".to_string()
            } else {
                message
            })),
        }
    }
}

fn exclude_self(partners: Vec<Partner>, local: &UserId) -> Vec<Partner> {
    partners.into_iter().filter(|p| &p.id != local).collect()
}
