use crate::backend::types::{
    ChatRequest, ChatResponse, ConversationsResponse, CurrentGroupResponse,
    DeleteConversationRequest, DeleteConversationResponse, ErrorBody, FilterDataRequest,
    FilterDataResponse, HashRequest, HashResponse, HistoryRequest, HistoryResponse, LoginRequest,
    LoginResponse, NewConversationResponse, ProtectedResponse, UserRequest,
};
use crate::chat::ConversationThread;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::warn;

/// Outcome of a credential check. A rejection is an application-level reply
/// (wrong password), not a transport failure.
#[derive(Debug)]
pub enum LoginOutcome {
    Granted { access_token: String },
    Denied { message: String },
}

/// HTTP client for the traceability backend. All logic behind these routes
/// (auth verification, data joins, LLM orchestration, conversation storage)
/// is external and opaque; this client only moves typed payloads.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Inference calls can take a while; the connect timeout stays short
        // so an unreachable backend fails fast.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(130))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build backend HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let resp = self
            .http
            .post(self.url("/login"))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("Failed to reach backend /login")?;

        if resp.status().is_success() {
            let body: LoginResponse = resp.json().await.context("Invalid /login response")?;
            Ok(LoginOutcome::Granted {
                access_token: body.access_token,
            })
        } else {
            let status = resp.status();
            let body: ErrorBody = resp.json().await.unwrap_or_default();
            let message = body
                .text()
                .unwrap_or("Login rejected by the backend")
                .to_string();
            warn!("Login denied ({}): {}", status, message);
            Ok(LoginOutcome::Denied { message })
        }
    }

    /// Validates a token and resolves the identity behind it.
    pub async fn protected(&self, token: &str) -> Result<ProtectedResponse> {
        let resp = self
            .http
            .get(self.url("/protected"))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to reach backend /protected")?;

        if !resp.status().is_success() {
            anyhow::bail!("Token validation failed with status {}", resp.status());
        }

        resp.json().await.context("Invalid /protected response")
    }

    /// Resolves a ticket/barcode to its latest content hash. `None` means
    /// the backend knows no hash for this ticket.
    pub async fn get_hash(&self, tickbarr: &str) -> Result<Option<String>> {
        let resp = self
            .http
            .post(self.url("/get_hash"))
            .json(&HashRequest {
                tickbarr: tickbarr.to_string(),
            })
            .send()
            .await
            .context("Failed to reach backend /get_hash")?;

        if resp.status().is_success() {
            let body: HashResponse = resp.json().await.context("Invalid /get_hash response")?;
            Ok(Some(body.hash))
        } else {
            let status = resp.status();
            let body: ErrorBody = resp.json().await.unwrap_or_default();
            warn!(
                "No hash for tickbarr ({}): {}",
                status,
                body.text().unwrap_or("no detail")
            );
            Ok(None)
        }
    }

    /// Advanced search over the hash table. The body is parsed whatever the
    /// status; the backend reports problems inside it.
    pub async fn filter_data(&self, request: &FilterDataRequest) -> Result<FilterDataResponse> {
        let resp = self
            .http
            .post(self.url("/filter_data"))
            .json(request)
            .send()
            .await
            .context("Failed to reach backend /filter_data")?;

        resp.json().await.context("Invalid /filter_data response")
    }

    /// One inference round-trip. Application errors travel inside the body
    /// (possibly with a non-2xx status); only an unreachable backend or an
    /// unparseable body is an Err.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let resp = self
            .http
            .post(self.url("/chat"))
            .json(request)
            .send()
            .await
            .context("Failed to reach backend /chat")?;

        resp.json().await.context("Invalid /chat response")
    }

    pub async fn conversations(&self, user_code: &str) -> Result<Vec<ConversationThread>> {
        let resp = self
            .http
            .post(self.url("/chat/conversations"))
            .json(&UserRequest {
                user_code: user_code.to_string(),
            })
            .send()
            .await
            .context("Failed to reach backend /chat/conversations")?;

        let body: ConversationsResponse = resp
            .json()
            .await
            .context("Invalid /chat/conversations response")?;
        if !body.success {
            anyhow::bail!("Backend refused to list conversations");
        }
        Ok(body.conversations)
    }

    pub async fn current_group(&self, user_code: &str) -> Result<Option<i64>> {
        let resp = self
            .http
            .post(self.url("/chat/current_group"))
            .json(&UserRequest {
                user_code: user_code.to_string(),
            })
            .send()
            .await
            .context("Failed to reach backend /chat/current_group")?;

        let body: CurrentGroupResponse = resp
            .json()
            .await
            .context("Invalid /chat/current_group response")?;
        if !body.success {
            anyhow::bail!("Backend refused to report the current conversation");
        }
        Ok(body.conversation_group)
    }

    pub async fn history(
        &self,
        user_code: &str,
        conversation_group: i64,
    ) -> Result<Vec<crate::backend::types::HistoryEntry>> {
        let resp = self
            .http
            .post(self.url("/chat/history"))
            .json(&HistoryRequest {
                user_code: user_code.to_string(),
                conversation_group,
            })
            .send()
            .await
            .context("Failed to reach backend /chat/history")?;

        let body: HistoryResponse = resp.json().await.context("Invalid /chat/history response")?;
        if !body.success {
            anyhow::bail!("Backend refused to load history");
        }
        Ok(body.history)
    }

    pub async fn new_conversation(&self, user_code: &str) -> Result<i64> {
        let resp = self
            .http
            .post(self.url("/chat/new_conversation"))
            .json(&UserRequest {
                user_code: user_code.to_string(),
            })
            .send()
            .await
            .context("Failed to reach backend /chat/new_conversation")?;

        let body: NewConversationResponse = resp
            .json()
            .await
            .context("Invalid /chat/new_conversation response")?;

        match body.conversation_group {
            Some(group) if body.success => Ok(group),
            _ => anyhow::bail!("Backend did not return a new conversation group"),
        }
    }

    pub async fn delete_conversation(&self, user_code: &str, conversation_group: i64) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/chat/delete_conversation"))
            .json(&DeleteConversationRequest {
                user_code: user_code.to_string(),
                conversation_group,
            })
            .send()
            .await
            .context("Failed to reach backend /chat/delete_conversation")?;

        let body: DeleteConversationResponse = resp
            .json()
            .await
            .context("Invalid /chat/delete_conversation response")?;
        if !body.success {
            anyhow::bail!("Backend refused to delete the conversation");
        }
        Ok(())
    }
}
