//! REST collaborator: session start, history and approvals.

use std::time::Duration;

use agentrelay_protocol::rest::{
    ApprovalDecisionRequest, ErrorBody, StartSessionRequest, StartSessionResponse,
};
use agentrelay_protocol::{ApprovalRequest, ChatMessage};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ApiError, TransportError};
use crate::transport::resolve_ws_url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[allow(async_fn_in_trait)]
pub trait SessionApi {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError>;

    /// History for a task, optionally limited to some of its sessions.
    async fn fetch_messages(
        &self,
        task_id: &str,
        session_ids: Option<&[String]>,
    ) -> Result<Vec<ChatMessage>, ApiError>;

    async fn fetch_pending_approvals(
        &self,
        session_id: &str,
    ) -> Result<Vec<ApprovalRequest>, ApiError>;

    async fn post_approval_decision(
        &self,
        request_id: &str,
        decision: &ApprovalDecisionRequest,
    ) -> Result<(), ApiError>;

    /// Absolute socket URL for the `wsUrl` a session start returned.
    fn socket_url(&self, ws_url: &str) -> Result<String, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Map a failed response to an [`ApiError`], picking out `GIT_INIT_REQUIRED`.
pub fn error_from_body(status: u16, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .describe()
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    if parsed.is_git_init_required() {
        ApiError::GitInitRequired { message }
    } else {
        ApiError::Status { status, message }
    }
}

impl SessionApi for HttpSessionApi {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        debug!(
            component = "rest",
            event = "rest.session.start",
            task_id = %request.task_id,
            mode = %request.mode,
            "Starting session"
        );
        let resp = self
            .client
            .post(self.url("/api/sessions"))
            .json(request)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn fetch_messages(
        &self,
        task_id: &str,
        session_ids: Option<&[String]>,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let mut req = self.client.get(self.url(&format!(
            "/api/tasks/{}/messages",
            urlencoding::encode(task_id)
        )));
        if let Some(ids) = session_ids.filter(|ids| !ids.is_empty()) {
            req = req.query(&[("sessionIds", ids.join(","))]);
        }
        let resp = req.send().await?;
        Self::read(resp).await
    }

    async fn fetch_pending_approvals(
        &self,
        session_id: &str,
    ) -> Result<Vec<ApprovalRequest>, ApiError> {
        let resp = self
            .client
            .get(self.url(&format!(
                "/api/sessions/{}/approvals",
                urlencoding::encode(session_id)
            )))
            .query(&[("status", "pending")])
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn post_approval_decision(
        &self,
        request_id: &str,
        decision: &ApprovalDecisionRequest,
    ) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url(&format!(
                "/api/approvals/{}/decision",
                urlencoding::encode(request_id)
            )))
            .json(decision)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &text));
        }
        Ok(())
    }

    fn socket_url(&self, ws_url: &str) -> Result<String, TransportError> {
        resolve_ws_url(&self.base_url, ws_url)
    }
}
