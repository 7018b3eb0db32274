//! Session controller
//!
//! Async orchestration around [`SessionConnection`]: starting sessions in a
//! mode, attaching to existing ones, refetching history, hydrating approvals
//! and routing approval decisions over the socket or REST.

use agentrelay_protocol::rest::{ApprovalDecisionRequest, SessionInfo, StartSessionRequest};
use agentrelay_protocol::{ChatMessage, SessionMode};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::{Connector, SendOutcome, SessionConnection, UserInputOptions};
use crate::error::{ApiError, ApprovalError, ControllerError};
use crate::rest::SessionApi;
use crate::scroll::ScrollCommand;
use crate::transition::{EngineState, Effect, Input, SessionEvent};
use crate::EngineConfig;

/// `decidedBy` recorded for decisions made by the person at the keyboard
pub const USER_DECIDER: &str = "user";

/// Extra inputs for [`SessionController::start`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub prompt: Option<String>,
    /// Context a fork carries over; ignored by other modes
    pub carried: Option<Vec<ChatMessage>>,
    /// View offset to restore after a retry
    pub scroll_offset: Option<u32>,
}

pub struct SessionController<C: Connector, A: SessionApi> {
    connection: SessionConnection<C>,
    api: A,
    task_id: Option<String>,
}

impl<C: Connector, A: SessionApi> SessionController<C, A> {
    pub fn new(connector: C, api: A, config: &EngineConfig) -> Self {
        Self {
            connection: SessionConnection::new(connector, config),
            api,
            task_id: None,
        }
    }

    pub fn state(&self) -> &EngineState {
        self.connection.state()
    }

    pub fn connection(&self) -> &SessionConnection<C> {
        &self.connection
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.connection.subscribe()
    }

    /// Current transcript, for carrying into a fork.
    pub fn carried_context(&self) -> Vec<ChatMessage> {
        self.state().transcript.messages().cloned().collect()
    }

    /// Attach to a session that is already running.
    pub async fn attach(
        &mut self,
        task_id: &str,
        session_id: &str,
        ws_url: &str,
    ) -> Result<(), ControllerError> {
        self.task_id = Some(task_id.to_string());
        let connected = self.connect(session_id, ws_url).await;
        self.connection.apply(Input::SessionStarted {
            session_id: session_id.to_string(),
            mode: None,
            awaiting_reply: false,
        });
        connected?;
        self.hydrate_approvals().await;
        self.refresh_history().await?;
        Ok(())
    }

    /// Start a new session for `task_id` in `mode`.
    pub async fn start(
        &mut self,
        task_id: &str,
        mode: SessionMode,
        options: StartOptions,
    ) -> Result<SessionInfo, ControllerError> {
        self.task_id = Some(task_id.to_string());
        let StartOptions {
            prompt,
            carried,
            scroll_offset,
        } = options;
        let prompt = prompt.filter(|p| !p.trim().is_empty());

        self.connection.apply(Input::ModeSwitch {
            mode,
            prompt: prompt.clone(),
            carried,
            scroll_offset,
        });

        let awaiting_reply = prompt.is_some();
        let request = StartSessionRequest {
            task_id: task_id.to_string(),
            mode,
            initial_prompt: prompt,
        };
        let response = match self.api.start_session(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    component = "controller",
                    event = "controller.start.failed",
                    task_id = %task_id,
                    mode = %mode,
                    error = %e,
                    "Session start failed"
                );
                let git_init_required = matches!(e, ApiError::GitInitRequired { .. });
                self.connection.apply(Input::SessionStartFailed {
                    error: e.to_string(),
                    git_init_required,
                });
                return Err(match e {
                    ApiError::GitInitRequired { message } => {
                        ControllerError::GitInitRequired { message }
                    }
                    other => ControllerError::Start(other),
                });
            }
        };

        let session = response.session;
        info!(
            component = "controller",
            event = "controller.start.ok",
            task_id = %task_id,
            session_id = %session.id,
            mode = %mode,
            "Session started"
        );
        // Connect before recording the session: tearing down the previous
        // socket ends its turn, which must not end the new one.
        let connected = self.connect(&session.id, &response.ws_url).await;
        self.connection.apply(Input::SessionStarted {
            session_id: session.id.clone(),
            mode: Some(mode),
            awaiting_reply: awaiting_reply && connected.is_ok(),
        });
        connected?;
        self.hydrate_approvals().await;
        self.refresh_history().await?;
        Ok(session)
    }

    async fn connect(&mut self, session_id: &str, ws_url: &str) -> Result<(), ControllerError> {
        let url = self
            .api
            .socket_url(ws_url)
            .map_err(|source| ControllerError::Connect {
                session_id: session_id.to_string(),
                source,
            })?;
        self.connection
            .connect(session_id, &url)
            .await
            .map_err(|source| ControllerError::Connect {
                session_id: session_id.to_string(),
                source,
            })
    }

    pub async fn submit(&mut self, content: String, options: UserInputOptions) -> SendOutcome {
        self.connection.submit(content, options).await
    }

    pub async fn cancel(&mut self) -> SendOutcome {
        self.connection.cancel().await
    }

    /// Decide a pending approval. Goes over the socket while it is connected
    /// to the request's session and that session is still live; otherwise
    /// over REST. A failed REST delivery puts the request back to pending.
    pub async fn respond_to_approval(
        &mut self,
        request_id: &str,
        approved: bool,
    ) -> Result<(), ControllerError> {
        let request = self
            .state()
            .approvals
            .get_pending(request_id)
            .cloned()
            .ok_or_else(|| ApprovalError::UnknownRequest(request_id.to_string()))?;

        self.connection.apply(Input::ApprovalDecided {
            request_id: request_id.to_string(),
            approved,
            decided_by: Some(USER_DECIDER.to_string()),
        });

        if self.connection.is_connected_to(&request.session_id) && self.state().is_live() {
            match self.connection.send_approval(request_id, approved).await {
                SendOutcome::Sent => {
                    info!(
                        component = "controller",
                        event = "controller.approval.socket",
                        request_id = %request_id,
                        approved = approved,
                        "Approval decision sent over socket"
                    );
                    self.connection.apply(Input::ApprovalDelivered {
                        request_id: request_id.to_string(),
                    });
                    return Ok(());
                }
                outcome => {
                    warn!(
                        component = "controller",
                        event = "controller.approval.socket_failed",
                        request_id = %request_id,
                        outcome = ?outcome,
                        "Socket delivery failed, falling back to REST"
                    );
                }
            }
        }

        let decision = ApprovalDecisionRequest {
            approved,
            decided_by: Some(USER_DECIDER.to_string()),
        };
        match self.api.post_approval_decision(request_id, &decision).await {
            Ok(()) => {
                info!(
                    component = "controller",
                    event = "controller.approval.rest",
                    request_id = %request_id,
                    approved = approved,
                    "Approval decision posted over REST"
                );
                self.connection.apply(Input::ApprovalDelivered {
                    request_id: request_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.connection.apply(Input::ApprovalDeliveryFailed {
                    request_id: request_id.to_string(),
                    error: e.to_string(),
                });
                Err(ApprovalError::Delivery(e).into())
            }
        }
    }

    /// Refetch persisted history for the session chain and merge it.
    pub async fn refresh_history(&mut self) -> Result<usize, ControllerError> {
        let task_id = self.task_id.clone().ok_or(ControllerError::NoTask)?;
        let session_ids = self.state().chain.ids().to_vec();
        let history = self
            .api
            .fetch_messages(&task_id, Some(&session_ids))
            .await
            .map_err(ControllerError::History)?;
        self.connection.apply(Input::HistoryFetched(history));
        Ok(self.state().transcript.len())
    }

    /// Pull pending approvals the socket may have announced before we
    /// connected. Failures are logged; the socket still delivers new ones.
    pub async fn hydrate_approvals(&mut self) {
        let Some(session_id) = self.state().session_id.clone() else {
            return;
        };
        match self.api.fetch_pending_approvals(&session_id).await {
            Ok(requests) => {
                self.connection
                    .apply(Input::PendingApprovalsFetched(requests));
            }
            Err(e) => warn!(
                component = "controller",
                event = "controller.approvals.hydrate_failed",
                session_id = %session_id,
                error = %e,
                "Could not fetch pending approvals"
            ),
        }
    }

    pub fn expire_approvals(&mut self) {
        self.connection.apply(Input::Tick);
    }

    pub fn next_approval_deadline(&self) -> Option<DateTime<Utc>> {
        self.state().approvals.next_deadline()
    }

    /// A layout pass of the view. Returns where to scroll, restoring an
    /// offset captured by a retry once the rebuilt transcript is tall enough.
    pub fn on_layout(&mut self, content_height: u32, viewport_height: u32) -> ScrollCommand {
        self.connection
            .scroll_mut()
            .on_layout(content_height, viewport_height)
    }

    pub fn on_user_scroll(&mut self, offset: u32, content_height: u32, viewport_height: u32) {
        self.connection
            .scroll_mut()
            .on_user_scroll(offset, content_height, viewport_height);
    }

    /// Wait for the next inbound frame and apply it. Only reads the socket,
    /// so it may be dropped in a `select!`; hand the result to
    /// [`Self::follow_up`] outside the race.
    pub async fn next_effects(&mut self) -> Vec<Effect> {
        self.connection.pump().await
    }

    /// Process the next inbound frame and any follow-up it asks for.
    pub async fn run_once(&mut self) -> Result<(), ControllerError> {
        let effects = self.next_effects().await;
        self.follow_up(effects).await
    }

    /// Run the IO that applied frames asked for.
    pub async fn follow_up(&mut self, effects: Vec<Effect>) -> Result<(), ControllerError> {
        for effect in effects {
            match effect {
                Effect::RefetchHistory => {
                    self.refresh_history().await?;
                }
                Effect::Emit(_) => {}
            }
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        let effects = self.connection.disconnect().await;
        if let Err(e) = self.follow_up(effects).await {
            warn!(
                component = "controller",
                event = "controller.disconnect.followup_failed",
                error = %e,
                "Follow-up after disconnect failed"
            );
        }
    }
}
