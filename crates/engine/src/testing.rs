//! In-memory transport and REST fakes shared by the engine's tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use agentrelay_protocol::rest::{
    ApprovalDecisionRequest, SessionInfo, StartSessionRequest, StartSessionResponse,
};
use agentrelay_protocol::{ApprovalRequest, ChatMessage};
use serde_json::Value;

use crate::connection::{Connector, FrameSocket};
use crate::error::{ApiError, TransportError};
use crate::rest::SessionApi;

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WireInner {
    inbound: VecDeque<Result<String, String>>,
    sent: Vec<String>,
    opened: Vec<String>,
    closed: usize,
    fail_next_open: bool,
}

/// Scripted server side of the socket. Once the inbound queue is empty the
/// socket reads as closed.
#[derive(Clone, Default)]
pub struct FakeWire(Rc<RefCell<WireInner>>);

impl FakeWire {
    pub fn push_frame(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, raw: &str) {
        self.0.borrow_mut().inbound.push_back(Ok(raw.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        self.0
            .borrow_mut()
            .inbound
            .push_back(Err(message.to_string()));
    }

    pub fn fail_next_open(&self) {
        self.0.borrow_mut().fail_next_open = true;
    }

    pub fn sent(&self) -> Vec<Value> {
        self.0
            .borrow()
            .sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.0.borrow().opened.clone()
    }

    pub fn closed(&self) -> usize {
        self.0.borrow().closed
    }
}

pub struct FakeConnector {
    wire: FakeWire,
}

impl FakeConnector {
    pub fn new(wire: &FakeWire) -> Self {
        Self { wire: wire.clone() }
    }
}

impl Connector for FakeConnector {
    type Socket = FakeSocket;

    async fn open(&mut self, url: &str) -> Result<FakeSocket, TransportError> {
        let mut inner = self.wire.0.borrow_mut();
        inner.opened.push(url.to_string());
        if std::mem::take(&mut inner.fail_next_open) {
            return Err(TransportError::Handshake("connection refused".to_string()));
        }
        Ok(FakeSocket {
            wire: self.wire.clone(),
        })
    }
}

pub struct FakeSocket {
    wire: FakeWire,
}

impl FrameSocket for FakeSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.wire.0.borrow_mut().sent.push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        let next = self.wire.0.borrow_mut().inbound.pop_front()?;
        Some(next.map_err(TransportError::Socket))
    }

    async fn close(&mut self) {
        self.wire.0.borrow_mut().closed += 1;
    }
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiInner {
    starts: VecDeque<Result<StartSessionResponse, ApiError>>,
    history: Vec<ChatMessage>,
    pending: Vec<ApprovalRequest>,
    fail_decisions: bool,
    history_latency: Option<Duration>,
    fetched_histories: usize,
    calls: Vec<String>,
    decisions: Vec<(String, ApprovalDecisionRequest)>,
}

#[derive(Clone, Default)]
pub struct FakeApi(Rc<RefCell<ApiInner>>);

impl FakeApi {
    pub fn will_start(&self, session_id: &str) {
        self.0.borrow_mut().starts.push_back(Ok(StartSessionResponse {
            session: SessionInfo {
                id: session_id.to_string(),
                task_id: None,
                status: None,
            },
            ws_url: format!("ws://fake/{}", session_id),
        }));
    }

    pub fn will_fail_start(&self, error: ApiError) {
        self.0.borrow_mut().starts.push_back(Err(error));
    }

    pub fn set_history(&self, history: Vec<ChatMessage>) {
        self.0.borrow_mut().history = history;
    }

    pub fn set_pending(&self, pending: Vec<ApprovalRequest>) {
        self.0.borrow_mut().pending = pending;
    }

    pub fn fail_decisions(&self, fail: bool) {
        self.0.borrow_mut().fail_decisions = fail;
    }

    /// Make history fetches take `latency`, like a real round trip.
    pub fn delay_history(&self, latency: Duration) {
        self.0.borrow_mut().history_latency = Some(latency);
    }

    /// History fetches that ran to completion.
    pub fn fetched_histories(&self) -> usize {
        self.0.borrow().fetched_histories
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.borrow().calls.clone()
    }

    pub fn decisions(&self) -> Vec<(String, ApprovalDecisionRequest)> {
        self.0.borrow().decisions.clone()
    }
}

impl SessionApi for FakeApi {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        let mut inner = self.0.borrow_mut();
        inner
            .calls
            .push(format!("start:{}:{}", request.task_id, request.mode));
        inner
            .starts
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Other("no scripted start".to_string())))
    }

    async fn fetch_messages(
        &self,
        task_id: &str,
        session_ids: Option<&[String]>,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let latency = {
            let mut inner = self.0.borrow_mut();
            let ids = session_ids.map(|ids| ids.join(",")).unwrap_or_default();
            inner.calls.push(format!("messages:{}:{}", task_id, ids));
            inner.history_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.0.borrow_mut();
        inner.fetched_histories += 1;
        Ok(inner.history.clone())
    }

    async fn fetch_pending_approvals(
        &self,
        session_id: &str,
    ) -> Result<Vec<ApprovalRequest>, ApiError> {
        let mut inner = self.0.borrow_mut();
        inner.calls.push(format!("approvals:{}", session_id));
        Ok(inner.pending.clone())
    }

    async fn post_approval_decision(
        &self,
        request_id: &str,
        decision: &ApprovalDecisionRequest,
    ) -> Result<(), ApiError> {
        let mut inner = self.0.borrow_mut();
        inner.calls.push(format!("decision:{}", request_id));
        if inner.fail_decisions {
            return Err(ApiError::Status {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        inner
            .decisions
            .push((request_id.to_string(), decision.clone()));
        Ok(())
    }

    fn socket_url(&self, ws_url: &str) -> Result<String, TransportError> {
        Ok(ws_url.to_string())
    }
}
