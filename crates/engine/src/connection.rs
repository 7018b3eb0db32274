//! Session connection manager
//!
//! Owns the one socket for the current session together with the engine
//! state. Frames are decoded and pushed through [`transition`]; emitted
//! events fan out to subscribers and the remaining effects go back to the
//! caller. Reconnection is never automatic.

use agentrelay_protocol::ClientMessage;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::decoder::decode_frame;
use crate::error::TransportError;
use crate::scroll::ScrollTracker;
use crate::transition::{transition, EngineState, Effect, Input, SessionEvent};
use crate::EngineConfig;

// ---------------------------------------------------------------------------
// Transport seams
// ---------------------------------------------------------------------------

/// A connected, text-framed socket
#[allow(async_fn_in_trait)]
pub trait FrameSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text frame. `None` once the peer has closed the socket.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Opens sockets for a session URL
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Socket: FrameSocket;

    async fn open(&mut self, url: &str) -> Result<Self::Socket, TransportError>;
}

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub session_id: Option<String>,
    pub state: ConnectionState,
    pub error: Option<String>,
}

impl ConnectionStatus {
    fn new(session_id: Option<String>, state: ConnectionState) -> Self {
        Self {
            session_id,
            state,
            error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(None, ConnectionState::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NotConnected,
    Failed,
}

/// Optional fields carried with `user_input`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInputOptions {
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub files: Vec<String>,
    pub disable_web_tools: Option<bool>,
}

// ---------------------------------------------------------------------------
// SessionConnection
// ---------------------------------------------------------------------------

pub struct SessionConnection<C: Connector> {
    connector: C,
    socket: Option<C::Socket>,
    status: ConnectionStatus,
    state: EngineState,
    observers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl<C: Connector> SessionConnection<C> {
    pub fn new(connector: C, config: &EngineConfig) -> Self {
        Self {
            connector,
            socket: None,
            status: ConnectionStatus::default(),
            state: EngineState::new(config),
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// View-side scroll bookkeeping; not routed through `transition`.
    pub fn scroll_mut(&mut self) -> &mut ScrollTracker {
        &mut self.state.scroll
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn is_connected_to(&self, session_id: &str) -> bool {
        self.status.is_connected() && self.status.session_id.as_deref() == Some(session_id)
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Run one input through the engine and dispatch its events.
    /// Returns the effects that need IO.
    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = transition(state, input, Utc::now());
        self.state = state;
        self.dispatch(effects)
    }

    fn dispatch(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut remaining = Vec::new();
        for effect in effects {
            match effect {
                Effect::Emit(event) => self.broadcast(*event),
                other => remaining.push(other),
            }
        }
        remaining
    }

    fn broadcast(&mut self, event: SessionEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.broadcast(SessionEvent::ConnectionChanged(self.status.clone()));
    }

    /// Connect to `session_id`. A no-op while already connecting or
    /// connected to the same session; a connection to another session is
    /// torn down first.
    pub async fn connect(&mut self, session_id: &str, ws_url: &str) -> Result<(), TransportError> {
        let same_session = self.status.session_id.as_deref() == Some(session_id);
        if same_session
            && matches!(
                self.status.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            debug!(
                component = "connection",
                event = "connection.connect.noop",
                session_id = %session_id,
                "Already connected"
            );
            return Ok(());
        }

        if self.socket.is_some() {
            self.disconnect().await;
        }

        info!(
            component = "connection",
            event = "connection.connecting",
            session_id = %session_id,
            ws_url = %ws_url,
            "Connecting to session"
        );
        self.set_status(ConnectionStatus::new(
            Some(session_id.to_string()),
            ConnectionState::Connecting,
        ));

        match self.connector.open(ws_url).await {
            Ok(socket) => {
                self.socket = Some(socket);
                self.set_status(ConnectionStatus::new(
                    Some(session_id.to_string()),
                    ConnectionState::Connected,
                ));
                info!(
                    component = "connection",
                    event = "connection.connected",
                    session_id = %session_id,
                    "Session socket connected"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    component = "connection",
                    event = "connection.connect_failed",
                    session_id = %session_id,
                    error = %e,
                    "Session socket failed to connect"
                );
                self.set_status(ConnectionStatus {
                    session_id: Some(session_id.to_string()),
                    state: ConnectionState::Error,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    pub async fn send(&mut self, message: ClientMessage) -> SendOutcome {
        let kind = message.kind();
        let socket = match self.socket.as_mut() {
            Some(socket) if self.status.is_connected() => socket,
            _ => {
                warn!(
                    component = "connection",
                    event = "connection.send.not_connected",
                    kind = kind,
                    "Dropping outbound message, socket not connected"
                );
                return SendOutcome::NotConnected;
            }
        };

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    component = "connection",
                    event = "connection.send.serialize_failed",
                    kind = kind,
                    error = %e,
                    "Failed to serialize outbound message"
                );
                return SendOutcome::Failed;
            }
        };

        match socket.send_text(text).await {
            Ok(()) => {
                debug!(
                    component = "connection",
                    event = "connection.sent",
                    kind = kind,
                    "Sent message"
                );
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(
                    component = "connection",
                    event = "connection.send.failed",
                    kind = kind,
                    error = %e,
                    "Socket send failed"
                );
                self.lose_socket(ConnectionState::Error, e.to_string());
                SendOutcome::Failed
            }
        }
    }

    /// Send a prompt. The message shows up locally before the server
    /// confirms it.
    pub async fn submit(&mut self, content: String, options: UserInputOptions) -> SendOutcome {
        if !self.status.is_connected() {
            warn!(
                component = "connection",
                event = "connection.submit.not_connected",
                "Cannot submit, socket not connected"
            );
            return SendOutcome::NotConnected;
        }
        self.apply(Input::UserSubmitted {
            content: content.clone(),
        });
        self.send(ClientMessage::UserInput {
            content,
            model: options.model,
            permission_mode: options.permission_mode,
            files: options.files,
            disable_web_tools: options.disable_web_tools,
        })
        .await
    }

    /// Ask the agent to stop. The open buffer is flushed right away rather
    /// than waiting for the server to acknowledge.
    pub async fn cancel(&mut self) -> SendOutcome {
        let outcome = self.send(ClientMessage::Cancel).await;
        self.apply(Input::Cancelled);
        outcome
    }

    pub async fn send_approval(&mut self, request_id: &str, approved: bool) -> SendOutcome {
        self.send(ClientMessage::ApprovalResponse {
            request_id: request_id.to_string(),
            approved,
        })
        .await
    }

    /// Wait for the next frame and process it. Pends forever while no
    /// socket is open so it can sit in a `select!` unconditionally.
    pub async fn pump(&mut self) -> Vec<Effect> {
        let Some(socket) = self.socket.as_mut() else {
            return std::future::pending().await;
        };

        match socket.next_text().await {
            Some(Ok(text)) => match decode_frame(&text) {
                Some(frame) => self.apply(Input::Frame(frame)),
                None => Vec::new(),
            },
            Some(Err(e)) => {
                warn!(
                    component = "connection",
                    event = "connection.socket_error",
                    error = %e,
                    "Session socket error"
                );
                self.lose_socket(ConnectionState::Error, e.to_string())
            }
            None => {
                info!(
                    component = "connection",
                    event = "connection.closed",
                    "Session socket closed by server"
                );
                self.lose_socket(ConnectionState::Disconnected, "closed by server".to_string())
            }
        }
    }

    pub async fn disconnect(&mut self) -> Vec<Effect> {
        if let Some(mut socket) = self.socket.take() {
            socket.close().await;
        }
        self.lose_socket(ConnectionState::Disconnected, "disconnected".to_string())
    }

    fn lose_socket(&mut self, state: ConnectionState, reason: String) -> Vec<Effect> {
        self.socket = None;
        let error = (state == ConnectionState::Error).then(|| reason.clone());
        self.set_status(ConnectionStatus {
            session_id: self.status.session_id.clone(),
            state,
            error,
        });
        self.apply(Input::Disconnected { reason })
    }
}
