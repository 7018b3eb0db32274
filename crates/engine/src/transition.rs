//! Pure state transition function
//!
//! Every decoded frame and every local action goes through
//! `transition(state, input, now) -> (state, effects)`. No IO and no async:
//! the connection manager and controller own the socket and REST calls and
//! feed their results back in as [`Input`]s.

use agentrelay_protocol::{
    server::OutputDecode, ApprovalRequest, ChatMessage, DiffPreview, OutputPayload, ServerFrame,
    SessionMode, SessionStatus, ToolCommand,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalFlow, ApprovalTimeoutAction};
use crate::connection::ConnectionStatus;
use crate::dedup::DedupRegistry;
use crate::mode_switch::{ModeSwitchPlan, ScrollPolicy, SessionChain, TranscriptPolicy};
use crate::normalizer::normalize;
use crate::reassembler::{DeltaReassembler, Reassembly, StreamingBuffer};
use crate::scroll::ScrollTracker;
use crate::transcript::{LiveOutcome, MergeSummary, Transcript};
use crate::EngineConfig;

// ---------------------------------------------------------------------------
// EngineState: everything one session view owns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineState {
    pub session_id: Option<String>,
    pub status: Option<SessionStatus>,
    /// A prompt is out and the agent has not finished answering it.
    pub waiting: bool,
    pub reassembler: DeltaReassembler,
    pub registry: DedupRegistry,
    pub transcript: Transcript,
    pub approvals: ApprovalFlow,
    pub diffs: Vec<DiffPreview>,
    pub scroll: ScrollTracker,
    pub chain: SessionChain,
    pub timeout_action: ApprovalTimeoutAction,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        let default_timeout = Duration::from_std(config.approval_default_timeout)
            .unwrap_or_else(|_| Duration::minutes(5));
        Self {
            session_id: None,
            status: None,
            waiting: false,
            reassembler: DeltaReassembler::new(),
            registry: DedupRegistry::new(),
            transcript: Transcript::new(),
            approvals: ApprovalFlow::new(default_timeout),
            diffs: Vec::new(),
            scroll: ScrollTracker::new(config.scroll_restore_max_attempts),
            chain: SessionChain::default(),
            timeout_action: config.approval_timeout_action,
        }
    }

    pub fn streaming(&self) -> Option<&StreamingBuffer> {
        self.reassembler.current()
    }

    /// Whether the current session can still take a socket reply.
    pub fn is_live(&self) -> bool {
        !self.status.is_some_and(SessionStatus::is_terminal)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Input / Effect / SessionEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    Frame(ServerFrame),
    Disconnected {
        reason: String,
    },
    Cancelled,
    UserSubmitted {
        content: String,
    },
    HistoryFetched(Vec<ChatMessage>),
    PendingApprovalsFetched(Vec<ApprovalRequest>),
    ApprovalDecided {
        request_id: String,
        approved: bool,
        decided_by: Option<String>,
    },
    ApprovalDelivered {
        request_id: String,
    },
    ApprovalDeliveryFailed {
        request_id: String,
        error: String,
    },
    Tick,
    ModeSwitch {
        mode: SessionMode,
        prompt: Option<String>,
        carried: Option<Vec<ChatMessage>>,
        scroll_offset: Option<u32>,
    },
    SessionStarted {
        session_id: String,
        mode: Option<SessionMode>,
        /// An initial prompt went out with the start request.
        awaiting_reply: bool,
    },
    SessionStartFailed {
        error: String,
        git_init_required: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageRendered(ChatMessage),
    MessageReplaced {
        provisional_id: String,
        message: ChatMessage,
    },
    /// A message already on screen was finished with newer content.
    MessageUpdated(ChatMessage),
    StreamingUpdated {
        message_id: String,
        text: String,
    },
    StatusChanged(SessionStatus),
    ApprovalRequested(ApprovalRequest),
    ApprovalResolved(ApprovalRequest),
    DiffPreview(DiffPreview),
    Error {
        message: String,
    },
    ConnectionChanged(ConnectionStatus),
    HistoryMerged {
        summary: MergeSummary,
        total: usize,
    },
    StartFailed {
        message: String,
        git_init_required: bool,
    },
    /// The transcript was rebuilt by a mode switch; redraw from scratch.
    TranscriptReset {
        mode: SessionMode,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(Box<SessionEvent>),
    /// The turn ended; persisted history is now authoritative.
    RefetchHistory,
}

fn emit(effects: &mut Vec<Effect>, event: SessionEvent) {
    effects.push(Effect::Emit(Box::new(event)));
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

pub fn transition(
    mut state: EngineState,
    input: Input,
    now: DateTime<Utc>,
) -> (EngineState, Vec<Effect>) {
    let mut effects = Vec::new();

    match input {
        Input::Frame(frame) => apply_frame(&mut state, frame, now, &mut effects),

        Input::Disconnected { reason } => {
            debug!(
                component = "transition",
                event = "transition.disconnected",
                reason = %reason,
                "Flushing after disconnect"
            );
            flush_buffer(&mut state, now, &mut effects);
            state.waiting = false;
        }

        Input::Cancelled => {
            flush_buffer(&mut state, now, &mut effects);
            state.waiting = false;
        }

        Input::UserSubmitted { content } => {
            let message = state.transcript.insert_provisional(content);
            state.waiting = true;
            state.scroll.reset_to_bottom();
            emit(&mut effects, SessionEvent::MessageRendered(message));
        }

        Input::HistoryFetched(history) => {
            let summary = state.transcript.merge_persisted(history, &mut state.registry);
            emit(
                &mut effects,
                SessionEvent::HistoryMerged {
                    summary,
                    total: state.transcript.len(),
                },
            );
        }

        Input::PendingApprovalsFetched(requests) => {
            for request in state.approvals.hydrate(requests) {
                emit(&mut effects, SessionEvent::ApprovalRequested(request));
            }
        }

        Input::ApprovalDecided {
            request_id,
            approved,
            decided_by,
        } => {
            if state
                .approvals
                .begin_decision(&request_id, approved, decided_by)
                .is_none()
            {
                debug!(
                    component = "transition",
                    event = "transition.approval.not_pending",
                    request_id = %request_id,
                    "Decision for an approval that is not pending"
                );
            }
        }

        Input::ApprovalDelivered { request_id } => {
            if let Some(resolved) = state.approvals.commit_decision(&request_id, now) {
                emit(&mut effects, SessionEvent::ApprovalResolved(resolved));
            }
        }

        Input::ApprovalDeliveryFailed { request_id, error } => {
            if state.approvals.rollback_decision(&request_id).is_some() {
                emit(
                    &mut effects,
                    SessionEvent::Error {
                        message: format!("Approval {} not delivered: {}", request_id, error),
                    },
                );
            }
        }

        Input::Tick => {
            for resolved in state.approvals.expire_due(now, state.timeout_action) {
                emit(&mut effects, SessionEvent::ApprovalResolved(resolved));
            }
        }

        Input::ModeSwitch {
            mode,
            prompt,
            carried,
            scroll_offset,
        } => {
            apply_mode_switch(&mut state, mode, carried, scroll_offset);
            emit(&mut effects, SessionEvent::TranscriptReset { mode });
            if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
                let message = state.transcript.insert_provisional(prompt);
                state.waiting = true;
                emit(&mut effects, SessionEvent::MessageRendered(message));
            }
        }

        Input::SessionStarted {
            session_id,
            mode,
            awaiting_reply,
        } => {
            match mode {
                Some(mode) => state
                    .chain
                    .advance(&ModeSwitchPlan::for_mode(mode), session_id.clone()),
                None => state.chain.attach(session_id.clone()),
            }
            state.session_id = Some(session_id);
            state.status = None;
            state.waiting = awaiting_reply;
        }

        Input::SessionStartFailed {
            error,
            git_init_required,
        } => {
            state.waiting = false;
            emit(
                &mut effects,
                SessionEvent::StartFailed {
                    message: error,
                    git_init_required,
                },
            );
        }
    }

    (state, effects)
}

fn apply_frame(
    state: &mut EngineState,
    frame: ServerFrame,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) {
    match frame {
        ServerFrame::Output { data } => apply_output(state, &data, now, effects),

        ServerFrame::Status { status } => {
            state.status = Some(status);
            emit(effects, SessionEvent::StatusChanged(status));
            if status == SessionStatus::Running {
                let opened = !state.reassembler.is_open();
                let buffer = state.reassembler.ensure_open();
                if opened {
                    emit(
                        effects,
                        SessionEvent::StreamingUpdated {
                            message_id: buffer.message_id.clone(),
                            text: String::new(),
                        },
                    );
                }
            } else if status.is_terminal() {
                flush_buffer(state, now, effects);
                state.waiting = false;
                effects.push(Effect::RefetchHistory);
            }
        }

        ServerFrame::ApprovalRequired { data } => {
            let session_id = state.session_id.clone().unwrap_or_default();
            if let Some(request) = state.approvals.on_required(&session_id, data, now) {
                emit(effects, SessionEvent::ApprovalRequested(request));
            }
        }

        ServerFrame::DiffPreview { data } => {
            match state.diffs.iter_mut().find(|d| d.id == data.id) {
                Some(existing) => *existing = data.clone(),
                None => state.diffs.push(data.clone()),
            }
            emit(effects, SessionEvent::DiffPreview(data));
        }

        ServerFrame::Error { message } => {
            warn!(
                component = "transition",
                event = "transition.agent_error",
                error = %message,
                "Agent reported an error"
            );
            flush_buffer(state, now, effects);
            state.waiting = false;
            emit(effects, SessionEvent::Error { message });
        }
    }
}

fn apply_output(
    state: &mut EngineState,
    data: &Value,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) {
    let payload = match OutputPayload::parse(data) {
        OutputDecode::Payload(payload) => payload,
        OutputDecode::UnknownKind(kind) => {
            debug!(
                component = "transition",
                event = "transition.output.unknown_kind",
                kind = ?kind,
                "Ignoring output with unknown kind"
            );
            return;
        }
        OutputDecode::Malformed(e) => {
            warn!(
                component = "transition",
                event = "transition.output.malformed",
                error = %e,
                "Dropping malformed output payload"
            );
            return;
        }
    };

    match payload {
        OutputPayload::Text { content } => apply_chunk(state, &content, None, now, effects),
        OutputPayload::Message { content, id } => {
            apply_chunk(state, &content, id.as_deref(), now, effects)
        }
        OutputPayload::ToolUse { name, input, .. } => {
            state.reassembler.push_tool(ToolCommand::success(name, input));
            emit_streaming(state, effects);
        }
        OutputPayload::ToolBlocked {
            tool_name,
            input,
            reason,
        } => {
            info!(
                component = "transition",
                event = "transition.tool_blocked",
                tool_name = %tool_name,
                reason = reason.as_deref().unwrap_or(""),
                "Tool call blocked"
            );
            state.reassembler.push_tool(ToolCommand::error(tool_name, input));
            emit_streaming(state, effects);
        }
        OutputPayload::Delta {
            message_id,
            text,
            offset,
        } => {
            let outcome = state.reassembler.apply_delta(&message_id, &text, offset);
            apply_reassembly(state, outcome, now, effects);
        }
        OutputPayload::StreamingBuffer {
            message_id,
            content,
            offset,
        } => {
            let outcome = state
                .reassembler
                .replace_snapshot(&message_id, &content, offset);
            apply_reassembly(state, outcome, now, effects);
        }
        OutputPayload::UserMessageSaved {
            id,
            content,
            timestamp,
        } => {
            let mut message = ChatMessage::user(id, content);
            message.timestamp = timestamp;
            let outcome = state.transcript.confirm_user_message(
                message.id.clone(),
                message.content.clone(),
                message.timestamp.clone(),
                &mut state.registry,
            );
            emit_live_outcome(outcome, message, effects);
        }
    }
}

/// Legacy whole-chunk output. An exact empty string marks the end of the
/// message.
fn apply_chunk(
    state: &mut EngineState,
    content: &Value,
    message_id: Option<&str>,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) {
    if content.as_str() == Some("") {
        flush_buffer(state, now, effects);
        return;
    }

    let normalized = normalize(content);
    if normalized.is_empty() {
        return;
    }
    for tool in normalized.tools {
        state.reassembler.push_tool(tool);
    }
    if normalized.text.is_empty() {
        emit_streaming(state, effects);
        return;
    }
    let outcome = state.reassembler.append_chunk(&normalized.text, message_id);
    apply_reassembly(state, outcome, now, effects);
}

fn apply_reassembly(
    state: &mut EngineState,
    outcome: Reassembly,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) {
    if let Some(mut finished) = outcome.finalized {
        finished.timestamp.get_or_insert_with(|| now.to_rfc3339());
        commit_message(state, finished, effects);
    }
    if outcome.changed {
        emit_streaming(state, effects);
    }
}

fn emit_streaming(state: &EngineState, effects: &mut Vec<Effect>) {
    if let Some(buffer) = state.reassembler.current() {
        emit(
            effects,
            SessionEvent::StreamingUpdated {
                message_id: buffer.message_id.clone(),
                text: buffer.accumulated_text.clone(),
            },
        );
    }
}

fn flush_buffer(state: &mut EngineState, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
    if let Some(message) = state.reassembler.finalize(Some(now.to_rfc3339())) {
        commit_message(state, message, effects);
    }
}

fn commit_message(state: &mut EngineState, message: ChatMessage, effects: &mut Vec<Effect>) {
    let outcome = state
        .transcript
        .push_live(message.clone(), &mut state.registry);
    emit_live_outcome(outcome, message, effects);
}

fn emit_live_outcome(outcome: LiveOutcome, message: ChatMessage, effects: &mut Vec<Effect>) {
    match outcome {
        LiveOutcome::Rendered => emit(effects, SessionEvent::MessageRendered(message)),
        LiveOutcome::Replaced { provisional_id } => emit(
            effects,
            SessionEvent::MessageReplaced {
                provisional_id,
                message,
            },
        ),
        LiveOutcome::Updated => emit(effects, SessionEvent::MessageUpdated(message)),
        LiveOutcome::Suppressed => {
            debug!(
                component = "transition",
                event = "transition.message.suppressed",
                message_id = %message.id,
                "Message already rendered"
            );
        }
    }
}

fn apply_mode_switch(
    state: &mut EngineState,
    mode: SessionMode,
    carried: Option<Vec<ChatMessage>>,
    scroll_offset: Option<u32>,
) {
    let plan = ModeSwitchPlan::for_mode(mode);
    info!(
        component = "transition",
        event = "transition.mode_switch",
        mode = %mode,
        "Applying mode switch"
    );

    if plan.clear_buffers {
        state.reassembler.clear();
    }
    if plan.clear_dedup {
        state.registry.clear();
    }
    match plan.transcript {
        TranscriptPolicy::Clear => state.transcript.clear(),
        TranscriptPolicy::Keep => {}
        TranscriptPolicy::ReplaceWithCarried => state
            .transcript
            .seed_carried(carried.unwrap_or_default(), &mut state.registry),
    }
    if plan.clear_side_state {
        state.diffs.clear();
        state.approvals.clear();
    }
    match plan.scroll {
        ScrollPolicy::StickToBottom => state.scroll.reset_to_bottom(),
        ScrollPolicy::CaptureAndRestore => match scroll_offset {
            Some(offset) => state.scroll.capture(offset),
            None => state.scroll.reset_to_bottom(),
        },
    }
    state.status = None;
    state.waiting = false;
}
