//! Approval flow
//!
//! Tracks tool calls waiting on a human decision. A request is `pending`
//! until a decision is delivered, then moves to the resolved log and is never
//! pending again. Decisions are optimistic: [`ApprovalFlow::begin_decision`]
//! takes the request out of the pending set, and delivery either commits or
//! rolls it back.

use std::collections::{HashMap, HashSet};

use agentrelay_protocol::server::ApprovalRequired;
use agentrelay_protocol::{ApprovalRequest, ApprovalStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Who decided an approval that ran out of time
pub const TIMEOUT_DECIDER: &str = "timeout";

/// Outcome applied to approvals whose deadline passes without a decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalTimeoutAction {
    Approve,
    #[default]
    Deny,
}

impl ApprovalTimeoutAction {
    pub fn approved(self) -> bool {
        matches!(self, ApprovalTimeoutAction::Approve)
    }
}

impl std::str::FromStr for ApprovalTimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ApprovalTimeoutAction::Approve),
            "deny" => Ok(ApprovalTimeoutAction::Deny),
            other => Err(format!("unknown approval timeout action: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    request: ApprovalRequest,
    approved: bool,
    decided_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalFlow {
    pending: Vec<ApprovalRequest>,
    in_flight: HashMap<String, InFlight>,
    resolved: Vec<ApprovalRequest>,
    resolved_ids: HashSet<String>,
    default_timeout: Duration,
}

impl Default for ApprovalFlow {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl ApprovalFlow {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Vec::new(),
            in_flight: HashMap::new(),
            resolved: Vec::new(),
            resolved_ids: HashSet::new(),
            default_timeout,
        }
    }

    pub fn pending(&self) -> &[ApprovalRequest] {
        &self.pending
    }

    pub fn resolved(&self) -> &[ApprovalRequest] {
        &self.resolved
    }

    pub fn get_pending(&self, id: &str) -> Option<&ApprovalRequest> {
        self.pending.iter().find(|r| r.id == id)
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }

    fn is_known(&self, id: &str) -> bool {
        self.resolved_ids.contains(id)
            || self.in_flight.contains_key(id)
            || self.pending.iter().any(|r| r.id == id)
    }

    /// Register an `approval_required` frame. Returns the new request, or
    /// `None` when the id was already seen.
    pub fn on_required(
        &mut self,
        session_id: &str,
        data: ApprovalRequired,
        now: DateTime<Utc>,
    ) -> Option<ApprovalRequest> {
        if self.is_known(&data.request_id) {
            debug!(
                component = "approval",
                event = "approval.required.duplicate",
                request_id = %data.request_id,
                "Ignoring repeated approval request"
            );
            return None;
        }

        let request = ApprovalRequest {
            id: data.request_id,
            session_id: session_id.to_string(),
            tool_name: data.tool_name,
            tool_input: data.tool_input,
            category: data.category,
            status: ApprovalStatus::Pending,
            timeout_at: data.timeout_at.unwrap_or(now + self.default_timeout),
            decided_at: None,
            decided_by: None,
        };
        info!(
            component = "approval",
            event = "approval.required",
            request_id = %request.id,
            session_id = %request.session_id,
            tool_name = %request.tool_name,
            timeout_at = %request.timeout_at,
            "Approval requested"
        );
        self.pending.push(request.clone());
        Some(request)
    }

    /// Merge pending approvals fetched over REST. Returns the ones added.
    pub fn hydrate(&mut self, requests: Vec<ApprovalRequest>) -> Vec<ApprovalRequest> {
        let mut added = Vec::new();
        for request in requests {
            if request.status != ApprovalStatus::Pending || self.is_known(&request.id) {
                continue;
            }
            self.pending.push(request.clone());
            added.push(request);
        }
        added
    }

    /// Take a request out of the pending set while its decision is delivered.
    pub fn begin_decision(
        &mut self,
        id: &str,
        approved: bool,
        decided_by: Option<String>,
    ) -> Option<ApprovalRequest> {
        let idx = self.pending.iter().position(|r| r.id == id)?;
        let request = self.pending.remove(idx);
        self.in_flight.insert(
            request.id.clone(),
            InFlight {
                request: request.clone(),
                approved,
                decided_by,
            },
        );
        Some(request)
    }

    /// Delivery succeeded: the request becomes terminal.
    pub fn commit_decision(&mut self, id: &str, now: DateTime<Utc>) -> Option<ApprovalRequest> {
        let InFlight {
            mut request,
            approved,
            decided_by,
        } = self.in_flight.remove(id)?;
        request.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        request.decided_at = Some(now);
        request.decided_by = decided_by;
        Some(self.record_resolved(request))
    }

    /// Delivery failed: the request is pending again, ordered by deadline.
    pub fn rollback_decision(&mut self, id: &str) -> Option<ApprovalRequest> {
        let InFlight { request, .. } = self.in_flight.remove(id)?;
        self.pending.push(request.clone());
        self.pending.sort_by_key(|r| r.timeout_at);
        Some(request)
    }

    /// Resolve every pending request whose deadline has passed.
    pub fn expire_due(
        &mut self,
        now: DateTime<Utc>,
        action: ApprovalTimeoutAction,
    ) -> Vec<ApprovalRequest> {
        let (due, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|r| r.timeout_at <= now);
        self.pending = keep;

        due.into_iter()
            .map(|mut request| {
                request.status = if action.approved() {
                    ApprovalStatus::Approved
                } else {
                    ApprovalStatus::Rejected
                };
                request.decided_at = Some(now);
                request.decided_by = Some(TIMEOUT_DECIDER.to_string());
                info!(
                    component = "approval",
                    event = "approval.expired",
                    request_id = %request.id,
                    status = ?request.status,
                    "Approval timed out"
                );
                self.record_resolved(request)
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.iter().map(|r| r.timeout_at).min()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.resolved.clear();
        self.resolved_ids.clear();
    }

    fn record_resolved(&mut self, request: ApprovalRequest) -> ApprovalRequest {
        self.resolved_ids.insert(request.id.clone());
        self.resolved.push(request.clone());
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrelay_protocol::ApprovalCategory;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn required(id: &str, timeout_at: Option<DateTime<Utc>>) -> ApprovalRequired {
        ApprovalRequired {
            request_id: id.to_string(),
            tool_name: "Bash".to_string(),
            tool_input: json!({"command": "rm -rf target"}),
            category: ApprovalCategory::Dangerous,
            timeout_at,
        }
    }

    #[test]
    fn missing_deadline_uses_default() {
        let mut flow = ApprovalFlow::new(Duration::seconds(90));
        let req = flow.on_required("s1", required("r1", None), now()).unwrap();
        assert_eq!(req.timeout_at, now() + Duration::seconds(90));
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(req.session_id, "s1");
    }

    #[test]
    fn duplicate_required_frames_are_ignored() {
        let mut flow = ApprovalFlow::default();
        assert!(flow.on_required("s1", required("r1", None), now()).is_some());
        assert!(flow.on_required("s1", required("r1", None), now()).is_none());
        assert_eq!(flow.pending().len(), 1);
    }

    #[test]
    fn resolved_requests_never_return_to_pending() {
        let mut flow = ApprovalFlow::default();
        flow.on_required("s1", required("r1", None), now());
        flow.begin_decision("r1", true, Some("user".into())).unwrap();
        let done = flow.commit_decision("r1", now()).unwrap();
        assert_eq!(done.status, ApprovalStatus::Approved);
        assert_eq!(done.decided_by.as_deref(), Some("user"));
        assert_eq!(done.decided_at, Some(now()));

        // Late frame and late REST hydration both ignored
        assert!(flow.on_required("s1", required("r1", None), now()).is_none());
        let mut stale = done.clone();
        stale.status = ApprovalStatus::Pending;
        assert!(flow.hydrate(vec![stale]).is_empty());
        assert!(flow.pending().is_empty());
        assert!(flow.begin_decision("r1", false, None).is_none());
    }

    #[test]
    fn rollback_restores_pending() {
        let mut flow = ApprovalFlow::default();
        flow.on_required("s1", required("r1", None), now());
        let taken = flow.begin_decision("r1", false, None).unwrap();
        assert_eq!(taken.status, ApprovalStatus::Pending);
        assert!(flow.pending().is_empty());
        assert!(flow.is_in_flight("r1"));

        flow.rollback_decision("r1").unwrap();
        assert_eq!(flow.pending().len(), 1);
        assert!(!flow.is_in_flight("r1"));
    }

    #[test]
    fn expiry_denies_by_default() {
        let mut flow = ApprovalFlow::default();
        flow.on_required("s1", required("r1", Some(now())), now());
        flow.on_required("s1", required("r2", Some(now() + Duration::seconds(30))), now());

        let expired = flow.expire_due(now(), ApprovalTimeoutAction::default());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "r1");
        assert_eq!(expired[0].status, ApprovalStatus::Rejected);
        assert_eq!(expired[0].decided_by.as_deref(), Some(TIMEOUT_DECIDER));
        assert_eq!(flow.pending().len(), 1);
        assert_eq!(flow.next_deadline(), Some(now() + Duration::seconds(30)));
    }

    #[test]
    fn expiry_can_approve() {
        let mut flow = ApprovalFlow::default();
        flow.on_required("s1", required("r1", Some(now())), now());
        let expired = flow.expire_due(now() + Duration::seconds(1), ApprovalTimeoutAction::Approve);
        assert_eq!(expired[0].status, ApprovalStatus::Approved);
        assert!(flow.next_deadline().is_none());
    }

    #[test]
    fn hydrate_skips_known_and_terminal() {
        let mut flow = ApprovalFlow::default();
        let live = flow.on_required("s1", required("r1", None), now()).unwrap();
        let mut fetched = live.clone();
        fetched.id = "r2".to_string();
        let mut approved = live.clone();
        approved.id = "r3".to_string();
        approved.status = ApprovalStatus::Approved;

        let added = flow.hydrate(vec![live, fetched, approved]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, "r2");
        assert_eq!(flow.pending().len(), 2);
    }

    #[test]
    fn clear_drops_everything() {
        let mut flow = ApprovalFlow::default();
        flow.on_required("s1", required("r1", None), now());
        flow.on_required("s1", required("r2", None), now());
        flow.begin_decision("r2", true, None);
        flow.clear();
        assert!(flow.pending().is_empty());
        assert!(!flow.is_in_flight("r2"));
        assert!(flow.on_required("s1", required("r1", None), now()).is_some());
    }

    #[test]
    fn timeout_action_parses() {
        assert_eq!("APPROVE".parse::<ApprovalTimeoutAction>(), Ok(ApprovalTimeoutAction::Approve));
        assert_eq!("deny".parse::<ApprovalTimeoutAction>(), Ok(ApprovalTimeoutAction::Deny));
        assert!("maybe".parse::<ApprovalTimeoutAction>().is_err());
    }
}
