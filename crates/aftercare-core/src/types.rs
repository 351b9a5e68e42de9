use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation identity.
pub type SessionId = Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Author of a message within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Customer,
    Agent,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::Customer => write!(f, "customer"),
            MessageRole::Agent => write!(f, "agent"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(MessageRole::Customer),
            "agent" => Ok(MessageRole::Agent),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("Unknown message role: {}", s)),
        }
    }
}

/// Routing state of a session.
///
/// Per-turn states (`Classifying` .. `Composing`) are transient; only `Idle`,
/// `Escalated` and `Closed` are ever persisted between turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingState {
    Idle,
    Classifying,
    Dispatching,
    Awaiting { outstanding: usize },
    Composing,
    Escalated,
    Closed,
}

impl RoutingState {
    /// The persisted tag for this state.
    pub fn tag(&self) -> &'static str {
        match self {
            RoutingState::Idle => "idle",
            RoutingState::Classifying => "classifying",
            RoutingState::Dispatching => "dispatching",
            RoutingState::Awaiting { .. } => "awaiting",
            RoutingState::Composing => "composing",
            RoutingState::Escalated => "escalated",
            RoutingState::Closed => "closed",
        }
    }

    /// Parse a persisted tag. `awaiting` restores with zero outstanding calls.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "idle" => Some(RoutingState::Idle),
            "classifying" => Some(RoutingState::Classifying),
            "dispatching" => Some(RoutingState::Dispatching),
            "awaiting" => Some(RoutingState::Awaiting { outstanding: 0 }),
            "composing" => Some(RoutingState::Composing),
            "escalated" => Some(RoutingState::Escalated),
            "closed" => Some(RoutingState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for RoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingState::Awaiting { outstanding } => write!(f, "awaiting({})", outstanding),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// Reason code attached to a human handoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    CustomerRequest,
    RepeatedResolutionFailure,
    PersistentLowConfidence,
    FatalOutcome,
    ApprovalRequired,
    KeywordTrigger,
    HighValueOrder,
    TurnLimit,
    AlreadyEscalated,
}

impl EscalationReason {
    pub fn code(&self) -> &'static str {
        match self {
            EscalationReason::CustomerRequest => "customer_request",
            EscalationReason::RepeatedResolutionFailure => "repeated_resolution_failure",
            EscalationReason::PersistentLowConfidence => "persistent_low_confidence",
            EscalationReason::FatalOutcome => "fatal_outcome",
            EscalationReason::ApprovalRequired => "approval_required",
            EscalationReason::KeywordTrigger => "keyword_trigger",
            EscalationReason::HighValueOrder => "high_value_order",
            EscalationReason::TurnLimit => "turn_limit",
            EscalationReason::AlreadyEscalated => "already_escalated",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for EscalationReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer_request" => Ok(EscalationReason::CustomerRequest),
            "repeated_resolution_failure" => Ok(EscalationReason::RepeatedResolutionFailure),
            "persistent_low_confidence" => Ok(EscalationReason::PersistentLowConfidence),
            "fatal_outcome" => Ok(EscalationReason::FatalOutcome),
            "approval_required" => Ok(EscalationReason::ApprovalRequired),
            "keyword_trigger" => Ok(EscalationReason::KeywordTrigger),
            "high_value_order" => Ok(EscalationReason::HighValueOrder),
            "turn_limit" => Ok(EscalationReason::TurnLimit),
            "already_escalated" => Ok(EscalationReason::AlreadyEscalated),
            _ => Err(format!("Unknown escalation reason: {}", s)),
        }
    }
}

// =============================================================================
// Value objects
// =============================================================================

/// Reference to an image attached by the customer: a `data:` URL or a link
/// on one of the configured upload hosts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single message in a conversation. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
    pub image: Option<ImageRef>,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn customer(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Customer,
            text: text.into(),
            image: None,
            timestamp: Timestamp::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            text: text.into(),
            image: None,
            timestamp: Timestamp::now(),
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }
}

/// Facts learned during a conversation that later turns rely on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFacts {
    /// Order the conversation is about.
    pub order_id: Option<String>,
    /// Order total as reported by the order service.
    pub order_total: Option<f64>,
    /// Most recent confirmed defect type.
    pub last_defect: Option<String>,
    /// Replacement item last recommended by the exchange handler.
    pub recommended_item: Option<String>,
}

/// One customer conversation and its accumulated state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub messages: Vec<Message>,
    pub routing_state: RoutingState,
    pub failed_resolution_attempts: u32,
    pub low_confidence_streak: u32,
    /// Consecutive turns in which no handler resolved anything.
    #[serde(default)]
    pub turns_without_resolution: u32,
    pub escalated: bool,
    pub escalation_reason: Option<EscalationReason>,
    pub facts: SessionFacts,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub closed_at: Option<Timestamp>,
}

impl Session {
    /// Create a fresh, idle session.
    pub fn new(id: SessionId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            messages: Vec::new(),
            routing_state: RoutingState::Idle,
            failed_resolution_attempts: 0,
            low_confidence_streak: 0,
            turns_without_resolution: 0,
            escalated: false,
            escalation_reason: None,
            facts: SessionFacts::default(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Append a message. Messages are never edited or reordered.
    pub fn append(&mut self, message: Message) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn is_closed(&self) -> bool {
        self.routing_state == RoutingState::Closed
    }

    /// Close the session. Closure resets the failed-resolution counter.
    pub fn close(&mut self) {
        let now = Timestamp::now();
        self.routing_state = RoutingState::Closed;
        self.failed_resolution_attempts = 0;
        self.closed_at = Some(now);
        self.updated_at = now;
    }
}

/// Epoch seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    /// RFC 3339 rendering for API responses.
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime().to_rfc3339()
    }
}
