//! Intent classification of customer messages.
//!
//! A message plus the last few messages of history map to one label from a
//! closed set and a confidence in `[0, 1]`.

pub mod classifier;
pub mod patterns;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aftercare_adapters::ServiceError;
use aftercare_core::types::Message;

pub use classifier::PatternClassifier;

/// Closed set of intents a turn can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    TrackOrder,
    ReportDefect,
    RequestExchange,
    RequestRefund,
    GeneralInquiry,
    Escalate,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 6] = [
        IntentLabel::TrackOrder,
        IntentLabel::ReportDefect,
        IntentLabel::RequestExchange,
        IntentLabel::RequestRefund,
        IntentLabel::GeneralInquiry,
        IntentLabel::Escalate,
    ];

    /// Declared specificity; breaks confidence ties (higher wins).
    pub fn specificity(&self) -> u8 {
        match self {
            IntentLabel::Escalate => 5,
            IntentLabel::RequestRefund => 4,
            IntentLabel::RequestExchange => 3,
            IntentLabel::ReportDefect => 2,
            IntentLabel::TrackOrder => 1,
            IntentLabel::GeneralInquiry => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::TrackOrder => "track_order",
            IntentLabel::ReportDefect => "report_defect",
            IntentLabel::RequestExchange => "request_exchange",
            IntentLabel::RequestRefund => "request_refund",
            IntentLabel::GeneralInquiry => "general_inquiry",
            IntentLabel::Escalate => "escalate",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified purpose of one message. Lives for one turn only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub label: IntentLabel,
    pub confidence: f32,
}

impl Intent {
    pub fn new(label: IntentLabel, confidence: f32) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Everything a classifier may look at.
#[derive(Clone, Debug)]
pub struct ClassifierInput {
    pub text: String,
    /// Prior messages, oldest first, at most the configured window.
    pub history: Vec<Message>,
    pub has_image: bool,
}

/// Maps a message to an intent.
///
/// Implementations must be deterministic for identical input. Errors are
/// service errors so the caller can apply the usual retry policy.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, input: &ClassifierInput) -> Result<Intent, ServiceError>;
}
