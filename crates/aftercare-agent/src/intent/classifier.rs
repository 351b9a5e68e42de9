//! Deterministic pattern-based classifier.

use async_trait::async_trait;

use aftercare_adapters::ServiceError;
use aftercare_core::types::MessageRole;

use super::patterns::PatternSet;
use super::{ClassifierInput, Intent, IntentClassifier, IntentLabel};
use crate::extract;

/// Confidence when nothing matches and there is nothing to inherit.
const FALLBACK_CONFIDENCE: f32 = 0.3;
/// Confidence for an attached image with no stronger textual signal.
const IMAGE_CONFIDENCE: f32 = 0.7;
/// Factor applied to an intent inherited from the history window.
const FOLLOW_UP_DECAY: f32 = 0.6;
/// Bonus when the message carries an order reference.
const ORDER_REF_BONUS: f32 = 0.05;

/// Regex classifier with history-based follow-up resolution.
#[derive(Default)]
pub struct PatternClassifier {
    patterns: PatternSet,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify synchronously. Pure function of the input.
    pub fn classify_input(&self, input: &ClassifierInput) -> Intent {
        if let Some(intent) = self.from_text(&input.text) {
            if input.has_image && intent.label == IntentLabel::GeneralInquiry {
                return Intent::new(IntentLabel::ReportDefect, IMAGE_CONFIDENCE);
            }
            return intent;
        }

        if input.has_image {
            return Intent::new(IntentLabel::ReportDefect, IMAGE_CONFIDENCE);
        }

        // Follow-up: inherit from the most recent customer message that had a signal.
        let inherited = input
            .history
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::Customer)
            .find_map(|m| self.from_text(&m.text));
        if let Some(previous) = inherited {
            return Intent::new(previous.label, previous.confidence * FOLLOW_UP_DECAY);
        }

        Intent::new(IntentLabel::GeneralInquiry, FALLBACK_CONFIDENCE)
    }

    fn from_text(&self, text: &str) -> Option<Intent> {
        let has_order_ref = extract::order_reference(text).is_some();
        self.patterns
            .best_per_label(text)
            .into_iter()
            .map(|(label, confidence)| {
                let boosted = match label {
                    IntentLabel::TrackOrder
                    | IntentLabel::RequestRefund
                    | IntentLabel::RequestExchange
                        if has_order_ref =>
                    {
                        (confidence + ORDER_REF_BONUS).min(0.99)
                    }
                    _ => confidence,
                };
                Intent::new(label, boosted)
            })
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(a.label.specificity().cmp(&b.label.specificity()))
            })
    }
}

#[async_trait]
impl IntentClassifier for PatternClassifier {
    async fn classify(&self, input: &ClassifierInput) -> Result<Intent, ServiceError> {
        Ok(self.classify_input(input))
    }
}
