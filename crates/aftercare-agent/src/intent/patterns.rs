//! Regex-based intent pattern matching.

use regex::Regex;

use super::IntentLabel;

/// A single compiled regex pattern linked to an intent label.
pub struct IntentPattern {
    pub regex: Regex,
    pub label: IntentLabel,
    pub base_confidence: f32,
}

/// A match result from pattern detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub label: IntentLabel,
    pub confidence: f32,
    pub matched_text: String,
}

/// Collection of all intent patterns, compiled once and reused.
pub struct PatternSet {
    patterns: Vec<IntentPattern>,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternSet {
    pub fn new() -> Self {
        let mut patterns = Vec::new();

        let groups: [(IntentLabel, Vec<(&str, f32)>); 6] = [
            (
                IntentLabel::Escalate,
                vec![
                    (
                        r"(?i)\b(?:speak|talk|chat)\s+(?:to|with)\s+(?:a\s+|an\s+|your\s+)?(?:human|person|real\s+person|agent|representative|manager|supervisor|someone)\b",
                        0.95,
                    ),
                    (r"(?i)\b(?:get|give|need|want)\s+(?:me\s+)?(?:a\s+)?(?:manager|supervisor)\b", 0.92),
                    (r"(?i)\bescalate\b", 0.90),
                    (r"(?i)\b(?:real|live)\s+(?:person|human|agent)\b", 0.90),
                    (r"(?i)\bhuman\s+(?:agent|being|support)\b", 0.88),
                    (r"(?i)\bcustomer\s+service\s+(?:rep|representative)\b", 0.85),
                ],
            ),
            (
                IntentLabel::RequestRefund,
                vec![
                    (r"(?i)\brefund\b", 0.90),
                    (r"(?i)\bmoney\s+back\b", 0.90),
                    (r"(?i)\breimburse(?:ment|d)?\b", 0.86),
                    (r"(?i)\bcancel\s+(?:my\s+|the\s+|this\s+)?order\b", 0.75),
                    (r"(?i)\b(?:want|like)\s+to\s+return\b", 0.78),
                    (r"(?i)\breturn\s+(?:it|this|the|my)\b", 0.72),
                ],
            ),
            (
                IntentLabel::RequestExchange,
                vec![
                    (r"(?i)\bexchange\b", 0.90),
                    (r"(?i)\bswap\b", 0.86),
                    (r"(?i)\breplace(?:ment|d)?\b", 0.82),
                    (r"(?i)\b(?:different|another|bigger|smaller)\s+(?:size|colou?r|one|model)\b", 0.85),
                    (r"(?i)\bwrong\s+(?:size|colou?r|item|product)\b", 0.82),
                    (r"(?i)\b(?:doesn'?t|does\s+not|didn'?t)\s+fit\b", 0.80),
                ],
            ),
            (
                IntentLabel::ReportDefect,
                vec![
                    (r"(?i)\barrived\s+(?:damaged|broken|torn|cracked|ripped|stained|dented)\b", 0.92),
                    (
                        r"(?i)\b(?:torn|tear|ripped|rip|broken|damaged|cracked|stain(?:ed|s)?|defect(?:ive)?|scratch(?:ed|es)?|dent(?:ed)?|faulty|shattered)\b",
                        0.85,
                    ),
                    (r"(?i)\b(?:doesn'?t|does\s+not|stopped)\s+work(?:ing)?\b", 0.82),
                    (r"(?i)\bnot\s+working\b", 0.82),
                    (r"(?i)\bhas\s+a\s+hole\b", 0.82),
                    (r"(?i)\bpoor\s+quality\b", 0.70),
                ],
            ),
            (
                IntentLabel::TrackOrder,
                vec![
                    (r"(?i)\bwhere\s+is\s+(?:my\s+|the\s+)?(?:order|package|parcel|shipment|delivery|stuff)\b", 0.92),
                    (r"(?i)\border\s+status\b", 0.90),
                    (
                        r"(?i)\bwhen\s+will\s+(?:it|my\s+\w+|the\s+\w+)\s+(?:arrive|be\s+delivered|ship|get\s+here)\b",
                        0.90,
                    ),
                    (r"(?i)\btrack(?:ing)?\b", 0.88),
                    (r"(?i)\b(?:delivery|shipping)\s+(?:status|update|date)\b", 0.88),
                    (r"(?i)\b(?:hasn'?t|has\s+not|haven'?t|not\s+yet)\s+(?:arrived|been\s+delivered|shipped)\b", 0.82),
                    (r"(?i)\bstill\s+waiting\b", 0.78),
                    (r"(?i)\beta\b", 0.80),
                ],
            ),
            (
                IntentLabel::GeneralInquiry,
                vec![
                    (r"(?i)\b(?:return|refund|shipping|exchange|warranty|privacy)\s+polic(?:y|ies)\b", 0.93),
                    (r"(?i)\bpolic(?:y|ies)\b", 0.80),
                    (r"(?i)\bhow\s+(?:long|much|many|do\s+i|does|can\s+i)\b", 0.70),
                    (r"(?i)\b(?:opening|business)\s+hours\b", 0.80),
                    (r"(?i)^\s*(?:hi|hello|hey|good\s+(?:morning|afternoon|evening))\b", 0.60),
                    (r"(?i)\bthank(?:s|\s+you)\b", 0.60),
                ],
            ),
        ];

        for (label, group) in groups {
            for (pat, conf) in group {
                patterns.push(IntentPattern {
                    regex: Regex::new(pat).expect("Invalid intent regex"),
                    label,
                    base_confidence: conf,
                });
            }
        }

        Self { patterns }
    }

    /// Detect all matching patterns, sorted by confidence descending.
    pub fn detect(&self, text: &str) -> Vec<PatternMatch> {
        let mut matches: Vec<PatternMatch> = self
            .patterns
            .iter()
            .filter_map(|pattern| {
                pattern.regex.find(text).map(|m| PatternMatch {
                    label: pattern.label,
                    confidence: pattern.base_confidence,
                    matched_text: m.as_str().to_string(),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(b.label.specificity().cmp(&a.label.specificity()))
        });
        matches
    }

    /// Highest confidence per label, best label first.
    pub fn best_per_label(&self, text: &str) -> Vec<(IntentLabel, f32)> {
        let mut best: Vec<(IntentLabel, f32)> = Vec::new();
        for m in self.detect(text) {
            if !best.iter().any(|(label, _)| *label == m.label) {
                best.push((m.label, m.confidence));
            }
        }
        best
    }
}
