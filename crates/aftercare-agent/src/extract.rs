//! Entity extraction from customer text: order references, named items
//! and confirmations.

use std::sync::OnceLock;

use regex::Regex;

fn order_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"(?i)\bORD[-\s]?(\d{3,10})\b",
            r"#\s?(\d{3,10})\b",
            r"(?i)\border\s+(?:number\s+|no\.?\s*|id\s+)?(?:is\s+)?#?(\d{3,10})\b",
        ]
        .iter()
        .map(|pat| Regex::new(pat).expect("Invalid order reference regex"))
        .collect()
    })
}

/// Order reference mentioned in the text (`#123`, `order 123`, `ORD-123456`).
pub fn order_reference(text: &str) -> Option<String> {
    order_patterns()
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Replacement item the customer names in an exchange request, e.g.
/// "swap it for the blue one" yields `blue one`.
pub fn requested_item(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:exchange|swap|replace|switch|trade)\b.*?\b(?:for|with|to)\s+(?:a\s+|an\s+|the\s+)?([^.!?,;]{2,60})",
        )
        .expect("Invalid requested item regex")
    });

    let raw = re.captures(text)?.get(1)?.as_str();
    let item = raw
        .trim()
        .trim_end_matches(" instead")
        .trim_end_matches(" please")
        .trim();
    let lowered = item.to_lowercase();
    if item.is_empty()
        || matches!(
            lowered.as_str(),
            "it" | "one" | "this" | "that" | "something" | "something else" | "another" | "me"
        )
        || lowered.starts_with("my ")
    {
        return None;
    }
    Some(item.to_string())
}

/// Whether the text accepts a previous suggestion ("yes", "that one", "the recommended").
pub fn is_confirmation(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:yes|yeah|yep|sure|ok(?:ay)?|please\s+do|go\s+ahead|sounds\s+good|that\s+one|do\s+it|let'?s\s+do\s+it)\b|\brecommended\b|\bthe\s+first\s+one\b",
        )
        .expect("Invalid confirmation regex")
    });
    re.is_match(text)
}
