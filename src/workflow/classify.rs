//! Workflow classification (spec.md §4.1 planning phase), grounded on the
//! original's `AGENT_STEP_HANDLERS` dispatch table — each classification
//! maps to a fixed, ordered set of agent step kinds in [`super::plan`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    SecurityReview,
    NetworkDiscovery,
    Research,
    /// More than one category's keywords matched (spec.md §3's closed
    /// classification set includes `composite` for requests spanning
    /// multiple step kinds, e.g. "scan the subnet and summarize findings").
    Composite,
    Generic,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::SecurityReview => "security_review",
            Classification::NetworkDiscovery => "network_discovery",
            Classification::Research => "research",
            Classification::Composite => "composite",
            Classification::Generic => "generic",
        }
    }
}

/// Pluggable classification strategy so a host can swap in a model-backed
/// classifier without touching the engine.
pub trait Classifier: Send + Sync {
    fn classify(&self, request: &serde_json::Value) -> Classification;
}

/// Keyword-matched default classifier. Looks at the request's `description`
/// or `prompt` field (whichever is present) for keywords associated with
/// each classification; falls back to `Generic`.
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn classify(&self, request: &serde_json::Value) -> Classification {
        let text = request
            .get("description")
            .or_else(|| request.get("prompt"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_lowercase();

        let is_security = ["vulnerability", "cve", "exploit", "security scan", "pentest"]
            .iter()
            .any(|kw| text.contains(kw));
        let is_network = ["network", "port scan", "discover hosts", "subnet"]
            .iter()
            .any(|kw| text.contains(kw));
        let is_research = ["research", "summarize", "investigate", "find out"]
            .iter()
            .any(|kw| text.contains(kw));

        match (is_security, is_network, is_research) {
            (false, false, false) => Classification::Generic,
            (true, false, false) => Classification::SecurityReview,
            (false, true, false) => Classification::NetworkDiscovery,
            (false, false, true) => Classification::Research,
            _ => Classification::Composite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_security_keywords() {
        let request = serde_json::json!({ "description": "scan for known CVE exploits" });
        assert_eq!(KeywordClassifier.classify(&request), Classification::SecurityReview);
    }

    #[test]
    fn classifies_network_keywords() {
        let request = serde_json::json!({ "description": "discover hosts on the subnet" });
        assert_eq!(KeywordClassifier.classify(&request), Classification::NetworkDiscovery);
    }

    #[test]
    fn unmatched_text_falls_back_to_generic() {
        let request = serde_json::json!({ "description": "say hello" });
        assert_eq!(KeywordClassifier.classify(&request), Classification::Generic);
    }

    #[test]
    fn matching_more_than_one_category_is_composite() {
        let request = serde_json::json!({ "description": "scan the subnet for CVE exploits and summarize findings" });
        assert_eq!(KeywordClassifier.classify(&request), Classification::Composite);
    }
}
