use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::LlmGateway;
use crate::models::intent::{Intent, IntentKind};

const SYSTEM_PROMPT: &str = "You classify geospatial queries for a satellite-imagery assistant. \
Reply with ONLY a JSON object:\n\
{\"intent_type\": \"vision|stac|hybrid|contextual\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}\n\
\n\
Rules, in priority order:\n\
1. References to what is already on screen (\"in this image\", \"visible\", \"can you see\") => vision.\n\
2. Display verbs (show, load, display) combined with analysis verbs (describe, analyze, explain, \
identify) => hybrid.\n\
3. Display verbs alone => stac.\n\
4. Past-tense questions about events without any display verb => contextual.\n\
5. Pure knowledge questions (how/what is/explain/why) without display verbs => contextual.";

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent_type: String,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

/// Intent classification agent: one LLM call, rule-based fallback on any
/// failure. Never errors — the pipeline always has an intent to act on.
pub struct IntentClassifier {
    gateway: Arc<LlmGateway>,
    deadline: Duration,
}

impl IntentClassifier {
    pub fn new(gateway: Arc<LlmGateway>, deadline: Duration) -> Self {
        IntentClassifier { gateway, deadline }
    }

    pub async fn classify(&self, query: &str) -> Intent {
        let reply: Result<IntentReply, _> = self
            .gateway
            .complete_json(SYSTEM_PROMPT, query, 300, self.deadline)
            .await;
        match reply {
            Ok(r) => match parse_kind(&r.intent_type) {
                Some(kind) => Intent::new(
                    kind,
                    r.confidence.unwrap_or(0.7),
                    r.reasoning.unwrap_or_else(|| "model classification".to_string()),
                ),
                None => {
                    tracing::warn!("intent: unknown intent_type '{}', using rules", r.intent_type);
                    rule_based(query)
                }
            },
            Err(e) => {
                tracing::warn!("intent: model call failed ({e}), using rules");
                rule_based(query)
            }
        }
    }
}

fn parse_kind(raw: &str) -> Option<IntentKind> {
    match raw.trim().to_lowercase().as_str() {
        "vision" => Some(IntentKind::Vision),
        "stac" => Some(IntentKind::Stac),
        "hybrid" => Some(IntentKind::Hybrid),
        "contextual" => Some(IntentKind::Contextual),
        _ => None,
    }
}

const VISION_MARKERS: &[&str] = &[
    "in this image",
    "in the image",
    "in this screenshot",
    "on the screen",
    "visible",
    "can you see",
    "what do you see",
];

const DISPLAY_VERBS: &[&str] = &["show", "display", "load", "render", "pull up", "bring up"];

const ANALYSIS_VERBS: &[&str] = &[
    "describe", "analyze", "analyse", "explain", "identify", "assess", "interpret",
];

const KNOWLEDGE_OPENERS: &[&str] = &[
    "how ", "what is", "what are", "what was", "what were", "why ", "when did", "where is",
];

const PAST_TENSE_MARKERS: &[&str] = &[
    " was ", " were ", " did ", " had ", "happened", "impacted", "affected", "damaged",
];

/// Keyword classifier used when the model is unavailable or returns
/// garbage. Confidence is capped at 0.5 so downstream consumers can tell
/// the two apart.
pub fn rule_based(query: &str) -> Intent {
    let q = query.to_lowercase();
    let padded = format!(" {q} ");

    let has = |words: &[&str]| words.iter().any(|w| q.contains(w));
    let has_padded = |words: &[&str]| words.iter().any(|w| padded.contains(w));

    if has(VISION_MARKERS) {
        return Intent::new(IntentKind::Vision, 0.5, "screen-reference keywords");
    }

    let display = has(DISPLAY_VERBS);
    let analysis = has(ANALYSIS_VERBS);

    if display && analysis {
        return Intent::new(IntentKind::Hybrid, 0.5, "display and analysis keywords");
    }
    if display {
        return Intent::new(IntentKind::Stac, 0.5, "display keywords");
    }
    if has_padded(PAST_TENSE_MARKERS) {
        return Intent::new(IntentKind::Contextual, 0.5, "past-tense question without display verb");
    }
    if KNOWLEDGE_OPENERS.iter().any(|w| q.starts_with(w)) || analysis {
        return Intent::new(IntentKind::Contextual, 0.5, "knowledge question keywords");
    }

    // Nothing matched (stop words, fragments): knowledge path, low trust
    Intent::new(IntentKind::Contextual, 0.2, "no actionable keywords")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing;

    #[test]
    fn display_only_is_stac() {
        assert_eq!(rule_based("Show me Seattle").kind, IntentKind::Stac);
        assert_eq!(rule_based("load sentinel imagery of Texas").kind, IntentKind::Stac);
    }

    #[test]
    fn display_plus_analysis_is_hybrid() {
        let i = rule_based("Show me wildfire imagery and explain the spread");
        assert_eq!(i.kind, IntentKind::Hybrid);
    }

    #[test]
    fn past_tense_without_display_is_contextual() {
        let i = rule_based("How was NYC impacted by Hurricane Sandy?");
        assert_eq!(i.kind, IntentKind::Contextual);
    }

    #[test]
    fn screen_reference_is_vision() {
        let i = rule_based("What buildings are visible in this image?");
        assert_eq!(i.kind, IntentKind::Vision);
    }

    #[test]
    fn stop_words_only_default_contextual_low_confidence() {
        let i = rule_based("the and of it");
        assert_eq!(i.kind, IntentKind::Contextual);
        assert!(i.confidence <= 0.5);
    }

    #[test]
    fn fallback_confidence_is_capped() {
        for q in ["show me stuff", "how do hurricanes form", "what is visible in this image"] {
            assert!(rule_based(q).confidence <= 0.5);
        }
    }

    #[tokio::test]
    async fn model_reply_is_used_when_valid() {
        let gw = Arc::new(testing::gateway_with(vec![
            r#"{"intent_type": "hybrid", "confidence": 0.92, "reasoning": "both"}"#,
        ]));
        let c = IntentClassifier::new(gw, Duration::from_secs(5));
        let i = c.classify("Show and explain the flood").await;
        assert_eq!(i.kind, IntentKind::Hybrid);
        assert!((i.confidence - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_rules() {
        let gw = Arc::new(testing::failing_gateway());
        let c = IntentClassifier::new(gw, Duration::from_secs(5));
        let i = c.classify("Show me Seattle").await;
        assert_eq!(i.kind, IntentKind::Stac);
        assert!(i.confidence <= 0.5);
    }

    #[tokio::test]
    async fn bogus_intent_type_falls_back_to_rules() {
        let gw = Arc::new(testing::gateway_with(vec![
            r#"{"intent_type": "geospatial_data_search", "confidence": 0.9}"#,
        ]));
        let c = IntentClassifier::new(gw, Duration::from_secs(5));
        let i = c.classify("Show me Seattle").await;
        assert_eq!(i.kind, IntentKind::Stac);
    }
}
