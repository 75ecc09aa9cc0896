use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::geocode::LocationType;
use crate::llm::LlmGateway;

const SYSTEM_PROMPT: &str = "You extract the place a geospatial query is about. Reply with ONLY \
a JSON object:\n\
{\"location\": {\"name\": \"...\" or null, \"type\": \"city|state|country|region|landmark\", \
\"confidence\": 0.0-1.0}}\n\
Extract country, state, city, or landmark names. For routes (\"from A to B\"), return the \
primary endpoint. If the query names no place, set name to null.";

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedLocation {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LocationType,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LocationReply {
    location: LocationInner,
}

#[derive(Debug, Deserialize)]
struct LocationInner {
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<LocationType>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Location-extraction agent. `None` means "no spatial filter", which the
/// orchestrator may replace with a dropped pin.
pub struct LocationExtractor {
    gateway: Arc<LlmGateway>,
    deadline: Duration,
}

impl LocationExtractor {
    pub fn new(gateway: Arc<LlmGateway>, deadline: Duration) -> Self {
        LocationExtractor { gateway, deadline }
    }

    pub async fn extract(&self, query: &str) -> Option<ExtractedLocation> {
        let reply: Result<LocationReply, _> = self
            .gateway
            .complete_json(SYSTEM_PROMPT, query, 200, self.deadline)
            .await;
        match reply {
            Ok(r) => {
                let name = r.location.name?;
                if name.trim().is_empty() || name.eq_ignore_ascii_case("null") {
                    return None;
                }
                Some(ExtractedLocation {
                    name,
                    kind: r.location.kind.unwrap_or(LocationType::Region),
                    confidence: r.location.confidence.unwrap_or(0.6).clamp(0.0, 1.0),
                })
            }
            Err(e) => {
                tracing::warn!("location: model call failed ({e}), using heuristic");
                heuristic_extract(query)
            }
        }
    }
}

const PLACE_PREPOSITIONS: &[&str] = &["in", "of", "for", "near", "around", "over", "at"];

/// Grab the capitalized run after the last place preposition. Crude, but
/// it covers "show me imagery of <Place>" phrasings when the model is down.
pub fn heuristic_extract(query: &str) -> Option<ExtractedLocation> {
    let words: Vec<&str> = query.split_whitespace().collect();
    let mut best: Option<String> = None;

    for (i, word) in words.iter().enumerate() {
        let w = word.to_lowercase();
        if !PLACE_PREPOSITIONS.contains(&w.as_str()) {
            continue;
        }
        let mut run = Vec::new();
        for cand in words.iter().skip(i + 1) {
            let stripped: String = cand
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '\'')
                .collect();
            if stripped.chars().next().is_some_and(|c| c.is_uppercase()) {
                run.push(stripped);
            } else {
                break;
            }
        }
        if !run.is_empty() {
            best = Some(run.join(" "));
        }
    }

    best.map(|name| ExtractedLocation {
        name,
        kind: LocationType::Region,
        confidence: 0.4,
    })
}
