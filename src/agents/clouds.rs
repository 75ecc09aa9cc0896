use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::llm::LlmGateway;
use crate::registry::Registry;

const SYSTEM_PROMPT: &str = "You detect EXPLICIT cloud-cover requirements in satellite-imagery \
queries. Reply with ONLY a JSON object {\"cloud_intent\": \"low|medium|high|none\", \
\"threshold_percent\": number or null, \"reasoning\": \"...\"}.\n\
Only explicit mentions count: \"clear skies\", \"cloud-free\", \"low clouds\" => low; \"some \
clouds ok\", \"moderate clouds\" => medium; \"any cloud cover\", \"don't care about clouds\" => \
high. When the user names an exact number (\"cloud cover < 10%\", \"under 15% clouds\"), set \
threshold_percent to that number; otherwise leave it null. Never infer a preference from \
urgency, disaster type, or analysis depth; with no explicit mention, return \"none\".";

/// How cloudy the user is willing to go. Bucket thresholds: low 25,
/// medium 50, high 75.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudIntent {
    Low,
    Medium,
    High,
    None,
}

impl CloudIntent {
    pub fn threshold_percent(&self) -> Option<u8> {
        match self {
            CloudIntent::Low => Some(25),
            CloudIntent::Medium => Some(50),
            CloudIntent::High => Some(75),
            CloudIntent::None => None,
        }
    }

    fn for_threshold(threshold: u8) -> CloudIntent {
        if threshold <= 25 {
            CloudIntent::Low
        } else if threshold <= 50 {
            CloudIntent::Medium
        } else {
            CloudIntent::High
        }
    }
}

/// What the agent concluded: a coarse bucket, plus the exact percentage
/// when the user named one ("cloud cover < 10%"). The exact number wins
/// over the bucket mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudDetection {
    pub intent: CloudIntent,
    pub threshold_percent: Option<u8>,
}

impl CloudDetection {
    pub fn none() -> Self {
        CloudDetection {
            intent: CloudIntent::None,
            threshold_percent: None,
        }
    }

    pub fn from_intent(intent: CloudIntent) -> Self {
        CloudDetection {
            intent,
            threshold_percent: None,
        }
    }

    /// The ceiling to filter by: the explicit number when given, the
    /// bucket value otherwise.
    pub fn effective_threshold(&self) -> Option<u8> {
        self.threshold_percent.or_else(|| self.intent.threshold_percent())
    }
}

#[derive(Debug, Deserialize)]
struct CloudReply {
    cloud_intent: CloudIntent,
    #[serde(default)]
    threshold_percent: Option<u8>,
    #[allow(dead_code)]
    reasoning: Option<String>,
}

/// A concrete cloud filter ready to drop into a STAC `query` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudFilter {
    pub property_name: String,
    pub threshold_percent: u8,
    pub applicable_collection_ids: Vec<String>,
}

/// Result of marrying a detected intent with the selected collections.
#[derive(Debug, Clone, Default)]
pub struct CloudFilterOutcome {
    pub filter: Option<CloudFilter>,
    pub warning: Option<String>,
}

/// Cloud-filter agent: detects explicit intent only; the mapping onto
/// collections happens after the parallel join, once the collection set
/// is known.
pub struct CloudFilterAgent {
    gateway: Arc<LlmGateway>,
    deadline: Duration,
}

impl CloudFilterAgent {
    pub fn new(gateway: Arc<LlmGateway>, deadline: Duration) -> Self {
        CloudFilterAgent { gateway, deadline }
    }

    pub async fn detect(&self, query: &str) -> CloudDetection {
        let reply: Result<CloudReply, _> = self
            .gateway
            .complete_json(SYSTEM_PROMPT, query, 200, self.deadline)
            .await;
        match reply {
            Ok(r) => {
                let threshold = r.threshold_percent.filter(|t| *t <= 100);
                let intent = match (r.cloud_intent, threshold) {
                    // A bare number still pins down the bucket
                    (CloudIntent::None, Some(t)) => CloudIntent::for_threshold(t),
                    (intent, _) => intent,
                };
                CloudDetection {
                    intent,
                    threshold_percent: threshold,
                }
            }
            Err(e) => {
                tracing::warn!("clouds: model call failed ({e}), using keyword detection");
                rule_based(query)
            }
        }
    }
}

/// An exact percentage next to a cloud mention, e.g. "cloud cover < 10%"
/// or "under 15% clouds".
fn explicit_percent(q: &str) -> Option<u8> {
    if !q.contains("cloud") {
        return None;
    }
    let re = Regex::new(r"<?\s*(\d{1,3})\s*%").unwrap();
    let value: u32 = re.captures(q)?.get(1)?.as_str().parse().ok()?;
    (value <= 100).then_some(value as u8)
}

/// Keyword detection of explicit mentions, mirroring the prompt.
pub fn rule_based(query: &str) -> CloudDetection {
    let q = query.to_lowercase();
    let low = [
        "clear", "cloudless", "cloud-free", "cloud free", "no cloud", "low cloud",
        "minimal cloud", "without clouds",
    ];
    let medium = ["some clouds", "moderate cloud", "partly cloudy"];
    let high = ["any cloud", "don't care about cloud", "cloudy is fine", "with clouds"];

    let threshold = explicit_percent(&q);
    let intent = if low.iter().any(|m| q.contains(m)) {
        CloudIntent::Low
    } else if medium.iter().any(|m| q.contains(m)) {
        CloudIntent::Medium
    } else if high.iter().any(|m| q.contains(m)) {
        CloudIntent::High
    } else if let Some(t) = threshold {
        CloudIntent::for_threshold(t)
    } else {
        CloudIntent::None
    };

    CloudDetection {
        intent,
        threshold_percent: threshold,
    }
}

/// Apply a detection to the selected collections. If none of them
/// carries cloud metadata, the threshold cannot be honoured and a
/// user-visible warning is produced instead of a filter.
pub fn apply_to_collections(
    detection: CloudDetection,
    collections: &[String],
    registry: &Registry,
) -> CloudFilterOutcome {
    let Some(threshold) = detection.effective_threshold() else {
        return CloudFilterOutcome::default();
    };

    let applicable: Vec<String> = collections
        .iter()
        .filter(|id| registry.supports_cloud_filtering(id))
        .cloned()
        .collect();

    if applicable.is_empty() {
        let names = collections.join(", ");
        return CloudFilterOutcome {
            filter: None,
            warning: Some(format!(
                "Note: the selected collections ({names}) carry no cloud-cover metadata, so \
                 the cloud filter is not applicable and was skipped."
            )),
        };
    }

    // Property name comes from the first applicable profile; collections
    // without a registry entry for it are never guessed at.
    let property_name = applicable
        .iter()
        .find_map(|id| registry.cloud_cover_property(id))
        .map(str::to_string);

    match property_name {
        Some(property_name) => CloudFilterOutcome {
            filter: Some(CloudFilter {
                property_name,
                threshold_percent: threshold,
                applicable_collection_ids: applicable,
            }),
            warning: None,
        },
        None => CloudFilterOutcome::default(),
    }
}
