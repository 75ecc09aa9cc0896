use serde::{Deserialize, Serialize};

/// The four-way intent taxonomy. `Vision` means "analyze what is on the
/// screen" (no STAC call), `Stac` a pure data request, `Hybrid` both data
/// and analysis, `Contextual` knowledge-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Vision,
    Stac,
    Hybrid,
    Contextual,
}

impl IntentKind {
    pub fn needs_satellite_data(&self) -> bool {
        matches!(self, IntentKind::Stac | IntentKind::Hybrid)
    }

    pub fn needs_vision_analysis(&self) -> bool {
        matches!(self, IntentKind::Vision)
    }

    pub fn needs_contextual_info(&self) -> bool {
        matches!(self, IntentKind::Contextual | IntentKind::Hybrid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f64,
    pub reasoning: String,
}

impl Intent {
    pub fn new(kind: IntentKind, confidence: f64, reasoning: impl Into<String>) -> Self {
        Intent {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
        }
    }
}
