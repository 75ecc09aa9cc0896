use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::llm::LlmGateway;
use crate::models::response::{RelaxationRecord, TranslationMetadata};
use crate::registry::{Category, Registry};
use crate::tile_selector::ScoredTile;

const BRIEF_SYSTEM: &str = "You describe a satellite dataset that was just rendered on a map. \
Write one or two factual sentences: feature count, collection, data type, location, date range, \
and cloud cover if relevant. No subjective quality adjectives, no markdown, no surrounding \
quotes.";

const DETAILED_SYSTEM: &str = "You are an Earth-science analyst. Write one to three clear \
paragraphs answering the user's question with established Earth science. If the context \
includes analysis metrics, weave the specific numbers into the narrative. Do not refer to \"the \
map\" unless the context says imagery was rendered. Plain prose, no markdown headings.";

const EMPTY_SYSTEM: &str = "A satellite-imagery search came back empty even after relaxing \
filters. Using the diagnostic counts provided, write two to three short paragraphs explaining \
what was searched and why nothing qualified, followed by 2-4 bulleted suggestions (widen the \
date range, relax cloud limits, try a nearby or better-known location).";

/// Counts the pipeline gathered along the way, for failure explanations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    pub raw_count: usize,
    pub spatial_filtered_count: usize,
    pub final_count: usize,
    pub failure_stage: &'static str,
}

/// Builds the user-facing message for every terminal state of a turn.
pub struct Composer {
    gateway: Arc<LlmGateway>,
    registry: Arc<Registry>,
    deadline: Duration,
}

impl Composer {
    pub fn new(gateway: Arc<LlmGateway>, registry: Arc<Registry>, deadline: Duration) -> Self {
        Composer {
            gateway,
            registry,
            deadline,
        }
    }

    /// Brief data description for a rendered result. Relaxation
    /// acknowledgement and cloud warnings are prepended outside the model
    /// call so they always survive verbatim.
    pub async fn brief(
        &self,
        query: &str,
        tiles: &[ScoredTile],
        metadata: &TranslationMetadata,
        location_name: Option<&str>,
        cloud_warning: Option<&str>,
        relaxation: Option<&RelaxationRecord>,
    ) -> String {
        let body = match self
            .gateway
            .complete_text(
                BRIEF_SYSTEM,
                &self.data_prompt(query, tiles, metadata, location_name),
                300,
                self.deadline,
            )
            .await
        {
            Ok(text) => sanitize_brief(&text),
            Err(e) => {
                tracing::warn!("composer: brief generation failed ({e}), using template");
                self.fallback_brief(tiles, metadata, location_name)
            }
        };
        assemble(relaxation, cloud_warning, &body)
    }

    /// Detailed Earth-science analysis, optionally enriched with GEOINT
    /// metrics supplied by external analysis modules.
    pub async fn detailed(
        &self,
        query: &str,
        history: &str,
        geoint_metrics: Option<&serde_json::Value>,
        map_rendered: bool,
    ) -> String {
        let mut prompt = String::new();
        if !history.is_empty() {
            prompt.push_str(&format!("Conversation so far:\n{history}\n\n"));
        }
        prompt.push_str(&format!(
            "Imagery rendered this turn: {}\n",
            if map_rendered { "yes" } else { "no" }
        ));
        if let Some(metrics) = geoint_metrics {
            prompt.push_str(&format!("Analysis metrics:\n{metrics}\n"));
        }
        prompt.push_str(&format!("\nQuestion: {query}"));

        match self
            .gateway
            .complete_text(DETAILED_SYSTEM, &prompt, 900, self.deadline)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("composer: detailed generation failed ({e}), using template");
                fallback_detailed(query, geoint_metrics)
            }
        }
    }

    /// Brief data description followed by analysis, for hybrid intents.
    #[allow(clippy::too_many_arguments)]
    pub async fn hybrid(
        &self,
        query: &str,
        tiles: &[ScoredTile],
        metadata: &TranslationMetadata,
        location_name: Option<&str>,
        cloud_warning: Option<&str>,
        relaxation: Option<&RelaxationRecord>,
        history: &str,
    ) -> String {
        let brief = self
            .brief(query, tiles, metadata, location_name, cloud_warning, relaxation)
            .await;
        let detailed = self.detailed(query, history, None, true).await;
        format!("{brief}\n\n{detailed}")
    }

    /// Empty result after negotiation: explain and suggest.
    pub async fn empty_result(&self, query: &str, diag: &Diagnostics) -> String {
        let prompt = format!(
            "Query: {query}\nFeatures returned by the search: {}\nAfter spatial filtering: {}\n\
             After selection: {}\nStage that produced nothing: {}",
            diag.raw_count, diag.spatial_filtered_count, diag.final_count, diag.failure_stage
        );
        match self
            .gateway
            .complete_text(EMPTY_SYSTEM, &prompt, 700, self.deadline)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("composer: empty-result generation failed ({e}), using template");
                fallback_empty(query, diag)
            }
        }
    }

    /// Terse, actionable messages for hard errors. No LLM involvement so
    /// failures stay explainable.
    pub fn error_message(&self, err: &PipelineError) -> String {
        match err {
            PipelineError::EmptyInput => {
                "The query is empty. Ask for a place, a dataset, or both — for example \
                 \"Show me Sentinel-2 imagery of Seattle\"."
                    .to_string()
            }
            PipelineError::UnresolvedLocation(place) => format!(
                "The location \"{place}\" could not be resolved to a map area. Try a \
                 better-known place name, or add a state or country for context."
            ),
            PipelineError::DeadlineExceeded => {
                "The request took too long and was cancelled. Try again, or narrow the area \
                 and time range."
                    .to_string()
            }
            PipelineError::StacUpstream(detail) => format!(
                "The imagery catalog did not respond ({detail}). The search can be retried in \
                 a moment."
            ),
            PipelineError::UnknownCollection(id) => format!(
                "The data collection \"{id}\" is not available in this catalog."
            ),
            PipelineError::MalformedQuery(detail) => format!(
                "The search request could not be assembled ({detail}). This is a bug on our \
                 side, not a problem with the question."
            ),
            PipelineError::Llm(e) => format!(
                "The language model backing this assistant is unavailable ({e}). Try again \
                 shortly."
            ),
        }
    }

    fn data_prompt(
        &self,
        query: &str,
        tiles: &[ScoredTile],
        metadata: &TranslationMetadata,
        location_name: Option<&str>,
    ) -> String {
        let mut out = format!("User asked: {query}\n");
        out.push_str(&format!("Tiles rendered: {}\n", tiles.len()));
        out.push_str(&format!(
            "Collections: {}\n",
            describe_collections(&self.registry, &metadata.collections)
        ));
        if let Some(place) = location_name {
            out.push_str(&format!("Location: {place}\n"));
        }
        if let Some(dt) = &metadata.datetime {
            out.push_str(&format!("Date range searched: {dt}\n"));
        }
        if let Some(cf) = &metadata.cloud_filter {
            out.push_str(&format!(
                "Cloud filter applied: {} < {}%\n",
                cf.property, cf.threshold_percent
            ));
        }
        if let Some((before, after)) = &metadata.comparison_datetime {
            out.push_str(&format!("Comparison periods: {before} vs {after}\n"));
        }
        out
    }

    fn fallback_brief(
        &self,
        tiles: &[ScoredTile],
        metadata: &TranslationMetadata,
        location_name: Option<&str>,
    ) -> String {
        let what = category_phrase(&self.registry, &metadata.collections);
        let place = location_name
            .map(|p| format!(" over {p}"))
            .unwrap_or_default();
        let when = metadata
            .datetime
            .as_deref()
            .map(|d| format!(" from {}", d.replace('/', " to ")))
            .unwrap_or_default();
        format!("Showing {} {what} tile(s){place}{when}.", tiles.len())
    }
}

/// Relaxation note, then warning, then the body — transparency first.
fn assemble(relaxation: Option<&RelaxationRecord>, warning: Option<&str>, body: &str) -> String {
    let mut parts = Vec::new();
    if let Some(r) = relaxation {
        parts.push(r.explanation.clone());
    }
    if let Some(w) = warning {
        parts.push(w.to_string());
    }
    parts.push(body.to_string());
    parts.join(" ")
}

/// The brief template is strict: no wrapping quotes, no markdown.
fn sanitize_brief(text: &str) -> String {
    let t = text.trim();
    let t = t.strip_prefix('"').unwrap_or(t);
    let t = t.strip_suffix('"').unwrap_or(t);
    t.trim().to_string()
}

fn describe_collections(registry: &Registry, ids: &[String]) -> String {
    ids.iter()
        .map(|id| {
            registry
                .get(id)
                .map(|p| format!("{} ({})", p.name, p.id))
                .unwrap_or_else(|_| id.clone())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pick the noun for the dataset from its dominant category.
fn category_phrase(registry: &Registry, ids: &[String]) -> &'static str {
    let category = ids.iter().find_map(|id| registry.get(id).ok()).map(|p| p.category);
    match category {
        Some(Category::Elevation) => "elevation",
        Some(Category::Radar) => "radar",
        Some(Category::Fire) => "fire-detection",
        Some(Category::Vegetation) => "vegetation",
        Some(Category::Snow) => "snow-cover",
        Some(Category::Climate) => "climate",
        Some(Category::LandCover) => "land-cover",
        Some(Category::AirQuality) => "air-quality",
        _ => "satellite imagery",
    }
}

fn fallback_detailed(query: &str, geoint_metrics: Option<&serde_json::Value>) -> String {
    let mut out = format!(
        "That question calls for more context than is available right now: the analysis \
         service could not be reached. What can be said is limited to the search itself, so \
         here is the short version while the full answer is unavailable.\n\nThe question \
         \"{query}\" touches on Earth-science processes that are best explained with current \
         data at hand. Re-asking in a moment should produce the full explanation."
    );
    if let Some(metrics) = geoint_metrics {
        out.push_str(&format!(
            "\n\nMeasured values from the most recent analysis: {metrics}"
        ));
    }
    out
}

fn fallback_empty(query: &str, diag: &Diagnostics) -> String {
    format!(
        "No suitable imagery was found for \"{query}\". The catalog returned {} candidate \
         tile(s); {} survived the spatial match against the requested area, and {} met the \
         quality requirements — even after relaxing the filters.\n\nSuggestions:\n\
         - Widen the date range, or drop the date entirely.\n\
         - Relax or remove the cloud-cover limit.\n\
         - Try a nearby or better-known location name.\n\
         - Ask for a different dataset over the same area.",
        diag.raw_count, diag.spatial_filtered_count, diag.final_count
    )
}
