use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::llm::LlmGateway;
use crate::models::bbox::BBox;
use crate::models::stac::StacFeature;
use crate::registry::Registry;
use crate::spatial::request_coverage;

/// Scoring weights per dimension; always sums to 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub recency: f64,
    pub cloud_cover: f64,
    pub coverage: f64,
    pub quality_flags: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            recency: 40.0,
            cloud_cover: 30.0,
            coverage: 20.0,
            quality_flags: 10.0,
        }
    }
}

const RECENT_TERMS: &[&str] = &[
    "most recent", "latest", "newest", "right now", "up to date", "current",
];
const CLEAR_TERMS: &[&str] = &[
    "clear", "cloudless", "cloud-free", "no cloud", "low cloud", "clearest",
];
const RESOLUTION_TERMS: &[&str] = &[
    "high resolution", "high res", "highest resolution", "fine detail", "detailed",
];
const COVERAGE_TERMS: &[&str] = &[
    "full coverage", "complete coverage", "entire area", "whole region",
];

/// Remap weights from the query phrasing. First matching intent wins.
pub fn weights_for_query(query: &str) -> ScoreWeights {
    let q = query.to_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| q.contains(t));

    if has(RECENT_TERMS) {
        ScoreWeights { recency: 70.0, cloud_cover: 15.0, coverage: 10.0, quality_flags: 5.0 }
    } else if has(CLEAR_TERMS) {
        ScoreWeights { recency: 15.0, cloud_cover: 60.0, coverage: 15.0, quality_flags: 10.0 }
    } else if has(RESOLUTION_TERMS) {
        ScoreWeights { recency: 20.0, cloud_cover: 20.0, coverage: 10.0, quality_flags: 50.0 }
    } else if has(COVERAGE_TERMS) {
        ScoreWeights { recency: 20.0, cloud_cover: 15.0, coverage: 50.0, quality_flags: 15.0 }
    } else {
        ScoreWeights::default()
    }
}

/// Whether the phrasing asks for quality the rule path cannot judge
/// cheaply, pushing selection onto the model-ranked path.
pub fn is_quality_sensitive(query: &str) -> bool {
    let q = query.to_lowercase();
    [RECENT_TERMS, CLEAR_TERMS, RESOLUTION_TERMS, COVERAGE_TERMS]
        .iter()
        .any(|terms| terms.iter().any(|t| q.contains(t)))
        || q.contains("best")
        || q.contains("sharpest")
}

/// Per-dimension weighted scores; `total` is their sum, in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub recency: f64,
    pub cloud_cover: f64,
    pub coverage: f64,
    pub quality_flags: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredTile {
    pub feature: StacFeature,
    pub breakdown: ScoreBreakdown,
}

fn recency_raw(feature: &StacFeature, now: DateTime<Utc>) -> f64 {
    let Some(acquired) = feature.datetime() else {
        // No time axis (DEMs): neutral
        return 50.0;
    };
    let days = (now - acquired).num_days().max(0) as f64;
    if days <= 7.0 {
        100.0
    } else if days <= 30.0 {
        100.0 - ((days - 7.0) / 23.0) * 15.0
    } else if days <= 60.0 {
        85.0 - ((days - 30.0) / 30.0) * 25.0
    } else if days <= 180.0 {
        60.0 - ((days - 60.0) / 120.0) * 30.0
    } else {
        (30.0 - ((days - 180.0) / 180.0) * 30.0).max(0.0)
    }
}

fn cloud_raw(feature: &StacFeature) -> f64 {
    let Some(cover) = feature.cloud_cover() else {
        // SAR / DEM / thermal: cloud metadata does not exist, full score
        return 100.0;
    };
    if cover <= 5.0 {
        100.0
    } else if cover <= 10.0 {
        100.0 - ((cover - 5.0) / 5.0) * 20.0
    } else if cover <= 20.0 {
        80.0 - ((cover - 10.0) / 10.0) * 30.0
    } else if cover <= 50.0 {
        50.0 - ((cover - 20.0) / 30.0) * 35.0
    } else {
        (15.0 - ((cover - 50.0) / 50.0) * 15.0).max(0.0)
    }
}

fn coverage_raw(feature: &StacFeature, request: Option<&BBox>) -> f64 {
    let Some(request) = request else {
        return 100.0;
    };
    let Some(tile) = feature.bounds() else {
        return 50.0;
    };
    let overlap = request_coverage(request, &tile);
    if overlap >= 0.9 {
        100.0
    } else if overlap >= 0.5 {
        50.0 + ((overlap - 0.5) / 0.4) * 50.0
    } else if overlap >= 0.1 {
        25.0 + ((overlap - 0.1) / 0.4) * 25.0
    } else {
        overlap * 250.0
    }
}

fn quality_raw(feature: &StacFeature) -> f64 {
    if let Some(q) = feature.properties.get("landsat:quality").and_then(|v| v.as_str()) {
        return match q {
            "high" => 100.0,
            "medium" => 70.0,
            "low" => 30.0,
            _ => 50.0,
        };
    }
    if feature.properties.contains_key("s2:processing_baseline") {
        return 80.0;
    }
    if let Some(q) = feature.properties.get("quality").and_then(|v| v.as_f64()) {
        return q.clamp(0.0, 100.0);
    }
    50.0
}

pub fn score_feature(
    feature: &StacFeature,
    request: Option<&BBox>,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let recency = recency_raw(feature, now) / 100.0 * weights.recency;
    let cloud_cover = cloud_raw(feature) / 100.0 * weights.cloud_cover;
    let coverage = coverage_raw(feature, request) / 100.0 * weights.coverage;
    let quality_flags = quality_raw(feature) / 100.0 * weights.quality_flags;
    ScoreBreakdown {
        recency,
        cloud_cover,
        coverage,
        quality_flags,
        total: recency + cloud_cover + coverage + quality_flags,
    }
}

/// Area-aware cap on how many tiles the map gets, within [5, 50].
pub fn selection_budget(request: Option<&BBox>) -> usize {
    let Some(bbox) = request else {
        return 10;
    };
    let area = bbox.area_km2();
    let cap = if area < 100.0 {
        10
    } else if area < 1000.0 {
        20
    } else {
        50
    };
    cap.clamp(5, 50)
}

#[derive(Debug, Deserialize)]
struct SmartReply {
    selected: Vec<String>,
}

const SMART_SYSTEM: &str = "You rank satellite tiles for rendering. Reply with ONLY a JSON \
object {\"selected\": [\"tile-id\", ...]} listing the ids to show, best first, within the \
stated budget. Prefer the highest-resolution collection, a single acquisition time, strong \
overlap with the request box, and low cloud cover.";

/// Ranks candidates and picks a bounded, temporally-consistent set.
///
/// Two paths: a rule-based one and, for large or quality-sensitive
/// requests, a model-ranked preselection. Both funnel through the same
/// resolution / acquisition-hour / scoring pipeline, so the output
/// invariants hold regardless of path.
pub struct TileSelector {
    gateway: Arc<LlmGateway>,
    registry: Arc<Registry>,
    deadline: Duration,
}

impl TileSelector {
    pub fn new(gateway: Arc<LlmGateway>, registry: Arc<Registry>, deadline: Duration) -> Self {
        TileSelector {
            gateway,
            registry,
            deadline,
        }
    }

    pub async fn select(
        &self,
        candidates: Vec<StacFeature>,
        request: Option<BBox>,
        query: &str,
        now: DateTime<Utc>,
    ) -> Vec<ScoredTile> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let budget = selection_budget(request.as_ref());
        let fast_threshold = budget; // same area bands as the budget
        let use_smart =
            candidates.len() > fast_threshold || is_quality_sensitive(query);

        if use_smart {
            if let Some(subset) = self.smart_preselect(&candidates, request.as_ref(), budget).await
            {
                let picked = rule_select(&self.registry, subset, request.as_ref(), query, now, budget);
                if !picked.is_empty() {
                    return picked;
                }
                tracing::warn!("tile selector: model preselection produced nothing usable");
            }
        }

        rule_select(&self.registry, candidates, request.as_ref(), query, now, budget)
    }

    /// Ask the model to shortlist ids from a condensed summary. `None`
    /// means the call failed and the rule path should run on everything.
    async fn smart_preselect(
        &self,
        candidates: &[StacFeature],
        request: Option<&BBox>,
        budget: usize,
    ) -> Option<Vec<StacFeature>> {
        let summary = summarize_candidates(&self.registry, candidates, request, budget);
        let reply: Result<SmartReply, _> = self
            .gateway
            .complete_json(SMART_SYSTEM, &summary, 500, self.deadline)
            .await;
        match reply {
            Ok(r) => {
                let wanted: std::collections::HashSet<&str> =
                    r.selected.iter().map(String::as_str).collect();
                let subset: Vec<StacFeature> = candidates
                    .iter()
                    .filter(|f| wanted.contains(f.id.as_str()))
                    .cloned()
                    .collect();
                if subset.is_empty() {
                    tracing::warn!("tile selector: model named no known tile ids");
                    None
                } else {
                    Some(subset)
                }
            }
            Err(e) => {
                tracing::warn!("tile selector: smart path failed ({e}), using rules");
                None
            }
        }
    }
}

fn summarize_candidates(
    registry: &Registry,
    candidates: &[StacFeature],
    request: Option<&BBox>,
    budget: usize,
) -> String {
    let mut by_collection: HashMap<&str, Vec<&StacFeature>> = HashMap::new();
    for f in candidates {
        if let Some(c) = f.collection.as_deref() {
            by_collection.entry(c).or_default().push(f);
        }
    }

    let mut out = String::new();
    if let Some(b) = request {
        out.push_str(&format!("Request box area: {:.0} km²\n", b.area_km2()));
    }
    out.push_str(&format!("Tile budget: {budget}\n\nCandidates:\n"));
    for (collection, members) in &by_collection {
        let resolution = registry
            .get(collection)
            .map(|p| format!("{}m", p.resolution_meters))
            .unwrap_or_else(|_| "unknown".to_string());
        out.push_str(&format!("{collection} ({resolution}, {} tiles):\n", members.len()));
        for f in members.iter().take(25) {
            let when = f
                .properties
                .get("datetime")
                .and_then(|v| v.as_str())
                .unwrap_or("static");
            let clouds = f
                .cloud_cover()
                .map(|c| format!("{c:.0}% clouds"))
                .unwrap_or_else(|| "no cloud data".to_string());
            let overlap = match (request, f.bounds()) {
                (Some(r), Some(t)) => format!("{:.0}% of request", request_coverage(r, &t) * 100.0),
                _ => "n/a".to_string(),
            };
            out.push_str(&format!("  {} | {when} | {clouds} | {overlap}\n", f.id));
        }
    }
    out
}

/// The deterministic selection pipeline: resolution cut, acquisition-hour
/// grouping, weighted scoring, budget cap.
pub fn rule_select(
    registry: &Registry,
    candidates: Vec<StacFeature>,
    request: Option<&BBox>,
    query: &str,
    now: DateTime<Utc>,
    budget: usize,
) -> Vec<ScoredTile> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let weights = weights_for_query(query);

    // Priority 1: only the sharpest collection(s), within 1.2x of best
    let resolution_of = |f: &StacFeature| -> f64 {
        f.collection
            .as_deref()
            .and_then(|c| registry.get(c).ok())
            .map(|p| p.resolution_meters)
            .unwrap_or(f64::MAX)
    };
    let best_resolution = candidates.iter().map(|f| resolution_of(f)).fold(f64::MAX, f64::min);
    let sharp: Vec<StacFeature> = if best_resolution.is_finite() {
        candidates
            .iter()
            .filter(|f| resolution_of(f) <= best_resolution * 1.2)
            .cloned()
            .collect()
    } else {
        candidates.clone()
    };

    // Priority 2: one acquisition hour. Most recent group that still
    // covers the request comparably to the best group wins.
    let picked = pick_acquisition_group(&sharp, request);
    let pool = if picked.is_empty() { sharp } else { picked };

    let mut scored: Vec<ScoredTile> = pool
        .into_iter()
        .map(|feature| {
            let breakdown = score_feature(&feature, request, &weights, now);
            ScoredTile { feature, breakdown }
        })
        .collect();
    scored.sort_by(|a, b| b.breakdown.total.total_cmp(&a.breakdown.total));
    scored.truncate(budget);

    if scored.is_empty() {
        // Last resort: score the original pool without the cuts
        let mut all: Vec<ScoredTile> = candidates
            .into_iter()
            .map(|feature| {
                let breakdown = score_feature(&feature, request, &weights, now);
                ScoredTile { feature, breakdown }
            })
            .collect();
        all.sort_by(|a, b| b.breakdown.total.total_cmp(&a.breakdown.total));
        all.truncate(budget);
        return all;
    }
    scored
}

fn acquisition_hour(feature: &StacFeature) -> String {
    feature
        .datetime()
        .map(|d| d.format("%Y-%m-%dT%H").to_string())
        .unwrap_or_else(|| "static".to_string())
}

fn pick_acquisition_group(features: &[StacFeature], request: Option<&BBox>) -> Vec<StacFeature> {
    let mut groups: HashMap<String, Vec<&StacFeature>> = HashMap::new();
    for f in features {
        groups.entry(acquisition_hour(f)).or_default().push(f);
    }
    if groups.is_empty() {
        return Vec::new();
    }

    let group_coverage = |members: &[&StacFeature]| -> f64 {
        let Some(request) = request else {
            return 1.0;
        };
        members
            .iter()
            .filter_map(|f| f.bounds())
            .map(|tile| request_coverage(request, &tile))
            .sum::<f64>()
            .min(1.0)
    };

    let best_coverage = groups
        .values()
        .map(|m| group_coverage(m))
        .fold(0.0_f64, f64::max);

    // Newest first; "static" sorts after every timestamp on purpose only
    // when real timestamps exist
    let mut keys: Vec<&String> = groups.keys().collect();
    keys.sort_by(|a, b| {
        match (a.as_str() == "static", b.as_str() == "static") {
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            _ => b.cmp(a),
        }
    });

    for key in keys {
        let members = &groups[key];
        if group_coverage(members) >= best_coverage * 0.8 {
            return members.iter().map(|f| (*f).clone()).collect();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing;

    fn now() -> DateTime<Utc> {
        "2025-10-15T12:00:00Z".parse().unwrap()
    }

    fn feature(id: &str, collection: &str, bbox: [f64; 4], props: serde_json::Value) -> StacFeature {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "collection": collection,
            "bbox": bbox,
            "properties": props
        }))
        .unwrap()
    }

    fn s2(id: &str, datetime: &str, clouds: f64) -> StacFeature {
        feature(
            id,
            "sentinel-2-l2a",
            [0.0, 0.0, 1.0, 1.0],
            serde_json::json!({"datetime": datetime, "eo:cloud_cover": clouds}),
        )
    }

    #[test]
    fn default_weights_sum_to_100() {
        for q in ["show me Seattle", "latest imagery", "clear skies", "high resolution", "full coverage"] {
            let w = weights_for_query(q);
            assert!((w.recency + w.cloud_cover + w.coverage + w.quality_flags - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn recency_phrasing_remaps_weights() {
        let w = weights_for_query("most recent imagery of Houston");
        assert_eq!(w.recency, 70.0);
        let w = weights_for_query("clearest view of the coast");
        assert_eq!(w.cloud_cover, 60.0);
    }

    #[test]
    fn score_total_is_sum_and_bounded() {
        let f = s2("a", "2025-10-14T10:00:00Z", 2.0);
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let b = score_feature(&f, Some(&request), &ScoreWeights::default(), now());
        let sum = b.recency + b.cloud_cover + b.coverage + b.quality_flags;
        assert!((b.total - sum).abs() < 1e-9);
        assert!(b.total <= 100.0 && b.total >= 0.0);
        // Fresh, clear, fully covering: near-perfect score
        assert!(b.total > 90.0);
    }

    #[test]
    fn recency_curve_breakpoints() {
        let fresh = s2("f", "2025-10-12T00:00:00Z", 0.0);
        let month = s2("m", "2025-09-20T00:00:00Z", 0.0);
        let stale = s2("s", "2024-01-01T00:00:00Z", 0.0);
        assert_eq!(recency_raw(&fresh, now()), 100.0);
        let m = recency_raw(&month, now());
        assert!(m > 85.0 && m < 100.0);
        assert!(recency_raw(&stale, now()) < 10.0);
    }

    #[test]
    fn missing_cloud_metadata_scores_full() {
        let sar = feature(
            "sar",
            "sentinel-1-grd",
            [0.0, 0.0, 1.0, 1.0],
            serde_json::json!({"datetime": "2025-10-14T10:00:00Z"}),
        );
        assert_eq!(cloud_raw(&sar), 100.0);
    }

    #[test]
    fn landsat_quality_flags_map() {
        let high = feature(
            "h",
            "landsat-c2-l2",
            [0.0, 0.0, 1.0, 1.0],
            serde_json::json!({"landsat:quality": "high"}),
        );
        let low = feature(
            "l",
            "landsat-c2-l2",
            [0.0, 0.0, 1.0, 1.0],
            serde_json::json!({"landsat:quality": "low"}),
        );
        assert_eq!(quality_raw(&high), 100.0);
        assert_eq!(quality_raw(&low), 30.0);
    }

    #[test]
    fn budget_scales_with_area() {
        let tiny = BBox::new(0.0, 0.0, 0.05, 0.05).unwrap();
        let mid = BBox::new(0.0, 0.0, 0.2, 0.2).unwrap();
        let huge = BBox::new(0.0, 0.0, 5.0, 5.0).unwrap();
        assert_eq!(selection_budget(Some(&tiny)), 10);
        assert_eq!(selection_budget(Some(&mid)), 20);
        assert_eq!(selection_budget(Some(&huge)), 50);
        assert_eq!(selection_budget(None), 10);
    }

    #[test]
    fn selection_prefers_highest_resolution_collection() {
        let registry = Registry::new();
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mut candidates = vec![
            s2("s2-new", "2025-10-14T10:00:00Z", 3.0),
            s2("s2-new-2", "2025-10-14T10:30:00Z", 5.0),
        ];
        // Landsat at 30m loses to Sentinel-2 at 10m even when fresher
        candidates.push(feature(
            "landsat-fresh",
            "landsat-c2-l2",
            [0.0, 0.0, 1.0, 1.0],
            serde_json::json!({"datetime": "2025-10-15T10:00:00Z", "eo:cloud_cover": 0.0}),
        ));
        let picked = rule_select(&registry, candidates, Some(&request), "", now(), 10);
        assert!(!picked.is_empty());
        for tile in &picked {
            assert_eq!(tile.feature.collection.as_deref(), Some("sentinel-2-l2a"));
        }
    }

    #[test]
    fn selection_never_mixes_acquisition_hours() {
        let registry = Registry::new();
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let candidates = vec![
            s2("hour-a-1", "2025-10-14T10:05:00Z", 3.0),
            s2("hour-a-2", "2025-10-14T10:40:00Z", 8.0),
            s2("hour-b-1", "2025-10-01T09:10:00Z", 1.0),
            s2("hour-b-2", "2025-10-01T09:50:00Z", 2.0),
        ];
        let picked = rule_select(&registry, candidates, Some(&request), "", now(), 10);
        let hours: std::collections::HashSet<String> = picked
            .iter()
            .map(|t| acquisition_hour(&t.feature))
            .collect();
        assert_eq!(hours.len(), 1);
        // The most recent hour with comparable coverage wins
        assert!(hours.contains("2025-10-14T10"));
    }

    #[test]
    fn single_candidate_still_selected() {
        let registry = Registry::new();
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let picked = rule_select(
            &registry,
            vec![s2("only", "2025-10-14T10:00:00Z", 3.0)],
            Some(&request),
            "",
            now(),
            10,
        );
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn dem_tiles_rank_by_coverage_only_group() {
        let registry = Registry::new();
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let candidates = vec![
            feature(
                "dem-full",
                "cop-dem-glo-30",
                [0.0, 0.0, 1.0, 1.0],
                serde_json::json!({}),
            ),
            feature(
                "dem-corner",
                "cop-dem-glo-30",
                [0.9, 0.9, 1.9, 1.9],
                serde_json::json!({}),
            ),
        ];
        let picked = rule_select(&registry, candidates, Some(&request), "", now(), 10);
        assert_eq!(picked[0].feature.id, "dem-full");
        assert!(picked[0].breakdown.total > picked[1].breakdown.total);
    }

    #[tokio::test]
    async fn smart_path_subsets_then_rules_apply() {
        let gw = Arc::new(testing::gateway_with(vec![
            r#"{"selected": ["hour-a-1", "hour-a-2"]}"#,
        ]));
        let selector = TileSelector::new(gw, Arc::new(Registry::new()), Duration::from_secs(5));
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let candidates = vec![
            s2("hour-a-1", "2025-10-14T10:05:00Z", 3.0),
            s2("hour-a-2", "2025-10-14T10:40:00Z", 8.0),
            s2("hour-b-1", "2025-10-01T09:10:00Z", 1.0),
        ];
        // "clearest" makes the request quality-sensitive => smart path
        let picked = selector
            .select(candidates, Some(request), "clearest view", now())
            .await;
        let ids: Vec<&str> = picked.iter().map(|t| t.feature.id.as_str()).collect();
        assert!(ids.contains(&"hour-a-1"));
        assert!(!ids.contains(&"hour-b-1"));
    }

    #[tokio::test]
    async fn smart_path_failure_falls_back_to_rules() {
        let gw = Arc::new(testing::failing_gateway());
        let selector = TileSelector::new(gw, Arc::new(Registry::new()), Duration::from_secs(5));
        let request = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let picked = selector
            .select(
                vec![s2("only", "2025-10-14T10:00:00Z", 3.0)],
                Some(request),
                "best quality imagery",
                now(),
            )
            .await;
        assert_eq!(picked.len(), 1);
    }

    #[tokio::test]
    async fn empty_candidates_yield_empty_selection() {
        let gw = Arc::new(testing::failing_gateway());
        let selector = TileSelector::new(gw, Arc::new(Registry::new()), Duration::from_secs(5));
        let picked = selector.select(vec![], None, "anything", now()).await;
        assert!(picked.is_empty());
    }
}
