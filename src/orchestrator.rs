use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::agents::clouds::{self, CloudFilterAgent, CloudFilterOutcome};
use crate::agents::collections::CollectionMapper;
use crate::agents::datetime::{DatetimeResult, DatetimeTranslator};
use crate::agents::intent::IntentClassifier;
use crate::agents::location::LocationExtractor;
use crate::composer::{Composer, Diagnostics};
use crate::config::TerraConfig;
use crate::context::ConversationStore;
use crate::error::PipelineError;
use crate::geocode::LocationResolver;
use crate::models::bbox::BBox;
use crate::models::intent::{Intent, IntentKind};
use crate::models::response::{
    CloudFilterEcho, MapData, QueryType, RelaxationRecord, Response, TranslationMetadata,
};
use crate::models::stac::StacQuery;
use crate::negotiator::relaxation_ladder;
use crate::query_builder::build_query;
use crate::registry::Registry;
use crate::spatial::filter_by_overlap;
use crate::stac_client::StacSearch;
use crate::tile_selector::{ScoredTile, TileSelector};

/// A user-dropped coordinate. Ignored as soon as the query text names a
/// place of its own.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pin {
    pub lat: f64,
    pub lng: f64,
}

/// The pipeline head: owns every component and drives one turn at a time
/// per session.
pub struct Orchestrator {
    registry: Arc<Registry>,
    intent: IntentClassifier,
    collections: CollectionMapper,
    location: LocationExtractor,
    datetime: DatetimeTranslator,
    clouds: CloudFilterAgent,
    resolver: LocationResolver,
    stac: Box<dyn StacSearch>,
    selector: TileSelector,
    composer: Composer,
    store: ConversationStore,
    config: TerraConfig,
}

/// Everything the data path produced for one turn.
struct DataOutcome {
    tiles: Vec<ScoredTile>,
    stac_query: StacQuery,
    bbox: Option<BBox>,
    location_name: Option<String>,
    cloud_warning: Option<String>,
    relaxation: Option<RelaxationRecord>,
    metadata: TranslationMetadata,
    diagnostics: Diagnostics,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        intent: IntentClassifier,
        collections: CollectionMapper,
        location: LocationExtractor,
        datetime: DatetimeTranslator,
        clouds: CloudFilterAgent,
        resolver: LocationResolver,
        stac: Box<dyn StacSearch>,
        selector: TileSelector,
        composer: Composer,
        config: TerraConfig,
    ) -> Self {
        Orchestrator {
            registry,
            intent,
            collections,
            location,
            datetime,
            clouds,
            resolver,
            stac,
            selector,
            composer,
            store: ConversationStore::new(),
            config,
        }
    }

    pub fn reset(&self, session_id: &str) -> bool {
        self.store.reset(session_id)
    }

    /// One conversational turn. Serial per session, parallel across
    /// sessions; the whole turn runs under a single deadline.
    pub async fn translate_query(
        &self,
        session_id: &str,
        query: &str,
        pin: Option<Pin>,
    ) -> Response {
        let query = query.trim();
        if query.is_empty() {
            let err = PipelineError::EmptyInput;
            return self.error_response(&err, Intent::new(IntentKind::Contextual, 0.0, "empty input"));
        }

        let turn_id = uuid::Uuid::new_v4();
        tracing::info!("orchestrator: turn {turn_id} start (session {session_id})");

        let session = self.store.session(session_id);
        let mut ctx = session.lock().await;

        let turn = self.config.timeouts.turn();
        match tokio::time::timeout(turn, self.run_turn(query, pin, &ctx)).await {
            Ok(response) => {
                if response.success {
                    let rendered_bbox = response.data.as_ref().map(|d| d.bbox);
                    let collections = response.translation_metadata.collections.clone();
                    ctx.record_exchange(query, &response.message, Utc::now());
                    ctx.record_map_state(rendered_bbox, &collections);
                }
                response
            }
            Err(_) => {
                tracing::error!("orchestrator: turn deadline exceeded for session {session_id}");
                self.error_response(
                    &PipelineError::DeadlineExceeded,
                    Intent::new(IntentKind::Contextual, 0.0, "deadline exceeded"),
                )
            }
        }
    }

    async fn run_turn(
        &self,
        query: &str,
        pin: Option<Pin>,
        ctx: &crate::context::ConversationContext,
    ) -> Response {
        let intent = self.intent.classify(query).await;
        tracing::info!(
            "orchestrator: intent {:?} (confidence {:.2})",
            intent.kind,
            intent.confidence
        );

        match intent.kind {
            IntentKind::Contextual => {
                let history = ctx.recent_history(5);
                let message = self
                    .composer
                    .detailed(query, &history, None, ctx.has_rendered_map)
                    .await;
                Response {
                    success: true,
                    message,
                    query_type: QueryType::Contextual,
                    data: None,
                    classification: intent,
                    showing_alternatives: None,
                    original_filters: None,
                    alternative_filters: None,
                    translation_metadata: TranslationMetadata::empty(),
                }
            }
            IntentKind::Vision => {
                // The screenshot itself is supplied and analyzed by the
                // external vision modules; this side only narrates.
                let history = ctx.recent_history(5);
                let message = self.composer.detailed(query, &history, None, true).await;
                Response {
                    success: true,
                    message,
                    query_type: QueryType::Vision,
                    data: None,
                    classification: intent,
                    showing_alternatives: None,
                    original_filters: None,
                    alternative_filters: None,
                    translation_metadata: TranslationMetadata::empty(),
                }
            }
            IntentKind::Stac | IntentKind::Hybrid => {
                match self.run_data_pipeline(query, pin, ctx).await {
                    Ok(outcome) => self.data_response(query, intent, outcome, ctx).await,
                    Err(err) => {
                        tracing::warn!("orchestrator: data pipeline failed: {err}");
                        self.error_response(&err, intent)
                    }
                }
            }
        }
    }

    /// Agent fan-out, query assembly, search, filter, and selection,
    /// with one negotiation loop on an empty result.
    async fn run_data_pipeline(
        &self,
        query: &str,
        pin: Option<Pin>,
        ctx: &crate::context::ConversationContext,
    ) -> Result<DataOutcome, PipelineError> {
        let now = Utc::now();
        let today = now.date_naive();

        // Independent agents run concurrently; each degrades to its own
        // rule-based fallback internally, so the join never fails.
        let (collections, extracted, datetime, cloud_detection) = tokio::join!(
            self.collections.map(query),
            self.location.extract(query),
            self.datetime.translate(query, today),
            self.clouds.detect(query),
        );

        let cloud_outcome =
            clouds::apply_to_collections(cloud_detection, &collections, &self.registry);

        // Spatial focus: query text wins, then the dropped pin, then
        // whatever the map already shows
        let (bbox, location_name) = if let Some(loc) = &extracted {
            let resolved = self.resolver.resolve(&loc.name, loc.kind).await?;
            (Some(resolved), Some(loc.name.clone()))
        } else if let Some(pin) = pin {
            let around = BBox::around_point(pin.lat, pin.lng, self.config.filters.pin_radius_miles);
            (around, None)
        } else {
            (ctx.last_bbox, None)
        };

        let stac_query = build_query(
            &self.registry,
            &collections,
            &datetime,
            &cloud_outcome,
            bbox,
            today,
        )?;

        let mut diagnostics = Diagnostics {
            failure_stage: "search",
            ..Default::default()
        };
        let tiles = self
            .search_filter_select(&stac_query, bbox, query, now, &mut diagnostics)
            .await?;

        let (tiles, relaxation) = if tiles.is_empty() {
            self.negotiate(&stac_query, bbox, query, now, &mut diagnostics).await?
        } else {
            (tiles, None)
        };

        let metadata = self.build_metadata(&stac_query, &datetime, &cloud_outcome);
        Ok(DataOutcome {
            tiles,
            stac_query,
            bbox,
            location_name,
            cloud_warning: cloud_outcome.warning,
            relaxation,
            metadata,
            diagnostics,
        })
    }

    async fn search_filter_select(
        &self,
        stac_query: &StacQuery,
        bbox: Option<BBox>,
        query: &str,
        now: chrono::DateTime<Utc>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<ScoredTile>, PipelineError> {
        let features = self.stac.search(stac_query).await?;
        diagnostics.raw_count = features.len();

        let features = match &bbox {
            Some(request) => {
                filter_by_overlap(features, request, self.config.filters.min_overlap)
            }
            None => features,
        };
        diagnostics.spatial_filtered_count = features.len();
        if features.is_empty() {
            diagnostics.failure_stage = "spatial-filter";
            return Ok(Vec::new());
        }

        let tiles = self.selector.select(features, bbox, query, now).await;
        diagnostics.final_count = tiles.len();
        if tiles.is_empty() {
            diagnostics.failure_stage = "selection";
        }
        Ok(tiles)
    }

    /// Walk the relaxation ladder; first rung with data wins.
    async fn negotiate(
        &self,
        original: &StacQuery,
        bbox: Option<BBox>,
        query: &str,
        now: chrono::DateTime<Utc>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(Vec<ScoredTile>, Option<RelaxationRecord>), PipelineError> {
        for attempt in relaxation_ladder(&self.registry, original) {
            tracing::info!("negotiator: {}", attempt.record.explanation);
            let tiles = self
                .search_filter_select(&attempt.stac, bbox, query, now, diagnostics)
                .await?;
            if !tiles.is_empty() {
                return Ok((tiles, Some(attempt.record)));
            }
        }
        diagnostics.failure_stage = "negotiation";
        Ok((Vec::new(), None))
    }

    async fn data_response(
        &self,
        query: &str,
        intent: Intent,
        outcome: DataOutcome,
        ctx: &crate::context::ConversationContext,
    ) -> Response {
        if outcome.tiles.is_empty() {
            let message = self.composer.empty_result(query, &outcome.diagnostics).await;
            return Response {
                success: true,
                message,
                query_type: query_type_for(intent.kind),
                data: None,
                classification: intent,
                showing_alternatives: None,
                original_filters: None,
                alternative_filters: None,
                translation_metadata: outcome.metadata,
            };
        }

        let message = match intent.kind {
            IntentKind::Hybrid => {
                let history = ctx.recent_history(5);
                self.composer
                    .hybrid(
                        query,
                        &outcome.tiles,
                        &outcome.metadata,
                        outcome.location_name.as_deref(),
                        outcome.cloud_warning.as_deref(),
                        outcome.relaxation.as_ref(),
                        &history,
                    )
                    .await
            }
            _ => {
                self.composer
                    .brief(
                        query,
                        &outcome.tiles,
                        &outcome.metadata,
                        outcome.location_name.as_deref(),
                        outcome.cloud_warning.as_deref(),
                        outcome.relaxation.as_ref(),
                    )
                    .await
            }
        };

        let features: Vec<_> = outcome.tiles.into_iter().map(|t| t.feature).collect();
        let map_bbox = outcome
            .bbox
            .or_else(|| union_bbox(&features))
            .unwrap_or(BBox([-180.0, -90.0, 180.0, 90.0]));

        let query_type = if outcome.relaxation.is_some() {
            QueryType::AlternativeResults
        } else {
            query_type_for(intent.kind)
        };

        Response {
            success: true,
            message,
            query_type,
            data: Some(MapData::new(features, map_bbox)),
            classification: intent,
            showing_alternatives: outcome.relaxation.as_ref().map(|_| true),
            original_filters: outcome.relaxation.as_ref().map(|r| r.original_filters.clone()),
            alternative_filters: outcome
                .relaxation
                .as_ref()
                .map(|r| r.alternative_filters.clone()),
            translation_metadata: TranslationMetadata {
                stac_query: Some(outcome.stac_query),
                ..outcome.metadata
            },
        }
    }

    fn build_metadata(
        &self,
        stac_query: &StacQuery,
        datetime: &DatetimeResult,
        cloud_outcome: &CloudFilterOutcome,
    ) -> TranslationMetadata {
        TranslationMetadata {
            stac_query: None,
            collections: stac_query.collections.clone(),
            datetime: stac_query.datetime.clone(),
            comparison_datetime: match datetime {
                DatetimeResult::Comparison { before, after, .. } => {
                    Some((before.format(), after.format()))
                }
                _ => None,
            },
            cloud_filter: cloud_outcome.filter.as_ref().map(|f| CloudFilterEcho {
                property: f.property_name.clone(),
                threshold_percent: f.threshold_percent,
            }),
        }
    }

    fn error_response(&self, err: &PipelineError, intent: Intent) -> Response {
        Response {
            success: false,
            message: self.composer.error_message(err),
            query_type: QueryType::Error,
            data: None,
            classification: intent,
            showing_alternatives: None,
            original_filters: None,
            alternative_filters: None,
            translation_metadata: TranslationMetadata::empty(),
        }
    }
}

fn query_type_for(kind: IntentKind) -> QueryType {
    match kind {
        IntentKind::Vision => QueryType::Vision,
        IntentKind::Stac => QueryType::Stac,
        IntentKind::Hybrid => QueryType::Hybrid,
        IntentKind::Contextual => QueryType::Contextual,
    }
}

/// Frame every selected tile when the request itself had no box.
fn union_bbox(features: &[crate::models::stac::StacFeature]) -> Option<BBox> {
    let mut bounds: Option<[f64; 4]> = None;
    for f in features {
        let Some(b) = f.bounds() else { continue };
        bounds = Some(match bounds {
            None => b.0,
            Some([w, s, e, n]) => [
                w.min(b.west()),
                s.min(b.south()),
                e.max(b.east()),
                n.max(b.north()),
            ],
        });
    }
    bounds.map(BBox).filter(BBox::is_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::{LocationCache, PredefinedRegions};
    use crate::llm::LlmGateway;
    use crate::llm::testing::ScriptedCompleter;
    use crate::models::stac::StacFeature;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted search backend: pops canned feature lists per call.
    struct ScriptedStac {
        replies: Mutex<Vec<Vec<StacFeature>>>,
    }

    impl ScriptedStac {
        fn new(replies: Vec<Vec<StacFeature>>) -> Self {
            ScriptedStac {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait::async_trait]
    impl StacSearch for ScriptedStac {
        async fn search(&self, _query: &StacQuery) -> Result<Vec<StacFeature>, PipelineError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(replies.remove(0))
            }
        }
    }

    fn seattle_tile(id: &str, datetime: &str, clouds: f64) -> StacFeature {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "collection": "sentinel-2-l2a",
            "bbox": [-122.5, 47.4, -122.2, 47.8],
            "properties": {"datetime": datetime, "eo:cloud_cover": clouds}
        }))
        .unwrap()
    }

    /// An orchestrator with every model call failing (pure rule-based) and
    /// a scripted catalog.
    fn rule_based_orchestrator(stac: ScriptedStac) -> Orchestrator {
        let registry = Arc::new(Registry::new());
        let agent_deadline = Duration::from_secs(5);
        let gateway = || Arc::new(LlmGateway::new(Box::new(ScriptedCompleter::failing())));
        let resolver = LocationResolver::new(
            vec![Box::new(PredefinedRegions)],
            LocationCache::new(Duration::from_secs(3600), 100),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        Orchestrator::new(
            registry.clone(),
            IntentClassifier::new(gateway(), agent_deadline),
            CollectionMapper::new(gateway(), registry.clone(), agent_deadline),
            LocationExtractor::new(gateway(), agent_deadline),
            DatetimeTranslator::new(gateway(), agent_deadline),
            CloudFilterAgent::new(gateway(), agent_deadline),
            resolver,
            Box::new(stac),
            TileSelector::new(gateway(), registry.clone(), agent_deadline),
            Composer::new(gateway(), registry, agent_deadline),
            TerraConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_query_is_rejected_without_touching_context() {
        let orch = rule_based_orchestrator(ScriptedStac::new(vec![]));
        let resp = orch.translate_query("s1", "   ", None).await;
        assert!(!resp.success);
        assert_eq!(resp.query_type, QueryType::Error);
        assert_eq!(orch.store.session_count(), 0);
    }

    #[tokio::test]
    async fn show_me_seattle_renders_a_brief_stac_response() {
        let stac = ScriptedStac::new(vec![vec![
            seattle_tile("t1", "2025-07-20T19:00:00Z", 5.0),
            seattle_tile("t2", "2025-07-20T19:30:00Z", 12.0),
        ]]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query("s1", "Show me satellite imagery of Seattle", None)
            .await;
        assert!(resp.success);
        assert_eq!(resp.query_type, QueryType::Stac);
        let data = resp.data.unwrap();
        assert!(!data.features.is_empty());
        assert!(data.features.len() <= 10);
        // Resolved to the predefined Seattle box
        assert!((data.bbox.west() + 122.46).abs() < 0.01);
        assert_eq!(
            resp.translation_metadata.collections,
            vec!["sentinel-2-l2a", "landsat-c2-l2"]
        );
        // Default lookback got applied
        assert!(resp.translation_metadata.datetime.is_some());
    }

    #[tokio::test]
    async fn contextual_question_skips_the_catalog() {
        let stac = ScriptedStac::new(vec![vec![seattle_tile("t", "2025-07-20T19:00:00Z", 5.0)]]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query("s1", "How was NYC impacted by Hurricane Sandy?", None)
            .await;
        assert!(resp.success);
        assert_eq!(resp.query_type, QueryType::Contextual);
        assert!(resp.data.is_none());
        // Context recorded, but no map rendered
        let session = orch.store.session("s1");
        let ctx = session.lock().await;
        assert_eq!(ctx.query_count, 1);
        assert!(!ctx.has_rendered_map);
    }

    #[tokio::test]
    async fn unresolvable_location_is_a_clean_error() {
        let orch = rule_based_orchestrator(ScriptedStac::new(vec![]));
        let resp = orch
            .translate_query("s1", "Show me imagery of Zzyzzx Flats", None)
            .await;
        assert!(!resp.success);
        assert_eq!(resp.query_type, QueryType::Error);
        assert!(resp.message.contains("Zzyzzx Flats"));
        // Hard error: nothing recorded for the session
        let session = orch.store.session("s1");
        let ctx = session.lock().await;
        assert_eq!(ctx.query_count, 0);
        assert!(!ctx.has_rendered_map);
    }

    #[tokio::test]
    async fn pin_becomes_the_spatial_focus_when_query_names_no_place() {
        let stac = ScriptedStac::new(vec![vec![seattle_tile("t", "2025-07-20T19:00:00Z", 5.0)]]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query(
                "s1",
                "Show me the latest imagery here",
                Some(Pin { lat: 47.6, lng: -122.33 }),
            )
            .await;
        assert!(resp.success);
        let data = resp.data.unwrap();
        let [lon, lat] = data.bbox.center();
        assert!((lon + 122.33).abs() < 0.05);
        assert!((lat - 47.6).abs() < 0.05);
    }

    #[tokio::test]
    async fn empty_search_walks_the_relaxation_ladder() {
        // Clear-sky query => cloud filter 25; first search empty, the
        // relaxed rung returns data
        let stac = ScriptedStac::new(vec![
            vec![],
            vec![seattle_tile("relaxed", "2025-07-20T19:00:00Z", 40.0)],
        ]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query("s1", "Show me Seattle with clear skies", None)
            .await;
        assert!(resp.success);
        assert_eq!(resp.query_type, QueryType::AlternativeResults);
        assert_eq!(resp.showing_alternatives, Some(true));
        let original = resp.original_filters.unwrap();
        let alternative = resp.alternative_filters.unwrap();
        assert_eq!(original.cloud_cover, Some(25));
        assert_eq!(alternative.cloud_cover, Some(50));
        assert!(resp.message.contains("cloud"));
    }

    #[tokio::test]
    async fn explicit_ten_percent_cloud_request_relaxes_to_thirty_five() {
        // Nothing under the stated 10% ceiling; the relaxed search finds a
        // 30%-cloud tile
        let stac = ScriptedStac::new(vec![
            vec![],
            vec![seattle_tile("relaxed", "2025-07-20T19:00:00Z", 30.0)],
        ]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query("s1", "Show me Seattle with cloud cover < 10%", None)
            .await;
        assert!(resp.success);
        assert_eq!(resp.query_type, QueryType::AlternativeResults);
        let original = resp.original_filters.unwrap();
        let alternative = resp.alternative_filters.unwrap();
        assert_eq!(original.cloud_cover, Some(10));
        assert_eq!(alternative.cloud_cover, Some(35));
        assert!(resp.message.contains("10%"));
        assert!(resp.message.contains("35%"));
    }

    #[tokio::test]
    async fn exhausted_negotiation_yields_empty_result_explanation() {
        let orch = rule_based_orchestrator(ScriptedStac::new(vec![]));
        let resp = orch
            .translate_query("s1", "Show me Seattle with clear skies", None)
            .await;
        assert!(resp.success);
        assert_eq!(resp.query_type, QueryType::Stac);
        assert!(resp.data.is_none());
        assert!(resp.message.contains("Suggestions"));
    }

    #[tokio::test]
    async fn sar_cloud_warning_reaches_the_user() {
        let stac = ScriptedStac::new(vec![vec![serde_json::from_value(serde_json::json!({
            "id": "sar-1",
            "collection": "sentinel-1-grd",
            "bbox": [-95.8, 29.5, -95.0, 30.2],
            "properties": {"datetime": "2025-09-25T12:00:00Z"}
        }))
        .unwrap()]]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query("s1", "Show SAR flood data for Houston last month with low clouds", None)
            .await;
        assert!(resp.success);
        assert!(resp.message.contains("not applicable"));
        assert_eq!(resp.translation_metadata.collections, vec!["sentinel-1-grd"]);
        assert!(resp.translation_metadata.cloud_filter.is_none());
    }

    #[tokio::test]
    async fn elevation_query_has_no_datetime_or_cloud_filter() {
        let stac = ScriptedStac::new(vec![vec![serde_json::from_value(serde_json::json!({
            "id": "dem-1",
            "collection": "cop-dem-glo-30",
            "bbox": [-109.1, 36.9, -102.0, 41.0],
            "properties": {}
        }))
        .unwrap()]]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query("s1", "Show elevation data for Colorado", None)
            .await;
        assert!(resp.success);
        assert_eq!(
            resp.translation_metadata.collections,
            vec!["cop-dem-glo-30", "nasadem"]
        );
        assert!(resp.translation_metadata.datetime.is_none());
        assert!(resp.translation_metadata.cloud_filter.is_none());
        let q = resp.translation_metadata.stac_query.unwrap();
        assert!(q.datetime.is_none());
    }

    #[tokio::test]
    async fn comparison_query_carries_both_windows() {
        let stac = ScriptedStac::new(vec![vec![serde_json::from_value(serde_json::json!({
            "id": "fire-1",
            "collection": "modis-14A1-061",
            "bbox": [-120.0, 32.5, -114.1, 35.8],
            "properties": {"datetime": "2025-01-03T10:00:00Z"}
        }))
        .unwrap()]]);
        let orch = rule_based_orchestrator(stac);
        let resp = orch
            .translate_query(
                "s1",
                "Show and compare wildfire activity in Southern California between January 1st and January 3rd, 2025",
                None,
            )
            .await;
        assert!(resp.success);
        let (before, after) = resp.translation_metadata.comparison_datetime.unwrap();
        assert_eq!(before, "2025-01-01/2025-01-02");
        assert_eq!(after, "2025-01-03/2025-01-04");
        assert!(resp.translation_metadata.collections[0].starts_with("modis-14A"));
    }

    #[tokio::test]
    async fn follow_up_reuses_last_bbox() {
        let stac = ScriptedStac::new(vec![
            vec![seattle_tile("first", "2025-07-20T19:00:00Z", 5.0)],
            vec![seattle_tile("second", "2025-07-21T19:00:00Z", 5.0)],
        ]);
        let orch = rule_based_orchestrator(stac);
        let first = orch
            .translate_query("s1", "Show me satellite imagery of Seattle", None)
            .await;
        assert!(first.success);
        let second = orch
            .translate_query("s1", "Show the landsat view too", None)
            .await;
        assert!(second.success);
        let data = second.data.unwrap();
        // No location in the follow-up: the Seattle box carries over
        assert!((data.bbox.west() + 122.46).abs() < 0.2);
    }

    #[test]
    fn union_bbox_frames_all_features() {
        let a: StacFeature = serde_json::from_value(serde_json::json!({
            "id": "a", "collection": "c", "bbox": [0.0, 0.0, 1.0, 1.0], "properties": {}
        }))
        .unwrap();
        let b: StacFeature = serde_json::from_value(serde_json::json!({
            "id": "b", "collection": "c", "bbox": [2.0, 2.0, 3.0, 3.0], "properties": {}
        }))
        .unwrap();
        let u = union_bbox(&[a, b]).unwrap();
        assert_eq!(u.0, [0.0, 0.0, 3.0, 3.0]);
    }
}
