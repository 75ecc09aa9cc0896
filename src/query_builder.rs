use chrono::NaiveDate;

use crate::agents::clouds::CloudFilterOutcome;
use crate::agents::datetime::{DatetimeRange, DatetimeResult};
use crate::error::PipelineError;
use crate::models::bbox::BBox;
use crate::models::stac::{SortBy, StacQuery};
use crate::registry::{Category, Registry};

/// Historical window with the best archive coverage for reanalysis-style
/// climate products.
const CLIMATE_RANGE: &str = "2020-01-01/2023-12-31";

/// Default lookback when the query names no period but the collections
/// are temporal.
const DEFAULT_LOOKBACK_DAYS: i64 = 60;

/// Minimum confidence for thermal-anomaly pixels worth rendering.
const FIRE_CONFIDENCE_FLOOR: u32 = 30;

/// Deterministic assembly of the search body from the merged agent
/// outputs. No LLM involvement past this point.
pub fn build_query(
    registry: &Registry,
    collections: &[String],
    datetime: &DatetimeResult,
    clouds: &CloudFilterOutcome,
    bbox: Option<BBox>,
    today: NaiveDate,
) -> Result<StacQuery, PipelineError> {
    if collections.is_empty() {
        return Err(PipelineError::MalformedQuery("no collections selected".to_string()));
    }
    for id in collections {
        if !registry.contains(id) {
            return Err(PipelineError::UnknownCollection(id.clone()));
        }
    }

    let any_static = collections.iter().any(|id| registry.is_static(id));
    let all_composite = collections.iter().all(|id| registry.is_composite(id));
    let all_climate = collections
        .iter()
        .all(|id| registry.get(id).is_ok_and(|p| p.category == Category::Climate));
    let any_fire = collections
        .iter()
        .any(|id| registry.get(id).is_ok_and(|p| p.category == Category::Fire));

    let datetime_field = if any_static || all_composite {
        // Static data has no time axis; composites are pre-aggregated and
        // reject per-scene ranges — most-recent-first sort stands in.
        None
    } else {
        match datetime {
            DatetimeResult::Single(range) => Some(range.format()),
            DatetimeResult::Comparison { after, .. } => Some(after.format()),
            DatetimeResult::NoneFound => {
                if all_climate {
                    Some(CLIMATE_RANGE.to_string())
                } else {
                    Some(DatetimeRange::last_days(today, DEFAULT_LOOKBACK_DAYS).format())
                }
            }
        }
    };

    let mut query_filters = serde_json::Map::new();
    if let Some(filter) = &clouds.filter {
        query_filters.insert(
            filter.property_name.clone(),
            serde_json::json!({"lt": filter.threshold_percent}),
        );
    }
    if any_fire {
        query_filters.insert(
            "confidence".to_string(),
            serde_json::json!({"gte": FIRE_CONFIDENCE_FLOOR}),
        );
    }

    let stac = StacQuery {
        collections: collections.to_vec(),
        bbox,
        datetime: datetime_field,
        query: (!query_filters.is_empty()).then_some(query_filters),
        sortby: Some(SortBy::datetime_desc()),
        limit: derive_limit(registry, collections, bbox),
    };

    validate(registry, &stac)?;
    Ok(stac)
}

/// How many candidates to pull: enough tiles to cover the area spatially
/// (30% margin), times a revisit-rate factor, never below the default of
/// 100 and never above the API ceiling.
pub fn derive_limit(registry: &Registry, collections: &[String], bbox: Option<BBox>) -> u32 {
    let Some(bbox) = bbox else {
        return 100;
    };

    let tile_size_km = collections
        .iter()
        .filter_map(|id| registry.tile_size_km(id))
        .fold(f64::INFINITY, f64::min);
    if !tile_size_km.is_finite() || tile_size_km <= 0.0 {
        return 100;
    }

    let tile_area = tile_size_km * tile_size_km;
    let spatial_tiles = (bbox.area_km2() / tile_area * 1.3).ceil().max(1.0);
    let temporal_factor = temporal_factor(registry, collections);
    let derived = (spatial_tiles * temporal_factor) as u32;
    derived.clamp(100, 1000)
}

/// Revisit-rate multiplier: how many acquisitions per footprint the
/// default lookback produces for these sensors.
fn temporal_factor(registry: &Registry, collections: &[String]) -> f64 {
    let any = |pred: &dyn Fn(&str) -> bool| collections.iter().any(|id| pred(id));

    if any(&|id| registry.is_static(id)) {
        1.0
    } else if any(&|id| id.starts_with("hls")) {
        10.0
    } else if any(&|id| id.contains("sentinel-2")) {
        8.0
    } else if any(&|id| id.contains("modis")) {
        5.0
    } else if any(&|id| id.contains("sentinel-1")) {
        5.0
    } else if any(&|id| id.contains("landsat")) {
        4.0
    } else {
        5.0
    }
}

/// Capability invariants, enforced on every query that leaves the
/// builder. A violation here is an upstream bug, not bad user input.
pub fn validate(registry: &Registry, stac: &StacQuery) -> Result<(), PipelineError> {
    let malformed = |msg: String| Err(PipelineError::MalformedQuery(msg));

    if stac.collections.is_empty() {
        return malformed("empty collection set".to_string());
    }
    for id in &stac.collections {
        if !registry.contains(id) {
            return Err(PipelineError::UnknownCollection(id.clone()));
        }
    }
    if !(50..=1000).contains(&stac.limit) {
        return malformed(format!("limit {} outside [50, 1000]", stac.limit));
    }

    let any_static = stac.collections.iter().any(|id| registry.is_static(id));
    if any_static && stac.datetime.is_some() {
        return malformed("datetime set for a static collection".to_string());
    }

    let all_composite = stac.collections.iter().all(|id| registry.is_composite(id));
    if all_composite {
        if stac.datetime.is_some() {
            return malformed("datetime set for an all-composite collection set".to_string());
        }
        if stac.sortby.as_deref() != Some(SortBy::datetime_desc().as_slice()) {
            return malformed("composite collections require sort by datetime desc".to_string());
        }
    }

    if let Some(filters) = &stac.query {
        let has_cloud_key = stac
            .collections
            .iter()
            .filter_map(|id| registry.cloud_cover_property(id))
            .any(|prop| filters.contains_key(prop))
            || filters.contains_key("eo:cloud_cover");
        if has_cloud_key
            && !stac
                .collections
                .iter()
                .any(|id| registry.supports_cloud_filtering(id))
        {
            return malformed("cloud filter present but no collection is cloud-filterable".to_string());
        }
    }

    if let Some(bbox) = &stac.bbox {
        if !bbox.is_valid() {
            return malformed(format!("invalid bbox {:?}", bbox.0));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::clouds::{CloudDetection, CloudIntent, apply_to_collections};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 15).unwrap()
    }

    fn seattle() -> BBox {
        BBox::new(-122.46, 47.48, -122.22, 47.73).unwrap()
    }

    fn strings(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_query_gets_sixty_day_lookback_and_limit_100() {
        let registry = Registry::new();
        let q = build_query(
            &registry,
            &strings(&["sentinel-2-l2a", "landsat-c2-l2"]),
            &DatetimeResult::NoneFound,
            &CloudFilterOutcome::default(),
            Some(seattle()),
            today(),
        )
        .unwrap();
        assert_eq!(q.limit, 100);
        let dt = q.datetime.unwrap();
        assert!(dt.ends_with("2025-10-15"));
        assert!(dt.starts_with("2025-08-16"));
        assert_eq!(q.sortby, Some(SortBy::datetime_desc()));
    }

    #[test]
    fn static_collections_get_no_datetime() {
        let registry = Registry::new();
        let q = build_query(
            &registry,
            &strings(&["cop-dem-glo-30", "nasadem"]),
            &DatetimeResult::Single(DatetimeRange::parse("2024-01-01/2024-12-31").unwrap()),
            &CloudFilterOutcome::default(),
            Some(seattle()),
            today(),
        )
        .unwrap();
        assert!(q.datetime.is_none());
        assert!(q.query.is_none());
    }

    #[test]
    fn all_composite_set_sorts_instead_of_filtering() {
        let registry = Registry::new();
        let q = build_query(
            &registry,
            &strings(&["modis-13Q1-061"]),
            &DatetimeResult::Single(DatetimeRange::parse("2024-06-01/2024-06-30").unwrap()),
            &CloudFilterOutcome::default(),
            Some(seattle()),
            today(),
        )
        .unwrap();
        assert!(q.datetime.is_none());
        assert_eq!(q.sortby, Some(SortBy::datetime_desc()));
    }

    #[test]
    fn explicit_range_and_cloud_filter_land_on_the_wire() {
        let registry = Registry::new();
        let clouds = apply_to_collections(
            CloudDetection::from_intent(CloudIntent::Low),
            &strings(&["sentinel-2-l2a"]),
            &registry,
        );
        let q = build_query(
            &registry,
            &strings(&["sentinel-2-l2a"]),
            &DatetimeResult::Single(DatetimeRange::parse("2024-10-01/2024-10-31").unwrap()),
            &clouds,
            Some(seattle()),
            today(),
        )
        .unwrap();
        assert_eq!(q.datetime.as_deref(), Some("2024-10-01/2024-10-31"));
        let filters = q.query.unwrap();
        assert_eq!(filters["eo:cloud_cover"], serde_json::json!({"lt": 25}));
    }

    #[test]
    fn sar_cloud_request_produces_no_filter() {
        let registry = Registry::new();
        let clouds =
            apply_to_collections(
                CloudDetection::from_intent(CloudIntent::Low),
                &strings(&["sentinel-1-grd"]),
                &registry,
            );
        assert!(clouds.warning.is_some());
        let q = build_query(
            &registry,
            &strings(&["sentinel-1-grd"]),
            &DatetimeResult::Single(DatetimeRange::last_days(today(), 30)),
            &clouds,
            Some(seattle()),
            today(),
        )
        .unwrap();
        assert!(q.query.is_none());
    }

    #[test]
    fn fire_collections_get_confidence_floor() {
        let registry = Registry::new();
        let q = build_query(
            &registry,
            &strings(&["modis-14A1-061"]),
            &DatetimeResult::NoneFound,
            &CloudFilterOutcome::default(),
            Some(seattle()),
            today(),
        )
        .unwrap();
        let filters = q.query.unwrap();
        assert_eq!(filters["confidence"], serde_json::json!({"gte": 30}));
    }

    #[test]
    fn climate_collections_get_historical_default() {
        let registry = Registry::new();
        let q = build_query(
            &registry,
            &strings(&["era5-pds", "daymet-daily-na"]),
            &DatetimeResult::NoneFound,
            &CloudFilterOutcome::default(),
            None,
            today(),
        )
        .unwrap();
        assert_eq!(q.datetime.as_deref(), Some(CLIMATE_RANGE));
    }

    #[test]
    fn comparison_mode_executes_the_after_window() {
        let registry = Registry::new();
        let q = build_query(
            &registry,
            &strings(&["modis-14A1-061"]),
            &DatetimeResult::Comparison {
                before: DatetimeRange::parse("2025-01-01/2025-01-02").unwrap(),
                after: DatetimeRange::parse("2025-01-03/2025-01-04").unwrap(),
                needs_clarification: false,
                suggestion: None,
            },
            &CloudFilterOutcome::default(),
            Some(seattle()),
            today(),
        )
        .unwrap();
        assert_eq!(q.datetime.as_deref(), Some("2025-01-03/2025-01-04"));
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let registry = Registry::new();
        let err = build_query(
            &registry,
            &strings(&["made-up-collection"]),
            &DatetimeResult::NoneFound,
            &CloudFilterOutcome::default(),
            None,
            today(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownCollection(_)));
    }

    #[test]
    fn dateline_bbox_passes_validation() {
        let registry = Registry::new();
        let fiji = BBox::new(176.0, -19.0, -178.0, -15.0).unwrap();
        let q = build_query(
            &registry,
            &strings(&["sentinel-2-l2a"]),
            &DatetimeResult::NoneFound,
            &CloudFilterOutcome::default(),
            Some(fiji),
            today(),
        )
        .unwrap();
        assert_eq!(q.bbox.unwrap().0, [176.0, -19.0, -178.0, -15.0]);
    }

    #[test]
    fn large_area_raises_limit() {
        let registry = Registry::new();
        // All of Australia with 100km tiles
        let australia = BBox::new(112.92, -43.74, 153.64, -10.06).unwrap();
        let limit = derive_limit(&registry, &strings(&["sentinel-2-l2a"]), Some(australia));
        assert!(limit > 100);
        assert!(limit <= 1000);
    }

    #[test]
    fn validate_catches_handcrafted_violations() {
        let registry = Registry::new();
        let bad = StacQuery {
            collections: strings(&["cop-dem-glo-30"]),
            bbox: None,
            datetime: Some("2024-01-01/2024-12-31".to_string()),
            query: None,
            sortby: Some(SortBy::datetime_desc()),
            limit: 100,
        };
        assert!(matches!(
            validate(&registry, &bad),
            Err(PipelineError::MalformedQuery(_))
        ));

        let bad_limit = StacQuery {
            collections: strings(&["sentinel-2-l2a"]),
            bbox: None,
            datetime: None,
            query: None,
            sortby: Some(SortBy::datetime_desc()),
            limit: 10,
        };
        assert!(validate(&registry, &bad_limit).is_err());
    }
}
