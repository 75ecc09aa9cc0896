use serde::{Deserialize, Serialize};

use super::bbox::BBox;
use super::intent::Intent;
use super::stac::{StacFeature, StacQuery};

/// What kind of reply the pipeline produced for this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Vision,
    Stac,
    Hybrid,
    Contextual,
    AlternativeResults,
    Error,
}

/// Map payload handed to the rendering front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    pub features: Vec<StacFeature>,
    pub bbox: BBox,
    pub center: [f64; 2],
    pub zoom: u8,
}

impl MapData {
    pub fn new(features: Vec<StacFeature>, bbox: BBox) -> Self {
        MapData {
            features,
            center: bbox.center(),
            zoom: bbox.zoom_level(),
            bbox,
        }
    }
}

/// A snapshot of the filters a search ran with. Recorded both for the
/// query as requested and, after relaxation, as executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaxationRecord {
    pub original_filters: FilterSnapshot,
    pub alternative_filters: FilterSnapshot,
    pub explanation: String,
}

/// Everything the translation decided, echoed back for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stac_query: Option<StacQuery>,
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_datetime: Option<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_filter: Option<CloudFilterEcho>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudFilterEcho {
    pub property: String,
    pub threshold_percent: u8,
}

/// The user-facing reply for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub query_type: QueryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MapData>,
    pub classification: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub showing_alternatives: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filters: Option<FilterSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_filters: Option<FilterSnapshot>,
    pub translation_metadata: TranslationMetadata,
}

impl TranslationMetadata {
    pub fn empty() -> Self {
        TranslationMetadata {
            stac_query: None,
            collections: vec![],
            datetime: None,
            comparison_datetime: None,
            cloud_filter: None,
        }
    }
}
