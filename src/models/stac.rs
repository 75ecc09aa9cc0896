use serde::{Deserialize, Serialize};

use super::bbox::BBox;

/// A STAC Item API search body. Field names and shapes are wire-exact:
/// absent filters are omitted entirely rather than sent as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacQuery {
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortby: Option<Vec<SortBy>>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortBy {
    pub fn datetime_desc() -> Vec<SortBy> {
        vec![SortBy {
            field: "datetime".to_string(),
            direction: SortDirection::Desc,
        }]
    }
}

/// One STAC item as returned by the search endpoint. Only the fields the
/// pipeline reads are modeled; everything else rides along in `properties`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacFeature {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StacFeature {
    /// Features without a collection or with a malformed bbox are unusable
    /// downstream and get dropped at decode time.
    pub fn is_well_formed(&self) -> bool {
        if self.collection.as_deref().unwrap_or("").is_empty() {
            return false;
        }
        match &self.bbox {
            Some(b) if b.len() == 4 => BBox([b[0], b[1], b[2], b[3]]).is_valid(),
            _ => false,
        }
    }

    pub fn bounds(&self) -> Option<BBox> {
        let b = self.bbox.as_ref()?;
        if b.len() != 4 {
            return None;
        }
        let bb = BBox([b[0], b[1], b[2], b[3]]);
        bb.is_valid().then_some(bb)
    }

    pub fn datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.properties.get("datetime")?.as_str()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|d| d.with_timezone(&chrono::Utc))
    }

    pub fn cloud_cover(&self) -> Option<f64> {
        self.properties.get("eo:cloud_cover")?.as_f64()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<StacFeature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_omits_absent_fields() {
        let q = StacQuery {
            collections: vec!["cop-dem-glo-30".into()],
            bbox: None,
            datetime: None,
            query: None,
            sortby: None,
            limit: 100,
        };
        let v = serde_json::to_value(&q).unwrap();
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("datetime"));
        assert!(!obj.contains_key("bbox"));
        assert!(!obj.contains_key("query"));
        assert!(!obj.contains_key("sortby"));
    }

    #[test]
    fn sortby_wire_shape() {
        let v = serde_json::to_value(SortBy::datetime_desc()).unwrap();
        assert_eq!(
            v,
            serde_json::json!([{"field": "datetime", "direction": "desc"}])
        );
    }

    #[test]
    fn feature_without_collection_is_malformed() {
        let f: StacFeature = serde_json::from_value(serde_json::json!({
            "id": "x",
            "bbox": [0.0, 0.0, 1.0, 1.0],
            "properties": {}
        }))
        .unwrap();
        assert!(!f.is_well_formed());
    }

    #[test]
    fn feature_reads_cloud_and_datetime() {
        let f: StacFeature = serde_json::from_value(serde_json::json!({
            "id": "s2-tile",
            "collection": "sentinel-2-l2a",
            "bbox": [-122.5, 47.4, -122.2, 47.8],
            "properties": {
                "datetime": "2025-07-20T19:01:22Z",
                "eo:cloud_cover": 3.5
            }
        }))
        .unwrap();
        assert!(f.is_well_formed());
        assert_eq!(f.cloud_cover(), Some(3.5));
        assert!(f.datetime().is_some());
    }
}
