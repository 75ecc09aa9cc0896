use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Optical,
    Radar,
    Elevation,
    Vegetation,
    Fire,
    Snow,
    Climate,
    LandCover,
    AirQuality,
}

/// What a collection can and cannot be filtered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub temporal_filterable: bool,
    pub cloud_filterable: bool,
    /// Pre-aggregated product (8-day / 16-day / annual); per-scene datetime
    /// ranges are meaningless, sort by datetime instead.
    pub composite: bool,
    /// No temporal dimension at all (DEMs).
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct CollectionProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub category: Category,
    pub resolution_meters: f64,
    pub capabilities: Capabilities,
    pub cloud_cover_property: Option<&'static str>,
    pub typical_tile_size_km: f64,
}

const TEMPORAL: Capabilities = Capabilities {
    temporal_filterable: true,
    cloud_filterable: false,
    composite: false,
    is_static: false,
};

const TEMPORAL_CLOUDY: Capabilities = Capabilities {
    temporal_filterable: true,
    cloud_filterable: true,
    composite: false,
    is_static: false,
};

const COMPOSITE: Capabilities = Capabilities {
    temporal_filterable: false,
    cloud_filterable: false,
    composite: true,
    is_static: false,
};

const STATIC: Capabilities = Capabilities {
    temporal_filterable: false,
    cloud_filterable: false,
    composite: false,
    is_static: true,
};

const EO_CLOUD: Option<&str> = Some("eo:cloud_cover");

fn catalogue() -> Vec<CollectionProfile> {
    use Category::*;
    vec![
        CollectionProfile {
            id: "sentinel-2-l2a",
            name: "Sentinel-2 Level-2A",
            category: Optical,
            resolution_meters: 10.0,
            capabilities: TEMPORAL_CLOUDY,
            cloud_cover_property: EO_CLOUD,
            typical_tile_size_km: 100.0,
        },
        CollectionProfile {
            id: "landsat-c2-l2",
            name: "Landsat Collection 2 Level-2",
            category: Optical,
            resolution_meters: 30.0,
            capabilities: TEMPORAL_CLOUDY,
            cloud_cover_property: EO_CLOUD,
            typical_tile_size_km: 185.0,
        },
        CollectionProfile {
            id: "naip",
            name: "NAIP aerial imagery",
            category: Optical,
            resolution_meters: 1.0,
            // No usable cloud metadata on NAIP items
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 50.0,
        },
        CollectionProfile {
            id: "hls2-l30",
            name: "Harmonized Landsat Sentinel (L30)",
            category: Optical,
            resolution_meters: 30.0,
            capabilities: TEMPORAL_CLOUDY,
            cloud_cover_property: EO_CLOUD,
            typical_tile_size_km: 100.0,
        },
        CollectionProfile {
            id: "hls2-s30",
            name: "Harmonized Landsat Sentinel (S30)",
            category: Optical,
            resolution_meters: 30.0,
            capabilities: TEMPORAL_CLOUDY,
            cloud_cover_property: EO_CLOUD,
            typical_tile_size_km: 100.0,
        },
        CollectionProfile {
            id: "modis-09A1-061",
            name: "MODIS surface reflectance 8-day",
            category: Optical,
            resolution_meters: 500.0,
            capabilities: COMPOSITE,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "sentinel-1-grd",
            name: "Sentinel-1 GRD (SAR)",
            category: Radar,
            resolution_meters: 10.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 250.0,
        },
        CollectionProfile {
            id: "sentinel-1-rtc",
            name: "Sentinel-1 RTC (SAR)",
            category: Radar,
            resolution_meters: 10.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 250.0,
        },
        CollectionProfile {
            id: "cop-dem-glo-30",
            name: "Copernicus DEM GLO-30",
            category: Elevation,
            resolution_meters: 30.0,
            capabilities: STATIC,
            cloud_cover_property: None,
            typical_tile_size_km: 1000.0,
        },
        CollectionProfile {
            id: "cop-dem-glo-90",
            name: "Copernicus DEM GLO-90",
            category: Elevation,
            resolution_meters: 90.0,
            capabilities: STATIC,
            cloud_cover_property: None,
            typical_tile_size_km: 1000.0,
        },
        CollectionProfile {
            id: "nasadem",
            name: "NASADEM",
            category: Elevation,
            resolution_meters: 30.0,
            capabilities: STATIC,
            cloud_cover_property: None,
            typical_tile_size_km: 1000.0,
        },
        CollectionProfile {
            id: "3dep-seamless",
            name: "USGS 3DEP seamless DEM",
            category: Elevation,
            resolution_meters: 10.0,
            capabilities: STATIC,
            cloud_cover_property: None,
            typical_tile_size_km: 500.0,
        },
        CollectionProfile {
            id: "modis-14A1-061",
            name: "MODIS thermal anomalies daily",
            category: Fire,
            resolution_meters: 1000.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "modis-14A2-061",
            name: "MODIS thermal anomalies 8-day",
            category: Fire,
            resolution_meters: 1000.0,
            capabilities: COMPOSITE,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "modis-64A1-061",
            name: "MODIS burned area monthly",
            category: Fire,
            resolution_meters: 500.0,
            capabilities: COMPOSITE,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "modis-13Q1-061",
            name: "MODIS vegetation indices 16-day",
            category: Vegetation,
            resolution_meters: 250.0,
            capabilities: COMPOSITE,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "modis-10A1-061",
            name: "MODIS snow cover daily",
            category: Snow,
            resolution_meters: 500.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "modis-10A2-061",
            name: "MODIS snow cover 8-day",
            category: Snow,
            resolution_meters: 500.0,
            capabilities: COMPOSITE,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "modis-11A1-061",
            name: "MODIS land surface temperature daily",
            category: Climate,
            resolution_meters: 1000.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 1200.0,
        },
        CollectionProfile {
            id: "era5-pds",
            name: "ERA5 reanalysis",
            category: Climate,
            resolution_meters: 27830.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 2000.0,
        },
        CollectionProfile {
            id: "daymet-daily-na",
            name: "Daymet daily North America",
            category: Climate,
            resolution_meters: 1000.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 2000.0,
        },
        CollectionProfile {
            id: "gpm-imerg-hhr",
            name: "GPM IMERG precipitation",
            category: Climate,
            resolution_meters: 11000.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 2000.0,
        },
        CollectionProfile {
            id: "esa-worldcover",
            name: "ESA WorldCover",
            category: LandCover,
            resolution_meters: 10.0,
            capabilities: STATIC,
            cloud_cover_property: None,
            typical_tile_size_km: 333.0,
        },
        CollectionProfile {
            id: "io-lulc-annual-v02",
            name: "Impact Observatory land cover annual",
            category: LandCover,
            resolution_meters: 10.0,
            capabilities: COMPOSITE,
            cloud_cover_property: None,
            typical_tile_size_km: 300.0,
        },
        CollectionProfile {
            id: "sentinel-5p-l2",
            name: "Sentinel-5P atmospheric products",
            category: AirQuality,
            resolution_meters: 5500.0,
            capabilities: TEMPORAL,
            cloud_cover_property: None,
            typical_tile_size_km: 2600.0,
        },
    ]
}

/// Immutable per-collection capability metadata, baked in at startup.
#[derive(Debug)]
pub struct Registry {
    profiles: HashMap<&'static str, CollectionProfile>,
    order: Vec<&'static str>,
}

impl Registry {
    pub fn new() -> Self {
        let entries = catalogue();
        let order: Vec<&'static str> = entries.iter().map(|p| p.id).collect();
        let profiles = entries.into_iter().map(|p| (p.id, p)).collect();
        Registry { profiles, order }
    }

    pub fn get(&self, id: &str) -> Result<&CollectionProfile, PipelineError> {
        self.profiles
            .get(id)
            .ok_or_else(|| PipelineError::UnknownCollection(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn ids_by_category(&self, category: Category) -> Vec<&'static str> {
        self.order
            .iter()
            .filter(|id| self.profiles[*id].category == category)
            .copied()
            .collect()
    }

    pub fn supports_temporal_filtering(&self, id: &str) -> bool {
        self.profiles
            .get(id)
            .is_some_and(|p| p.capabilities.temporal_filterable)
    }

    pub fn supports_cloud_filtering(&self, id: &str) -> bool {
        self.profiles
            .get(id)
            .is_some_and(|p| p.capabilities.cloud_filterable)
    }

    pub fn is_static(&self, id: &str) -> bool {
        self.profiles.get(id).is_some_and(|p| p.capabilities.is_static)
    }

    pub fn is_composite(&self, id: &str) -> bool {
        self.profiles.get(id).is_some_and(|p| p.capabilities.composite)
    }

    pub fn cloud_cover_property(&self, id: &str) -> Option<&'static str> {
        self.profiles.get(id).and_then(|p| p.cloud_cover_property)
    }

    pub fn tile_size_km(&self, id: &str) -> Option<f64> {
        self.profiles.get(id).map(|p| p.typical_tile_size_km)
    }

    /// Intersect a candidate list with the catalogue, dropping unknowns.
    pub fn retain_known(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| self.contains(id))
            .cloned()
            .collect()
    }

    /// The single collection to fall back to when a multi-collection query
    /// keeps coming back empty. Prefers the highest-resolution optical
    /// member of the set, defaulting to Sentinel-2.
    pub fn most_versatile(&self, ids: &[String]) -> String {
        ids.iter()
            .filter_map(|id| self.profiles.get(id.as_str()))
            .filter(|p| p.category == Category::Optical)
            .min_by(|a, b| a.resolution_meters.total_cmp(&b.resolution_meters))
            .map(|p| p.id.to_string())
            .unwrap_or_else(|| "sentinel-2-l2a".to_string())
    }

    /// One line per collection, fed to the collection-mapping prompt.
    pub fn catalogue_summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let p = &self.profiles[id];
            let mut tags = Vec::new();
            if p.capabilities.temporal_filterable {
                tags.push("temporal");
            }
            if p.capabilities.cloud_filterable {
                tags.push("cloud-filterable");
            }
            if p.capabilities.composite {
                tags.push("composite");
            }
            if p.capabilities.is_static {
                tags.push("static");
            }
            lines.push(format!(
                "- {} ({}): {:?}, {}m resolution [{}]",
                p.id,
                p.name,
                p.category,
                p.resolution_meters,
                tags.join(", ")
            ));
        }
        lines.join("\n")
    }

    /// Best-effort tile-size probe against `GET {stac_base}/collections/{id}`
    /// for ids outside the catalogue. Enrichment only: the result feeds
    /// limit derivation, never admission into a query.
    pub async fn probe_tile_size_km(
        &self,
        client: &reqwest::Client,
        stac_collections_base: &str,
        id: &str,
    ) -> Option<f64> {
        if let Some(size) = self.tile_size_km(id) {
            return Some(size);
        }
        let url = format!("{}/collections/{}", stac_collections_base.trim_end_matches('/'), id);
        let resp = client
            .get(&url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            tracing::debug!("registry: probe for {id} returned {}", resp.status());
            return None;
        }
        let meta: serde_json::Value = resp.json().await.ok()?;
        let size = infer_tile_size(&meta)?;
        tracing::debug!("registry: probed {id} -> {size}km tiles");
        Some(size)
    }
}

/// Read a tile size out of STAC collection metadata: known grid systems
/// first, then a coarse inference from ground sample distance.
pub fn infer_tile_size(meta: &serde_json::Value) -> Option<f64> {
    let summaries = meta.get("summaries")?;
    if summaries.get("grid:code").is_some() || summaries.get("s2:mgrs_tile").is_some() {
        return Some(100.0);
    }
    if summaries.get("landsat:wrs_path").is_some() || summaries.get("landsat:wrs_row").is_some() {
        return Some(185.0);
    }
    let gsd = summaries
        .get("gsd")
        .and_then(|g| g.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.as_f64())?;
    Some(if gsd <= 5.0 {
        50.0
    } else if gsd <= 30.0 {
        100.0
    } else if gsd <= 100.0 {
        250.0
    } else {
        1200.0
    })
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_id_is_rejected() {
        let r = Registry::new();
        assert!(matches!(
            r.get("not-a-collection"),
            Err(PipelineError::UnknownCollection(_))
        ));
    }

    #[test]
    fn static_collections_are_not_temporal() {
        let r = Registry::new();
        for id in ["cop-dem-glo-30", "cop-dem-glo-90", "nasadem", "3dep-seamless"] {
            assert!(r.is_static(id), "{id} should be static");
            assert!(!r.supports_temporal_filtering(id));
        }
    }

    #[test]
    fn composites_are_not_cloud_filterable() {
        let r = Registry::new();
        for id in &r.order {
            let p = r.get(id).unwrap();
            if p.capabilities.composite {
                assert!(!p.capabilities.cloud_filterable, "{id}");
                assert!(!p.capabilities.temporal_filterable, "{id}");
            }
            if p.capabilities.is_static {
                assert!(!p.capabilities.temporal_filterable, "{id}");
            }
        }
    }

    #[test]
    fn optical_workhorses_have_cloud_property() {
        let r = Registry::new();
        assert_eq!(r.cloud_cover_property("sentinel-2-l2a"), Some("eo:cloud_cover"));
        assert_eq!(r.cloud_cover_property("sentinel-1-grd"), None);
    }

    #[test]
    fn retain_known_drops_unknowns() {
        let r = Registry::new();
        let kept = r.retain_known(&[
            "sentinel-2-l2a".to_string(),
            "made-up".to_string(),
            "nasadem".to_string(),
        ]);
        assert_eq!(kept, vec!["sentinel-2-l2a", "nasadem"]);
    }

    #[test]
    fn most_versatile_prefers_optical() {
        let r = Registry::new();
        let pick = r.most_versatile(&[
            "sentinel-1-grd".to_string(),
            "landsat-c2-l2".to_string(),
        ]);
        assert_eq!(pick, "landsat-c2-l2");
        // No optical member: default
        let pick = r.most_versatile(&["sentinel-1-grd".to_string()]);
        assert_eq!(pick, "sentinel-2-l2a");
    }

    #[test]
    fn category_lookup() {
        let r = Registry::new();
        let elev = r.ids_by_category(Category::Elevation);
        assert!(elev.contains(&"cop-dem-glo-30"));
        assert!(elev.contains(&"nasadem"));
    }

    #[test]
    fn tile_size_inference_prefers_grid_over_gsd() {
        let mgrs = serde_json::json!({"summaries": {"s2:mgrs_tile": ["10TET"], "gsd": [10.0]}});
        assert_eq!(infer_tile_size(&mgrs), Some(100.0));
        let wrs = serde_json::json!({"summaries": {"landsat:wrs_path": ["047"]}});
        assert_eq!(infer_tile_size(&wrs), Some(185.0));
        let coarse = serde_json::json!({"summaries": {"gsd": [500.0]}});
        assert_eq!(infer_tile_size(&coarse), Some(1200.0));
        let bare = serde_json::json!({"summaries": {}});
        assert_eq!(infer_tile_size(&bare), None);
    }

    #[test]
    fn summary_mentions_every_collection() {
        let r = Registry::new();
        let s = r.catalogue_summary();
        for id in &r.order {
            assert!(s.contains(id), "summary missing {id}");
        }
    }
}
