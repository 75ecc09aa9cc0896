use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::LlmGateway;
use crate::registry::Registry;

const SYSTEM_TEMPLATE: &str = "You map Earth-observation queries to STAC collection ids. \
Reply with ONLY a JSON object {\"collections\": [\"id\", ...]} naming 1 to 3 ids from the \
catalogue below. Priority rules:\n\
1. An explicitly named platform (\"Sentinel-1\", \"SAR\", \"radar\", \"Landsat\", \"MODIS\", \
\"NAIP\") wins over every use-case heuristic; return exactly that platform's ids.\n\
2. Use-case keywords map to their category: elevation/terrain => elevation ids, fire/burn => \
fire ids, flood/inundation => radar ids, vegetation/ndvi => vegetation ids, snow/ice => snow \
ids, climate/weather/precipitation => climate ids, air quality/pollution => air-quality ids, \
land cover => land-cover ids.\n\
3. Generic satellite-imagery requests => [\"sentinel-2-l2a\", \"landsat-c2-l2\"].\n\
\n\
Catalogue:\n";

#[derive(Debug, Deserialize)]
struct CollectionsReply {
    collections: Vec<String>,
}

/// Collection-mapping agent: selects 1–3 catalogue ids for the query,
/// with a keyword fallback implementing the same precedence.
pub struct CollectionMapper {
    gateway: Arc<LlmGateway>,
    registry: Arc<Registry>,
    deadline: Duration,
}

impl CollectionMapper {
    pub fn new(gateway: Arc<LlmGateway>, registry: Arc<Registry>, deadline: Duration) -> Self {
        CollectionMapper {
            gateway,
            registry,
            deadline,
        }
    }

    pub async fn map(&self, query: &str) -> Vec<String> {
        let system = format!("{SYSTEM_TEMPLATE}{}", self.registry.catalogue_summary());
        let reply: Result<CollectionsReply, _> = self
            .gateway
            .complete_json(&system, query, 300, self.deadline)
            .await;

        let selected = match reply {
            Ok(r) => {
                let known = self.registry.retain_known(&r.collections);
                let dropped = r.collections.len() - known.len();
                if dropped > 0 {
                    tracing::warn!("collections: dropped {dropped} unknown id(s) from model reply");
                }
                known
            }
            Err(e) => {
                tracing::warn!("collections: model call failed ({e}), using keyword mapping");
                Vec::new()
            }
        };

        if selected.is_empty() {
            return keyword_fallback(query);
        }
        selected.into_iter().take(3).collect()
    }
}

fn any(query: &str, words: &[&str]) -> bool {
    words.iter().any(|w| query.contains(w))
}

/// Keyword selection with the same precedence the prompt encodes:
/// explicit platform > use-case category > generic optical pair.
pub fn keyword_fallback(query: &str) -> Vec<String> {
    let q = query.to_lowercase();
    let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    // Explicit platform mentions dominate
    if any(&q, &["sentinel-1", "sentinel 1", "sar", "radar"]) {
        return ids(&["sentinel-1-grd"]);
    }
    if any(&q, &["sentinel-2", "sentinel 2"]) {
        return ids(&["sentinel-2-l2a"]);
    }
    if any(&q, &["landsat"]) {
        return ids(&["landsat-c2-l2"]);
    }
    if any(&q, &["naip", "aerial"]) {
        return ids(&["naip"]);
    }
    if any(&q, &["hls", "harmonized landsat"]) {
        return ids(&["hls2-l30", "hls2-s30"]);
    }
    if q.contains("modis") {
        // Route to the right MODIS product family
        if any(&q, &["fire", "thermal", "anomal", "heat", "burn"]) {
            return ids(&["modis-14A1-061", "modis-14A2-061", "modis-64A1-061"]);
        }
        if any(&q, &["vegetation", "ndvi", "greenness", "leaf"]) {
            return ids(&["modis-13Q1-061"]);
        }
        if any(&q, &["snow", "ice"]) {
            return ids(&["modis-10A1-061", "modis-10A2-061"]);
        }
        if any(&q, &["temperature", "lst"]) {
            return ids(&["modis-11A1-061"]);
        }
        if any(&q, &["reflectance", "optical"]) {
            return ids(&["modis-09A1-061"]);
        }
        return ids(&["modis-14A1-061", "modis-14A2-061"]);
    }

    // Use-case keywords
    if any(&q, &["elevation", "dem", "topography", "terrain", "altitude", "slope", "contour"]) {
        return ids(&["cop-dem-glo-30", "nasadem"]);
    }
    if any(&q, &["fire", "wildfire", "burn"]) {
        return ids(&["modis-14A1-061", "modis-14A2-061"]);
    }
    if any(&q, &["flood", "inundation", "hurricane", "storm surge"]) {
        return ids(&["sentinel-1-grd"]);
    }
    if any(&q, &["vegetation", "ndvi", "forest", "crop", "agriculture"]) {
        return ids(&["sentinel-2-l2a", "modis-13Q1-061"]);
    }
    if any(&q, &["snow", "glacier", "ice cover"]) {
        return ids(&["modis-10A1-061", "modis-10A2-061"]);
    }
    if any(&q, &["climate", "weather", "precipitation", "rainfall", "temperature"]) {
        return ids(&["era5-pds", "daymet-daily-na"]);
    }
    if any(&q, &["air quality", "pollution", "aerosol", "emission", "no2"]) {
        return ids(&["sentinel-5p-l2"]);
    }
    if any(&q, &["land cover", "land use", "lulc"]) {
        return ids(&["esa-worldcover", "io-lulc-annual-v02"]);
    }

    // Generic satellite imagery
    ids(&["sentinel-2-l2a", "landsat-c2-l2"])
}
