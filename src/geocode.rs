use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::llm::LlmGateway;
use crate::models::bbox::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    City,
    State,
    Country,
    Region,
    Landmark,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::City => "city",
            LocationType::State => "state",
            LocationType::Country => "country",
            LocationType::Region => "region",
            LocationType::Landmark => "landmark",
        }
    }
}

/// One geocoding back-end. Returning `Ok(None)` means "no match", which
/// sends the resolver on to the next backend in the chain.
#[async_trait]
pub trait LocationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(
        &self,
        place: &str,
        hint: LocationType,
    ) -> Result<Option<BBox>, anyhow::Error>;
}

// ---------------------------------------------------------------------------
// Predefined regions
// ---------------------------------------------------------------------------

/// Zero-latency table of regions the service sees constantly. Checked
/// before any network backend.
pub struct PredefinedRegions;

fn predefined(place: &str) -> Option<BBox> {
    let key = place.trim().to_lowercase();
    let b = |w, s, e, n| BBox([w, s, e, n]);
    let bbox = match key.as_str() {
        "seattle" => b(-122.46, 47.48, -122.22, 47.73),
        "new york" | "new york city" | "nyc" | "manhattan" => b(-74.26, 40.49, -73.70, 40.92),
        "houston" => b(-95.79, 29.52, -95.01, 30.11),
        "miami" => b(-80.32, 25.70, -80.13, 25.86),
        "san francisco" => b(-122.52, 37.70, -122.35, 37.83),
        "los angeles" => b(-118.67, 33.70, -118.16, 34.34),
        "denver" => b(-105.11, 39.61, -104.60, 39.91),
        "chicago" => b(-87.94, 41.64, -87.52, 42.02),
        "california" => b(-124.41, 32.53, -114.13, 42.01),
        "southern california" => b(-120.0, 32.5, -114.13, 35.8),
        "texas" => b(-106.65, 25.84, -93.51, 36.50),
        "florida" => b(-87.63, 24.52, -80.03, 31.00),
        "colorado" => b(-109.06, 36.99, -102.04, 41.00),
        "washington" | "washington state" => b(-124.85, 45.54, -116.92, 49.00),
        "new york state" => b(-79.76, 40.50, -71.86, 45.02),
        "alaska" => b(-179.15, 51.21, -129.98, 71.44),
        "hawaii" => b(-160.25, 18.91, -154.81, 22.24),
        "united states" | "usa" | "us" | "continental us" => b(-124.85, 24.40, -66.89, 49.38),
        "australia" => b(112.92, -43.74, 153.64, -10.06),
        "japan" => b(129.41, 31.03, 145.54, 45.55),
        "europe" => b(-10.59, 34.56, 31.59, 71.18),
        "amazon" | "amazon rainforest" => b(-73.99, -13.00, -50.00, 2.00),
        "sahara" | "sahara desert" => b(-17.0, 15.0, 38.0, 30.0),
        "himalayas" => b(73.0, 26.0, 95.0, 36.0),
        "rocky mountains" | "rockies" => b(-117.0, 35.0, -105.0, 49.0),
        _ => return None,
    };
    Some(bbox)
}

#[async_trait]
impl LocationBackend for PredefinedRegions {
    fn name(&self) -> &'static str {
        "predefined"
    }

    async fn lookup(
        &self,
        place: &str,
        _hint: LocationType,
    ) -> Result<Option<BBox>, anyhow::Error> {
        Ok(predefined(place))
    }
}

// ---------------------------------------------------------------------------
// HTTP geocoders
// ---------------------------------------------------------------------------

/// Azure-Maps-shaped address search (viewport corners in the response).
pub struct AzureMapsBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AzureMapsBackend {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        AzureMapsBackend {
            client,
            api_key,
            base_url: "https://atlas.microsoft.com/search/address/json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AzureSearchResponse {
    #[serde(default)]
    results: Vec<AzureResult>,
}

#[derive(Debug, Deserialize)]
struct AzureResult {
    viewport: Option<AzureViewport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureViewport {
    top_left_point: AzurePoint,
    btm_right_point: AzurePoint,
}

#[derive(Debug, Deserialize)]
struct AzurePoint {
    lat: f64,
    lon: f64,
}

#[async_trait]
impl LocationBackend for AzureMapsBackend {
    fn name(&self) -> &'static str {
        "azure-maps"
    }

    async fn lookup(
        &self,
        place: &str,
        _hint: LocationType,
    ) -> Result<Option<BBox>, anyhow::Error> {
        let url = format!(
            "{}?api-version=1.0&query={}&limit=1&subscription-key={}",
            self.base_url,
            urlencoding::encode(place),
            self.api_key,
        );
        let resp: AzureSearchResponse = self.client.get(&url).send().await?.json().await?;
        let Some(viewport) = resp.results.into_iter().next().and_then(|r| r.viewport) else {
            return Ok(None);
        };
        Ok(BBox::new(
            viewport.top_left_point.lon,
            viewport.btm_right_point.lat,
            viewport.btm_right_point.lon,
            viewport.top_left_point.lat,
        ))
    }
}

/// Mapbox-shaped forward geocoding (bbox directly on the feature).
pub struct MapboxBackend {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl MapboxBackend {
    pub fn new(client: reqwest::Client, token: String) -> Self {
        MapboxBackend {
            client,
            token,
            base_url: "https://api.mapbox.com/geocoding/v5/mapbox.places".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MapboxResponse {
    #[serde(default)]
    features: Vec<MapboxFeature>,
}

#[derive(Debug, Deserialize)]
struct MapboxFeature {
    bbox: Option<[f64; 4]>,
    center: Option<[f64; 2]>,
}

#[async_trait]
impl LocationBackend for MapboxBackend {
    fn name(&self) -> &'static str {
        "mapbox"
    }

    async fn lookup(
        &self,
        place: &str,
        _hint: LocationType,
    ) -> Result<Option<BBox>, anyhow::Error> {
        let url = format!(
            "{}/{}.json?limit=1&access_token={}",
            self.base_url,
            urlencoding::encode(place),
            self.token,
        );
        let resp: MapboxResponse = self.client.get(&url).send().await?.json().await?;
        let Some(feature) = resp.features.into_iter().next() else {
            return Ok(None);
        };
        if let Some([w, s, e, n]) = feature.bbox {
            return Ok(BBox::new(w, s, e, n));
        }
        // Point-only results (addresses, POIs) get a small framing box
        if let Some([lon, lat]) = feature.center {
            return Ok(BBox::around_point(lat, lon, 3.0));
        }
        Ok(None)
    }
}

/// Nominatim-shaped free-text search. Last resort before the LLM because
/// it is rate-limited and fuzzy, but it needs no API key.
pub struct NominatimBackend {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimBackend {
    pub fn new(client: reqwest::Client) -> Self {
        NominatimBackend {
            client,
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResult {
    // [south, north, west, east], stringly typed
    boundingbox: Option<[String; 4]>,
}

#[async_trait]
impl LocationBackend for NominatimBackend {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn lookup(
        &self,
        place: &str,
        _hint: LocationType,
    ) -> Result<Option<BBox>, anyhow::Error> {
        let url = format!(
            "{}?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(place),
        );
        let resp: Vec<NominatimResult> = self
            .client
            .get(&url)
            .header("User-Agent", "terra-api/0.1")
            .send()
            .await?
            .json()
            .await?;
        let Some([s, n, w, e]) = resp.into_iter().next().and_then(|r| r.boundingbox) else {
            return Ok(None);
        };
        let (s, n, w, e) = (s.parse()?, n.parse()?, w.parse()?, e.parse()?);
        Ok(BBox::new(w, s, e, n))
    }
}

/// LLM-derived bounding box: the last rung on the ladder, for places no
/// geocoder knows ("the Ring of Fire").
pub struct LlmGeocodeBackend {
    gateway: std::sync::Arc<LlmGateway>,
}

impl LlmGeocodeBackend {
    pub fn new(gateway: std::sync::Arc<LlmGateway>) -> Self {
        LlmGeocodeBackend { gateway }
    }
}

#[derive(Debug, Deserialize)]
struct LlmBBoxReply {
    west: Option<f64>,
    south: Option<f64>,
    east: Option<f64>,
    north: Option<f64>,
}

const GEOCODE_SYSTEM: &str = "You are a geographic gazetteer. Given a place name, reply with a \
JSON object {\"west\": number, \"south\": number, \"east\": number, \"north\": number} giving a \
bounding box in WGS84 degrees that frames the place. If the place is unknown to you, reply with \
all four values null.";

#[async_trait]
impl LocationBackend for LlmGeocodeBackend {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn lookup(
        &self,
        place: &str,
        hint: LocationType,
    ) -> Result<Option<BBox>, anyhow::Error> {
        let user = format!("Place: {place}\nKind: {}", hint.as_str());
        let reply: LlmBBoxReply = self
            .gateway
            .complete_json(GEOCODE_SYSTEM, &user, 200, Duration::from_secs(10))
            .await?;
        match (reply.west, reply.south, reply.east, reply.north) {
            (Some(w), Some(s), Some(e), Some(n)) => Ok(BBox::new(w, s, e, n)),
            _ => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache + resolver
// ---------------------------------------------------------------------------

struct CacheEntry {
    bbox: BBox,
    inserted: Instant,
    last_used: Instant,
}

/// TTL + LRU cache over resolved places, mutex-guarded. Hits refresh the
/// LRU stamp but not the TTL.
pub struct LocationCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl LocationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        LocationCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    fn key(place: &str, hint: LocationType) -> String {
        format!("{}:{}", hint.as_str(), place.trim().to_lowercase())
    }

    pub fn get(&self, place: &str, hint: LocationType) -> Option<BBox> {
        let key = Self::key(place, hint);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&key)?;
        if entry.inserted.elapsed() > self.ttl {
            entries.remove(&key);
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.bbox)
    }

    pub fn put(&self, place: &str, hint: LocationType, bbox: BBox) {
        let key = Self::key(place, hint);
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                bbox,
                inserted: now,
                last_used: now,
            },
        );
        if entries.len() > self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Walks the backend chain in order and returns the first valid bbox.
pub struct LocationResolver {
    backends: Vec<Box<dyn LocationBackend>>,
    cache: LocationCache,
    per_backend: Duration,
    total: Duration,
}

impl LocationResolver {
    pub fn new(
        backends: Vec<Box<dyn LocationBackend>>,
        cache: LocationCache,
        per_backend: Duration,
        total: Duration,
    ) -> Self {
        LocationResolver {
            backends,
            cache,
            per_backend,
            total,
        }
    }

    pub async fn resolve(&self, place: &str, hint: LocationType) -> Result<BBox, PipelineError> {
        if let Some(bbox) = self.cache.get(place, hint) {
            tracing::debug!("geocode: cache hit for '{place}'");
            return Ok(bbox);
        }

        let started = Instant::now();
        for backend in &self.backends {
            if started.elapsed() >= self.total {
                tracing::warn!("geocode: total budget exhausted before '{}'", backend.name());
                break;
            }
            let budget = self.per_backend.min(self.total.saturating_sub(started.elapsed()));
            let result =
                tokio::time::timeout(budget, backend.lookup(place, hint)).await;
            match result {
                Ok(Ok(Some(bbox))) if bbox.is_valid() => {
                    tracing::info!("geocode: '{place}' resolved via {}", backend.name());
                    self.cache.put(place, hint, bbox);
                    return Ok(bbox);
                }
                Ok(Ok(Some(_))) => {
                    tracing::warn!("geocode: {} returned invalid bbox for '{place}'", backend.name());
                }
                Ok(Ok(None)) => {
                    tracing::debug!("geocode: {} had no match for '{place}'", backend.name());
                }
                Ok(Err(e)) => {
                    tracing::warn!("geocode: {} failed for '{place}': {e}", backend.name());
                }
                Err(_) => {
                    tracing::warn!("geocode: {} timed out for '{place}'", backend.name());
                }
            }
        }
        Err(PipelineError::UnresolvedLocation(place.to_string()))
    }
}
