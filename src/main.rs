mod agents;
mod composer;
mod config;
mod context;
mod error;
mod geocode;
mod handlers;
mod llm;
mod models;
mod negotiator;
mod orchestrator;
mod query_builder;
mod registry;
mod spatial;
mod stac_client;
mod tile_selector;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use agents::clouds::CloudFilterAgent;
use agents::collections::CollectionMapper;
use agents::datetime::DatetimeTranslator;
use agents::intent::IntentClassifier;
use agents::location::LocationExtractor;
use composer::Composer;
use config::TerraConfig;
use geocode::{
    AzureMapsBackend, LlmGeocodeBackend, LocationBackend, LocationCache, LocationResolver,
    MapboxBackend, NominatimBackend, PredefinedRegions,
};
use llm::{HttpChatCompleter, LlmGateway};
use orchestrator::Orchestrator;
use registry::Registry;
use stac_client::StacClient;
use tile_selector::TileSelector;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("terra_api=debug,tower_http=debug")
        }))
        .init();

    let config_path = std::env::var("TERRA_CONFIG").unwrap_or_else(|_| "./terra.toml".to_string());
    let config = TerraConfig::load(&config_path)?;

    let stac_url = std::env::var("TERRA_STAC_URL").unwrap_or_else(|_| {
        "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
    });
    let llm_url = std::env::var("TERRA_LLM_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
    let llm_key = std::env::var("TERRA_LLM_API_KEY").unwrap_or_default();
    let llm_model = std::env::var("TERRA_LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
    if llm_key.is_empty() {
        tracing::warn!("TERRA_LLM_API_KEY not set; every agent will run on rule-based fallbacks");
    }

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let gateway = Arc::new(LlmGateway::new(Box::new(HttpChatCompleter::new(
        http.clone(),
        llm_url,
        llm_key,
        llm_model,
    ))));

    // Geocoder chain in cost order; keyless backends are always present
    let mut backends: Vec<Box<dyn LocationBackend>> = vec![Box::new(PredefinedRegions)];
    match std::env::var("TERRA_MAPS_API_KEY") {
        Ok(key) if !key.is_empty() => {
            backends.push(Box::new(AzureMapsBackend::new(http.clone(), key)));
        }
        _ => tracing::info!("TERRA_MAPS_API_KEY not set; primary geocoder disabled"),
    }
    match std::env::var("TERRA_MAPBOX_TOKEN") {
        Ok(token) if !token.is_empty() => {
            backends.push(Box::new(MapboxBackend::new(http.clone(), token)));
        }
        _ => tracing::info!("TERRA_MAPBOX_TOKEN not set; secondary geocoder disabled"),
    }
    backends.push(Box::new(NominatimBackend::new(http.clone())));
    backends.push(Box::new(LlmGeocodeBackend::new(gateway.clone())));

    let resolver = LocationResolver::new(
        backends,
        LocationCache::new(
            std::time::Duration::from_secs(config.cache.location_ttl_hours * 3600),
            config.cache.location_capacity,
        ),
        config.timeouts.geocoder_backend(),
        config.timeouts.geocoder_total(),
    );

    let registry = Arc::new(Registry::new());
    let stac = StacClient::new(http.clone(), stac_url.clone(), config.timeouts.stac());
    tracing::info!("stac search endpoint: {stac_url}");

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        IntentClassifier::new(gateway.clone(), config.timeouts.intent()),
        CollectionMapper::new(gateway.clone(), registry.clone(), config.timeouts.agent()),
        LocationExtractor::new(gateway.clone(), config.timeouts.agent()),
        DatetimeTranslator::new(gateway.clone(), config.timeouts.agent()),
        CloudFilterAgent::new(gateway.clone(), config.timeouts.agent()),
        resolver,
        Box::new(stac),
        TileSelector::new(gateway.clone(), registry.clone(), config.timeouts.agent()),
        Composer::new(gateway.clone(), registry, config.timeouts.intent()),
        config,
    ));

    let state = AppState { orchestrator };

    let app = Router::new()
        .route("/api/v1/query", post(handlers::query::translate_query))
        .route(
            "/api/v1/sessions/{session_id}/reset",
            post(handlers::sessions::reset_session),
        )
        .route("/healthz", get(handlers::health::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = std::env::var("TERRA_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
