pub mod agents;
pub mod composer;
pub mod config;
pub mod context;
pub mod error;
pub mod geocode;
pub mod handlers;
pub mod llm;
pub mod models;
pub mod negotiator;
pub mod orchestrator;
pub mod query_builder;
pub mod registry;
pub mod spatial;
pub mod stac_client;
pub mod tile_selector;

use std::sync::Arc;

use orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}
