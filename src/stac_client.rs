use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::PipelineError;
use crate::models::stac::{FeatureCollection, StacFeature, StacQuery};

/// The search capability the orchestrator depends on; a seam for tests.
#[async_trait]
pub trait StacSearch: Send + Sync {
    async fn search(&self, query: &StacQuery) -> Result<Vec<StacFeature>, PipelineError>;
}

/// Thin client over the STAC Item Search endpoint. Retries transient
/// failures once, keeps upstream ordering, and drops malformed features
/// at the door.
pub struct StacClient {
    client: reqwest::Client,
    search_url: String,
    deadline: Duration,
}

impl StacClient {
    pub fn new(client: reqwest::Client, search_url: String, deadline: Duration) -> Self {
        StacClient {
            client,
            search_url,
            deadline,
        }
    }

    pub fn collections_base(&self) -> String {
        // ".../search" -> the API root, for the registry's metadata probe
        self.search_url
            .trim_end_matches('/')
            .trim_end_matches("search")
            .trim_end_matches('/')
            .to_string()
    }

    async fn search_with_retry(&self, query: &StacQuery) -> Result<Vec<StacFeature>, PipelineError> {
        match self.search_once(query).await {
            Ok(features) => Ok(features),
            Err(e) if is_transient(&e) => {
                let jitter_ms = rand::rng().random_range(200..600);
                tracing::warn!("stac search: transient failure ({e}), retrying after {jitter_ms}ms");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                self.search_once(query).await
            }
            Err(e) => Err(e),
        }
    }

    async fn search_once(&self, query: &StacQuery) -> Result<Vec<StacFeature>, PipelineError> {
        let resp = self
            .client
            .post(&self.search_url)
            .json(query)
            .send()
            .await
            .map_err(|e| PipelineError::StacUpstream(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::StacUpstream(format!("status {status}")));
        }

        let fc: FeatureCollection = resp
            .json()
            .await
            .map_err(|e| PipelineError::StacUpstream(format!("bad response body: {e}")))?;

        let raw = fc.features.len();
        let features: Vec<StacFeature> =
            fc.features.into_iter().filter(StacFeature::is_well_formed).collect();
        if features.len() < raw {
            tracing::warn!("stac search: dropped {} malformed feature(s)", raw - features.len());
        }
        tracing::info!("stac search: {} feature(s) returned", features.len());
        Ok(features)
    }
}

#[async_trait]
impl StacSearch for StacClient {
    async fn search(&self, query: &StacQuery) -> Result<Vec<StacFeature>, PipelineError> {
        let result = tokio::time::timeout(self.deadline, self.search_with_retry(query)).await;
        match result {
            Ok(r) => r,
            Err(_) => Err(PipelineError::StacUpstream(format!(
                "search timed out after {:?}",
                self.deadline
            ))),
        }
    }
}

fn is_transient(e: &PipelineError) -> bool {
    match e {
        PipelineError::StacUpstream(msg) => {
            msg.contains("status 5") || msg.contains("timed out") || msg.contains("error sending")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_base_strips_search_suffix() {
        let c = StacClient::new(
            reqwest::Client::new(),
            "https://example.com/api/stac/v1/search".to_string(),
            Duration::from_secs(30),
        );
        assert_eq!(c.collections_base(), "https://example.com/api/stac/v1");
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient(&PipelineError::StacUpstream("status 503".into())));
        assert!(!is_transient(&PipelineError::StacUpstream("status 400".into())));
        assert!(!is_transient(&PipelineError::EmptyInput));
    }
}
