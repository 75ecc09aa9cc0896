use crate::agents::datetime::DatetimeRange;
use crate::models::response::{FilterSnapshot, RelaxationRecord};
use crate::models::stac::StacQuery;
use crate::registry::Registry;

/// Ceiling for a relaxed cloud threshold; beyond this the filter is noise.
const MAX_CLOUD_PERCENT: u64 = 95;

/// One relaxed re-run: the query to execute and the record explaining
/// what changed relative to the user's request.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub stac: StacQuery,
    pub record: RelaxationRecord,
}

/// Capture the user-meaningful filters of a query for the record.
pub fn snapshot(registry: &Registry, stac: &StacQuery) -> FilterSnapshot {
    let cloud_cover = stac.query.as_ref().and_then(|filters| {
        stac.collections
            .iter()
            .filter_map(|id| registry.cloud_cover_property(id))
            .find_map(|prop| filters.get(prop))
            .and_then(|v| v.get("lt"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u8)
    });
    FilterSnapshot {
        cloud_cover,
        datetime: stac.datetime.clone(),
        collections: stac.collections.clone(),
    }
}

/// Build the ladder of relaxed queries to try after an empty result, in
/// order: looser clouds, wider dates, then a single versatile collection.
/// Relaxations compound, and every rung records original vs. executed
/// filters.
pub fn relaxation_ladder(registry: &Registry, original: &StacQuery) -> Vec<Attempt> {
    let original_filters = snapshot(registry, original);
    let mut attempts = Vec::new();
    let mut current = original.clone();

    // Rung 1: raise the cloud ceiling by 25 points
    if let Some(threshold) = original_filters.cloud_cover {
        let relaxed = (threshold as u64 + 25).min(MAX_CLOUD_PERCENT) as u8;
        if relaxed > threshold {
            if let Some(filters) = current.query.as_mut() {
                for id in &current.collections {
                    if let Some(prop) = registry.cloud_cover_property(id) {
                        if filters.contains_key(prop) {
                            filters.insert(
                                prop.to_string(),
                                serde_json::json!({"lt": relaxed}),
                            );
                        }
                    }
                }
            }
            attempts.push(Attempt {
                stac: current.clone(),
                record: RelaxationRecord {
                    original_filters: original_filters.clone(),
                    alternative_filters: snapshot(registry, &current),
                    explanation: format!(
                        "No imagery matched under {threshold}% cloud cover; the ceiling was \
                         raised to {relaxed}%."
                    ),
                },
            });
        }
    }

    // Rung 2: double the temporal window
    if let Some(range) = original.datetime.as_deref().and_then(DatetimeRange::parse) {
        let widened = range.widen();
        if widened != range {
            current.datetime = Some(widened.format());
            attempts.push(Attempt {
                stac: current.clone(),
                record: RelaxationRecord {
                    original_filters: original_filters.clone(),
                    alternative_filters: snapshot(registry, &current),
                    explanation: format!(
                        "Nothing was acquired in {}; the search window was widened to {}.",
                        range.format(),
                        widened.format()
                    ),
                },
            });
        }
    }

    // Rung 3: collapse to the most versatile single collection
    if original.collections.len() > 1 {
        let survivor = registry.most_versatile(&original.collections);
        current.collections = vec![survivor.clone()];
        // A narrower collection set can change which filters still apply
        if let Some(filters) = current.query.as_mut() {
            filters.retain(|key, _| {
                key != "eo:cloud_cover" || registry.supports_cloud_filtering(&survivor)
            });
            if filters.is_empty() {
                current.query = None;
            }
        }
        attempts.push(Attempt {
            stac: current.clone(),
            record: RelaxationRecord {
                original_filters: original_filters.clone(),
                alternative_filters: snapshot(registry, &current),
                explanation: format!(
                    "None of the requested collections returned data; retrying with {survivor} \
                     alone."
                ),
            },
        });
    }

    attempts
}
