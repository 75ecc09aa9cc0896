use crate::models::bbox::BBox;
use crate::models::stac::StacFeature;

/// Fraction of the TILE covered by the requested box. The tile is the
/// denominator so that one full-coverage tile over a large request still
/// scores 1.0 instead of vanishing.
pub fn tile_overlap(request: &BBox, tile: &BBox) -> f64 {
    let tile_area = tile.area_deg2();
    if tile_area <= 0.0 {
        return 0.0;
    }
    request.intersection_deg2(tile) / tile_area
}

/// Fraction of the REQUEST covered by the tile, used by coverage scoring.
pub fn request_coverage(request: &BBox, tile: &BBox) -> f64 {
    let request_area = request.area_deg2();
    if request_area <= 0.0 {
        return 0.0;
    }
    request.intersection_deg2(tile) / request_area
}

/// Drop features whose footprint barely touches the requested box.
pub fn filter_by_overlap(
    features: Vec<StacFeature>,
    request: &BBox,
    min_overlap: f64,
) -> Vec<StacFeature> {
    let before = features.len();
    let kept: Vec<StacFeature> = features
        .into_iter()
        .filter(|f| {
            f.bounds()
                .map(|tile| tile_overlap(request, &tile) >= min_overlap)
                .unwrap_or(false)
        })
        .collect();
    if kept.len() < before {
        tracing::debug!(
            "spatial filter: {} -> {} feature(s) at min_overlap {min_overlap}",
            before,
            kept.len()
        );
    }
    kept
}
