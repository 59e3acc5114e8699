//! Loose and tight route matching.
//!
//! Matching a new activity against known prototypes is two-staged:
//! - [`loose_match`] is the cheap feature-vector pre-filter (centroid
//!   distance + path-length ratio) used to shortlist candidates
//! - [`tight_match`] thresholds the normalized DTW alignment cost of a
//!   shortlisted candidate
//!
//! The loose stage is a superset filter: tight matching is only ever
//! evaluated for pairs that already loose-match, so a loose miss means the
//! expensive alignment is never computed for that pair.

use crate::geo_utils::haversine_distance;
use crate::{GeoPoint, MatchingConfig, RouteFeatures};

/// Path lengths below this many meters are treated as zero.
const LENGTH_EPSILON: f64 = 1e-6;

/// Outcome of the loose feature comparison.
///
/// `center_distance` is returned even on a miss; the registry uses it to
/// order the shortlist so that the closest prototypes are aligned first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LooseMatch {
    pub matched: bool,
    pub center_distance: f64,
}

/// Outcome of the tight alignment comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TightMatch {
    pub matched: bool,
    /// Alignment cost normalized by the mean path length of the two tracks.
    pub distance: f64,
}

/// Cheap comparison of two feature vectors.
///
/// Matches when the centroids are within `match_center_threshold` meters
/// AND the path lengths differ by at most `match_length_threshold` as a
/// ratio of the longer track.
pub fn loose_match(
    candidate: &RouteFeatures,
    prototype: &RouteFeatures,
    config: &MatchingConfig,
) -> LooseMatch {
    let center_distance = haversine_distance(
        &GeoPoint::new(candidate.centroid_lat, candidate.centroid_lon, 0),
        &GeoPoint::new(prototype.centroid_lat, prototype.centroid_lon, 0),
    );
    let ratio = length_ratio(candidate.path_length, prototype.path_length);
    LooseMatch {
        matched: center_distance <= config.match_center_threshold
            && ratio <= config.match_length_threshold,
        center_distance,
    }
}

/// Relative difference of two path lengths, normalized by the longer one.
///
/// Two zero-length paths are identical (0.0); a zero-length path against a
/// real one is maximally dissimilar (1.0).
pub fn length_ratio(len1: f64, len2: f64) -> f64 {
    let both_zero = len1 < LENGTH_EPSILON && len2 < LENGTH_EPSILON;
    if both_zero {
        return 0.0;
    }
    if len1 < LENGTH_EPSILON || len2 < LENGTH_EPSILON {
        return 1.0;
    }
    (len1 - len2).abs() / len1.max(len2)
}

/// Threshold a raw DTW cost into a tight-match decision.
///
/// The cost is normalized by the mean path length of the two tracks, so the
/// decision is scale-free across short and long routes. Two essentially
/// stationary tracks are identical when the raw cost is also ~0, and
/// maximally distant otherwise.
pub fn tight_match(
    raw_cost: f64,
    candidate: &RouteFeatures,
    prototype: &RouteFeatures,
    config: &MatchingConfig,
) -> TightMatch {
    let combined = (candidate.path_length + prototype.path_length) / 2.0;
    let distance = if combined < LENGTH_EPSILON {
        if raw_cost < LENGTH_EPSILON {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        raw_cost / combined
    };
    TightMatch {
        matched: distance <= config.tight_match_threshold,
        distance,
    }
}
