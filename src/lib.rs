//! # Route Prototype
//!
//! GPS route matching and prototype clustering for activity tracking.
//!
//! Given a new activity's GPS track, this library decides whether it follows
//! the same physical route as a previously recorded activity, clustering
//! matching activities under a shared prototype without comparing every
//! stored pair:
//!
//! - a cheap feature pre-filter (centroid + path length) shortlists
//!   candidate prototypes
//! - dynamic time warping aligns the track against each shortlisted
//!   prototype, closest centroid first, stopping at the first tight match
//! - the [`PrototypeRegistry`] records the outcome behind an injectable
//!   store abstraction
//!
//! ## Features
//!
//! - **`parallel`** - Align shortlisted prototypes on a rayon pool
//! - **`persistence`** - SQLite-backed prototype mapping store
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_prototype::{GeoPoint, MatchingConfig, MemoryStore, PrototypeRegistry};
//!
//! let track: Vec<GeoPoint> = (0..10)
//!     .map(|i| GeoPoint::new(51.5074 + i as f64 * 0.001, -0.1278, 1_700_000_000 + i as i64))
//!     .collect();
//!
//! let mut registry =
//!     PrototypeRegistry::new(MemoryStore::new(), MatchingConfig::default()).unwrap();
//!
//! let first = registry.register("morning-run", &track).unwrap();
//! let second = registry.register("evening-run", &track).unwrap();
//!
//! assert!(first.is_new_prototype());
//! assert_eq!(second.prototype_id, "morning-run");
//! ```

use geo::{algorithm::simplify::SimplifyIdx, Coord, LineString};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{MatchError, Result};

// Geographic utilities (distance, path length, centroid calculations)
pub mod geo_utils;

// Dynamic time warping alignment kernel
pub mod dtw;
pub use dtw::alignment_cost;

// Loose and tight matching decisions
pub mod matching;
pub use matching::{loose_match, tight_match, LooseMatch, TightMatch};

// Prototype registry and store abstraction
pub mod registry;
pub use registry::{with_registry, MemoryStore, PrototypeRegistry, PrototypeStore, REGISTRY};

// SQLite-backed prototype store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of an activity, assigned by the ingestion collaborator.
pub type ActivityId = String;

/// Fewest points a track needs before features can be derived from it.
pub const MINIMUM_TRACK_POINTS: usize = 2;

/// A recorded GPS point: coordinates plus the capture time in unix seconds.
///
/// # Example
/// ```
/// use route_prototype::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278, 1_700_000_000); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

impl GeoPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Feature vector derived from a track, used for loose matching.
///
/// Computed once per activity; tracks are immutable after ingestion, so the
/// features never need recomputing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFeatures {
    /// Number of points in the track
    pub point_count: usize,
    /// Cumulative great-circle length in meters
    pub path_length: f64,
    /// Arithmetic mean latitude
    pub centroid_lat: f64,
    /// Arithmetic mean longitude
    pub centroid_lon: f64,
    /// Population standard deviation of latitudes
    pub lat_stddev: f64,
    /// Population standard deviation of longitudes
    pub lon_stddev: f64,
}

impl RouteFeatures {
    /// Derive the feature vector from a raw track.
    ///
    /// Pure function of the points; fails with
    /// [`MatchError::InsufficientData`] for tracks shorter than
    /// [`MINIMUM_TRACK_POINTS`].
    pub fn from_track(activity_id: &str, points: &[GeoPoint]) -> Result<Self> {
        if points.len() < MINIMUM_TRACK_POINTS {
            return Err(MatchError::InsufficientData {
                activity_id: activity_id.to_string(),
                point_count: points.len(),
                minimum_required: MINIMUM_TRACK_POINTS,
            });
        }

        let (centroid_lat, centroid_lon) = geo_utils::compute_center(points);
        let (lat_stddev, lon_stddev) = geo_utils::compute_spread(points);

        Ok(Self {
            point_count: points.len(),
            path_length: geo_utils::path_length(points),
            centroid_lat,
            centroid_lon,
            lat_stddev,
            lon_stddev,
        })
    }
}

/// Outcome of registering one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Prototype the activity was assigned to (its own id when it became a
    /// new prototype)
    pub prototype_id: ActivityId,
    /// Normalized alignment distance to the prototype; `None` when the
    /// activity became a new prototype
    pub tight_distance: Option<f64>,
}

impl MatchResult {
    /// Whether the activity was promoted to a new prototype.
    pub fn is_new_prototype(&self) -> bool {
        self.tight_distance.is_none()
    }
}

/// Configuration for the matching pipeline.
///
/// Thresholds are opaque numeric knobs supplied by the configuration
/// collaborator; their comparison semantics are documented on
/// [`loose_match`] and [`tight_match`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Maximum centroid separation for a loose match, in meters.
    /// Default: 500.0
    pub match_center_threshold: f64,

    /// Maximum path-length difference for a loose match, as a ratio of the
    /// longer track. Default: 0.20
    pub match_length_threshold: f64,

    /// Maximum normalized alignment distance for a tight match.
    /// Default: 0.6 (admits resampled recordings of the same route)
    pub tight_match_threshold: f64,

    /// Safety cap on the n·m cost-matrix size of a single alignment.
    /// Comparisons above the cap are skipped, not computed. Default: 25M
    /// (two tracks of ~5000 points each)
    pub dtw_cell_cap: u64,

    /// Optional Sakoe-Chiba band half-width around the scaled diagonal.
    /// Default: none (full matrix)
    pub dtw_band: Option<usize>,

    /// Optional Douglas-Peucker tolerance (degrees) applied to tracks
    /// before alignment. Default: none (tracks are aligned as recorded)
    pub simplification_tolerance: Option<f64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            match_center_threshold: 500.0,
            match_length_threshold: 0.20,
            tight_match_threshold: 0.6,
            dtw_cell_cap: 25_000_000,
            dtw_band: None,
            simplification_tolerance: None,
        }
    }
}

impl MatchingConfig {
    /// Validate the configuration.
    ///
    /// Thresholds must be finite and non-negative, the cell cap positive.
    /// Fails with [`MatchError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("match_center_threshold", self.match_center_threshold),
            ("match_length_threshold", self.match_length_threshold),
            ("tight_match_threshold", self.tight_match_threshold),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(MatchError::InvalidConfig {
                    message: format!("{} must be a non-negative number, got {}", name, value),
                });
            }
        }
        if self.dtw_cell_cap == 0 {
            return Err(MatchError::InvalidConfig {
                message: "dtw_cell_cap must be positive".to_string(),
            });
        }
        if let Some(tolerance) = self.simplification_tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(MatchError::InvalidConfig {
                    message: format!(
                        "simplification_tolerance must be a non-negative number, got {}",
                        tolerance
                    ),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Track Preparation
// ============================================================================

/// Reduce a track with Douglas-Peucker simplification, keeping the original
/// points (and their timestamps) at the retained indices.
///
/// Used as an optional preprocessing step before alignment to bound DTW
/// cost on very dense recordings. Tracks with fewer than 3 points are
/// returned unchanged.
pub fn reduce_track(points: &[GeoPoint], tolerance: f64) -> Vec<GeoPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let line = LineString::new(
        points
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect(),
    );
    let retained = line.simplify_idx(&tolerance);
    retained.into_iter().map(|i| points[i]).collect()
}

// ============================================================================
// Tests
// ============================================================================
