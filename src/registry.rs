//! Prototype registry: owns the activity-to-prototype mapping and decides
//! whether a new activity joins an existing route cluster or starts one.
//!
//! The registry keeps derived state for prototypes only (features, prepared
//! tracks, a centroid R-tree) so that registering a new activity costs one
//! feature extraction, one spatial query, and a handful of alignments
//! instead of a pairwise comparison against every stored activity.
//!
//! The mapping itself lives behind the [`PrototypeStore`] abstraction so
//! tests can construct isolated registries and the storage collaborator can
//! choose its own durability strategy.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rstar::{RTree, RTreeObject, AABB};

use crate::dtw::alignment_cost;
use crate::error::{MatchError, Result};
use crate::geo_utils::meters_to_degrees;
use crate::matching::{loose_match, tight_match};
use crate::{reduce_track, ActivityId, GeoPoint, MatchResult, MatchingConfig, RouteFeatures};

/// Padding factor applied to the centroid-query envelope. The envelope is a
/// superset filter; the exact haversine test in [`loose_match`] decides.
const ENVELOPE_MARGIN: f64 = 1.05;

// ============================================================================
// Store Abstraction
// ============================================================================

/// Key-value abstraction over the activity-to-prototype mapping.
///
/// Every known activity has exactly one entry; prototypes map to themselves.
/// `entries` must preserve first-insertion order, which `rematch_all` relies
/// on to replay activities deterministically.
pub trait PrototypeStore {
    /// Look up the prototype id an activity maps to.
    fn get(&self, activity_id: &str) -> Result<Option<ActivityId>>;

    /// Record (or overwrite) the mapping for an activity.
    fn set(&mut self, activity_id: &str, prototype_id: &str) -> Result<()>;

    /// All mapping entries in first-insertion order.
    fn entries(&self) -> Result<Vec<(ActivityId, ActivityId)>>;

    /// Remove all entries.
    fn clear(&mut self) -> Result<()>;
}

/// In-memory [`PrototypeStore`], the default for tests and the singleton.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    order: Vec<ActivityId>,
    map: HashMap<ActivityId, ActivityId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrototypeStore for MemoryStore {
    fn get(&self, activity_id: &str) -> Result<Option<ActivityId>> {
        Ok(self.map.get(activity_id).cloned())
    }

    fn set(&mut self, activity_id: &str, prototype_id: &str) -> Result<()> {
        if !self.map.contains_key(activity_id) {
            self.order.push(activity_id.to_string());
        }
        self.map
            .insert(activity_id.to_string(), prototype_id.to_string());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(ActivityId, ActivityId)>> {
        Ok(self
            .order
            .iter()
            .filter_map(|id| self.map.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    fn clear(&mut self) -> Result<()> {
        self.order.clear();
        self.map.clear();
        Ok(())
    }
}

// ============================================================================
// Spatial Index
// ============================================================================

/// Prototype centroid entry for the R-tree pre-filter.
#[derive(Debug, Clone)]
struct PrototypeLocation {
    activity_id: ActivityId,
    latitude: f64,
    longitude: f64,
}

impl RTreeObject for PrototypeLocation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.longitude, self.latitude],
            [self.longitude, self.latitude],
        )
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Outcome of aligning one shortlisted prototype.
enum CandidateOutcome {
    Tight(f64),
    Miss,
    Skipped,
}

/// The prototype registry.
///
/// Holds the injected mapping store plus in-memory caches for the prototype
/// set. Methods take `&mut self`; concurrent registration must go through a
/// lock (see [`REGISTRY`] / [`with_registry`]) so that two new activities
/// cannot both become prototypes for what should be one cluster.
pub struct PrototypeRegistry<S: PrototypeStore> {
    store: S,
    config: MatchingConfig,
    prototype_features: HashMap<ActivityId, RouteFeatures>,
    prototype_tracks: HashMap<ActivityId, Vec<GeoPoint>>,
    prototype_order: Vec<ActivityId>,
    centroid_index: RTree<PrototypeLocation>,
}

impl<S: PrototypeStore> PrototypeRegistry<S> {
    /// Create a registry over an injected store.
    ///
    /// Fails with [`MatchError::InvalidConfig`] when any threshold is
    /// negative or non-finite; thresholds are validated here defensively
    /// even though the configuration collaborator should have validated
    /// them at load time.
    pub fn new(store: S, config: MatchingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            prototype_features: HashMap::new(),
            prototype_tracks: HashMap::new(),
            prototype_order: Vec::new(),
            centroid_index: RTree::new(),
        })
    }

    /// Rebuild a registry from an existing store and the tracks of the
    /// prototypes it records (the activities mapping to themselves).
    ///
    /// The storage collaborator owns the tracks; this constructor
    /// re-derives the in-memory prototype caches from them.
    pub fn from_parts(
        store: S,
        config: MatchingConfig,
        prototypes: Vec<(ActivityId, Vec<GeoPoint>)>,
    ) -> Result<Self> {
        let mut registry = Self::new(store, config)?;
        for (id, track) in prototypes {
            let features = RouteFeatures::from_track(&id, &track)?;
            let prepared = registry.prepare_track(&track);
            registry.insert_prototype(id, features, prepared);
        }
        Ok(registry)
    }

    /// Current matching configuration.
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// The injected mapping store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ids of all current prototypes, in the order they were promoted.
    pub fn prototypes(&self) -> &[ActivityId] {
        &self.prototype_order
    }

    /// Number of current prototypes.
    pub fn prototype_count(&self) -> usize {
        self.prototype_order.len()
    }

    /// The prototype id an activity maps to, if the activity is known.
    pub fn prototype_of(&self, activity_id: &str) -> Result<Option<ActivityId>> {
        self.store.get(activity_id)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Match a new activity against the known prototypes and record the
    /// outcome.
    ///
    /// Shortlisted prototypes are aligned in ascending centroid-distance
    /// order and the first tight match wins; if none matches, the activity
    /// becomes a new prototype. The call either fully commits one mapping
    /// entry or, on error, commits none.
    pub fn register(&mut self, activity_id: &str, track: &[GeoPoint]) -> Result<MatchResult> {
        let features = RouteFeatures::from_track(activity_id, track)?;
        let shortlist = self.shortlist(&features);
        debug!(
            "activity '{}': {} loose candidate(s) among {} prototype(s)",
            activity_id,
            shortlist.len(),
            self.prototype_order.len()
        );

        let prepared = self.prepare_track(track);
        let decision = self.first_tight_match(&prepared, &features, &shortlist)?;

        match decision {
            Some((prototype_id, distance)) => {
                self.store.set(activity_id, &prototype_id)?;
                debug!(
                    "activity '{}' matched prototype '{}' at distance {:.4}",
                    activity_id, prototype_id, distance
                );
                Ok(MatchResult {
                    prototype_id,
                    tight_distance: Some(distance),
                })
            }
            None => {
                self.store.set(activity_id, activity_id)?;
                self.insert_prototype(activity_id.to_string(), features, prepared);
                debug!("activity '{}' becomes a new prototype", activity_id);
                Ok(MatchResult {
                    prototype_id: activity_id.to_string(),
                    tight_distance: None,
                })
            }
        }
    }

    /// Loose-matching prototypes, sorted ascending by centroid distance
    /// (ties broken by id for determinism).
    fn shortlist(&self, features: &RouteFeatures) -> Vec<(ActivityId, f64)> {
        let (d_lat, d_lng) = meters_to_degrees(
            self.config.match_center_threshold,
            features.centroid_lat,
        );
        let envelope = AABB::from_corners(
            [
                features.centroid_lon - d_lng * ENVELOPE_MARGIN,
                features.centroid_lat - d_lat * ENVELOPE_MARGIN,
            ],
            [
                features.centroid_lon + d_lng * ENVELOPE_MARGIN,
                features.centroid_lat + d_lat * ENVELOPE_MARGIN,
            ],
        );

        let mut matches: Vec<(ActivityId, f64)> = self
            .centroid_index
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|location| {
                let prototype = self.prototype_features.get(&location.activity_id)?;
                let outcome = loose_match(features, prototype, &self.config);
                outcome
                    .matched
                    .then(|| (location.activity_id.clone(), outcome.center_distance))
            })
            .collect();

        matches.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        matches
    }

    /// Align the candidate against each shortlisted prototype and return the
    /// first tight match in shortlist order.
    ///
    /// An alignment that exceeds the cell cap is logged and treated as a
    /// non-match for that prototype only.
    fn first_tight_match(
        &self,
        candidate_track: &[GeoPoint],
        candidate: &RouteFeatures,
        shortlist: &[(ActivityId, f64)],
    ) -> Result<Option<(ActivityId, f64)>> {
        let outcomes = self.align_shortlist(candidate_track, candidate, shortlist)?;
        for ((prototype_id, _), outcome) in shortlist.iter().zip(outcomes) {
            match outcome {
                CandidateOutcome::Tight(distance) => {
                    return Ok(Some((prototype_id.clone(), distance)));
                }
                CandidateOutcome::Miss | CandidateOutcome::Skipped => {}
            }
        }
        Ok(None)
    }

    /// Sequential build: align candidates one at a time, stopping at the
    /// first tight match.
    #[cfg(not(feature = "parallel"))]
    fn align_shortlist(
        &self,
        candidate_track: &[GeoPoint],
        candidate: &RouteFeatures,
        shortlist: &[(ActivityId, f64)],
    ) -> Result<Vec<CandidateOutcome>> {
        let mut outcomes = Vec::with_capacity(shortlist.len());
        for (prototype_id, _) in shortlist {
            let outcome = align_candidate(
                candidate_track,
                candidate,
                prototype_id,
                &self.prototype_features,
                &self.prototype_tracks,
                &self.config,
            )?;
            let stop = matches!(outcome, CandidateOutcome::Tight(_));
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Parallel build: align every shortlisted candidate on the rayon pool,
    /// then let the caller consume the outcomes in shortlist order. This
    /// preserves the first-match-by-distance-order policy exactly, at the
    /// price of computing alignments the sequential build would skip.
    #[cfg(feature = "parallel")]
    fn align_shortlist(
        &self,
        candidate_track: &[GeoPoint],
        candidate: &RouteFeatures,
        shortlist: &[(ActivityId, f64)],
    ) -> Result<Vec<CandidateOutcome>> {
        use rayon::prelude::*;

        // Borrow the prototype caches up front so the closure stays Sync
        // whatever the store type is.
        let features = &self.prototype_features;
        let tracks = &self.prototype_tracks;
        let config = &self.config;

        shortlist
            .par_iter()
            .map(|(prototype_id, _)| {
                align_candidate(candidate_track, candidate, prototype_id, features, tracks, config)
            })
            .collect()
    }

    /// Apply the configured Douglas-Peucker reduction, when enabled.
    pub(crate) fn prepare_track(&self, track: &[GeoPoint]) -> Vec<GeoPoint> {
        match self.config.simplification_tolerance {
            Some(tolerance) => reduce_track(track, tolerance),
            None => track.to_vec(),
        }
    }

    pub(crate) fn insert_prototype(
        &mut self,
        activity_id: ActivityId,
        features: RouteFeatures,
        prepared_track: Vec<GeoPoint>,
    ) {
        self.centroid_index.insert(PrototypeLocation {
            activity_id: activity_id.clone(),
            latitude: features.centroid_lat,
            longitude: features.centroid_lon,
        });
        self.prototype_features.insert(activity_id.clone(), features);
        self.prototype_tracks.insert(activity_id.clone(), prepared_track);
        self.prototype_order.push(activity_id);
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Re-run registration for every activity in ingestion order against an
    /// empty registry, then replace this registry's state.
    ///
    /// Idempotent for unchanged inputs and configuration. The usual entry
    /// point after thresholds change.
    pub fn rematch_all(
        &mut self,
        activities: &[(ActivityId, Vec<GeoPoint>)],
        config: MatchingConfig,
    ) -> Result<BTreeMap<ActivityId, MatchResult>> {
        let results = self.rematch_all_with_progress(activities, config, |_, _| true)?;
        // The always-continue callback never interrupts.
        Ok(results.unwrap_or_default())
    }

    /// [`rematch_all`](Self::rematch_all) with an interruption hook.
    ///
    /// `progress(done, total)` is called before each activity; returning
    /// `false` abandons the batch. An abandoned or failed batch leaves the
    /// existing state untouched, so callers can retry or resume later from
    /// a [`snapshot_json`](Self::snapshot_json) checkpoint.
    pub fn rematch_all_with_progress<F>(
        &mut self,
        activities: &[(ActivityId, Vec<GeoPoint>)],
        config: MatchingConfig,
        mut progress: F,
    ) -> Result<Option<BTreeMap<ActivityId, MatchResult>>>
    where
        F: FnMut(usize, usize) -> bool,
    {
        let total = activities.len();
        let mut fresh = PrototypeRegistry::new(MemoryStore::new(), config.clone())?;
        let mut results = BTreeMap::new();

        for (done, (activity_id, track)) in activities.iter().enumerate() {
            if !progress(done, total) {
                info!("rematch interrupted after {}/{} activities", done, total);
                return Ok(None);
            }
            let result = fresh.register(activity_id, track)?;
            results.insert(activity_id.clone(), result);
        }

        // Rewrite the injected store, then swap the in-memory caches. The
        // store rewrite is the storage collaborator's transaction boundary.
        self.store.clear()?;
        for (activity_id, prototype_id) in fresh.store.entries()? {
            self.store.set(&activity_id, &prototype_id)?;
        }
        self.prototype_features = fresh.prototype_features;
        self.prototype_tracks = fresh.prototype_tracks;
        self.prototype_order = fresh.prototype_order;
        self.centroid_index = fresh.centroid_index;
        self.config = config;

        info!(
            "rematch complete: {} activities, {} prototypes",
            total,
            self.prototype_order.len()
        );
        Ok(Some(results))
    }

    /// Export the full activity-to-prototype mapping as JSON.
    ///
    /// Keys are sorted, so equal mappings serialize identically; this is
    /// the checkpoint surface for maintenance tooling.
    pub fn snapshot_json(&self) -> Result<String> {
        let mapping: BTreeMap<ActivityId, ActivityId> =
            self.store.entries()?.into_iter().collect();
        serde_json::to_string(&mapping).map_err(|e| MatchError::Storage {
            message: e.to_string(),
        })
    }
}

/// Align the candidate against one prototype.
///
/// An alignment that exceeds the cell cap is logged and reported as skipped;
/// the prototype simply does not match.
fn align_candidate(
    candidate_track: &[GeoPoint],
    candidate: &RouteFeatures,
    prototype_id: &str,
    prototype_features: &HashMap<ActivityId, RouteFeatures>,
    prototype_tracks: &HashMap<ActivityId, Vec<GeoPoint>>,
    config: &MatchingConfig,
) -> Result<CandidateOutcome> {
    let (Some(prototype), Some(prototype_track)) = (
        prototype_features.get(prototype_id),
        prototype_tracks.get(prototype_id),
    ) else {
        return Ok(CandidateOutcome::Skipped);
    };

    match alignment_cost(candidate_track, prototype_track, config) {
        Ok(raw_cost) => {
            let outcome = tight_match(raw_cost, candidate, prototype, config);
            if outcome.matched {
                Ok(CandidateOutcome::Tight(outcome.distance))
            } else {
                Ok(CandidateOutcome::Miss)
            }
        }
        Err(MatchError::TrackTooLarge { cells, cap }) => {
            warn!(
                "skipping prototype '{}': alignment needs {} cells, cap is {}",
                prototype_id, cells, cap
            );
            Ok(CandidateOutcome::Skipped)
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global registry instance.
///
/// Serializes concurrent `register` calls behind one lock: a shortlist read
/// and the subsequent mapping write happen under the same critical section.
pub static REGISTRY: Lazy<Mutex<PrototypeRegistry<MemoryStore>>> = Lazy::new(|| {
    Mutex::new(
        PrototypeRegistry::new(MemoryStore::new(), MatchingConfig::default())
            .expect("default configuration is valid"),
    )
});

/// Run a closure against the global registry.
pub fn with_registry<F, R>(f: F) -> R
where
    F: FnOnce(&mut PrototypeRegistry<MemoryStore>) -> R,
{
    let mut registry = REGISTRY.lock().unwrap();
    f(&mut registry)
}

// ============================================================================
// Tests
// ============================================================================
