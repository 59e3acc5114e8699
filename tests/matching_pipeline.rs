//! End-to-end tests for the matching pipeline.
//!
//! These exercise the documented behavior of the registry over synthetic
//! tracks: same-route recordings at different sampling rates share a
//! prototype, distant routes never reach alignment, and clustering is
//! order-dependent by construction.

use route_prototype::{
    GeoPoint, MatchingConfig, MemoryStore, PrototypeRegistry, PrototypeStore,
};

// ============================================================================
// Test Helpers
// ============================================================================

const METERS_PER_DEGREE_LAT: f64 = 111_319.49;

/// A closed circular loop of the given circumference, sampled with
/// `segments` equal steps (so `segments + 1` points, first == last
/// geometrically). `interval` is the recording cadence in seconds.
fn loop_track(
    center_lat: f64,
    center_lng: f64,
    circumference_m: f64,
    segments: usize,
    interval: i64,
) -> Vec<GeoPoint> {
    let radius = circumference_m / (2.0 * std::f64::consts::PI);
    let meters_per_degree_lng = METERS_PER_DEGREE_LAT * center_lat.to_radians().cos();

    (0..=segments)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * i as f64 / segments as f64;
            GeoPoint::new(
                center_lat + radius * theta.cos() / METERS_PER_DEGREE_LAT,
                center_lng + radius * theta.sin() / meters_per_degree_lng,
                i as i64 * interval,
            )
        })
        .collect()
}

/// A straight north-going track shifted east by `offset_m` meters.
fn straight_track(count: usize, offset_m: f64) -> Vec<GeoPoint> {
    let lat0: f64 = 51.0;
    let offset_deg = offset_m / (METERS_PER_DEGREE_LAT * lat0.to_radians().cos());
    (0..count)
        .map(|i| GeoPoint::new(lat0 + i as f64 * 0.00018, offset_deg, i as i64))
        .collect()
}

fn scenario_config() -> MatchingConfig {
    MatchingConfig {
        match_center_threshold: 5000.0,
        match_length_threshold: 0.01,
        tight_match_threshold: 0.6,
        ..MatchingConfig::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn same_loop_at_different_sampling_rates_shares_a_prototype() {
    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), scenario_config()).unwrap();

    // The same 1km loop recorded at 1s cadence (100 segments) and at 2s
    // cadence (50 segments).
    let dense = loop_track(51.5, -0.13, 1000.0, 100, 1);
    let sparse = loop_track(51.5, -0.13, 1000.0, 50, 2);

    let first = registry.register("loop-dense", &dense).unwrap();
    let second = registry.register("loop-sparse", &sparse).unwrap();

    assert!(first.is_new_prototype());
    assert_eq!(second.prototype_id, "loop-dense");
    assert!(second.tight_distance.unwrap() < 0.6);
    assert_eq!(registry.prototype_count(), 1);
}

#[test]
fn distant_loops_never_reach_alignment() {
    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), scenario_config()).unwrap();

    // Equal-length loops centered ~10km apart: the loose filter rejects
    // the pair on centroid distance alone.
    let here = loop_track(51.5, -0.13, 1000.0, 100, 1);
    let there = loop_track(51.59, -0.13, 1000.0, 100, 1);

    registry.register("loop-here", &here).unwrap();
    let result = registry.register("loop-there", &there).unwrap();

    assert!(result.is_new_prototype());
    assert_eq!(registry.prototype_count(), 2);
}

#[test]
fn registration_order_determines_clustering() {
    // Three parallel tracks: A sits 1m east of B and 1.4m west of C, so A
    // tight-matches both while B and C are too far apart to match each
    // other.
    let config = MatchingConfig {
        tight_match_threshold: 0.1,
        ..MatchingConfig::default()
    };
    let a = straight_track(51, 1.0);
    let b = straight_track(51, 0.0);
    let c = straight_track(51, 2.4);

    // A first: B and C both join A's cluster.
    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), config.clone()).unwrap();
    registry.register("a", &a).unwrap();
    let b_result = registry.register("b", &b).unwrap();
    let c_result = registry.register("c", &c).unwrap();

    assert_eq!(b_result.prototype_id, "a");
    assert_eq!(c_result.prototype_id, "a");
    assert_eq!(registry.prototype_count(), 1);

    // B and C first: they form two clusters, and A joins whichever
    // prototype has the nearer centroid (B, at 1m vs 1.4m).
    let mut registry = PrototypeRegistry::new(MemoryStore::new(), config).unwrap();
    registry.register("b", &b).unwrap();
    let c_result = registry.register("c", &c).unwrap();
    let a_result = registry.register("a", &a).unwrap();

    assert!(c_result.is_new_prototype());
    assert_eq!(a_result.prototype_id, "b");
    assert_eq!(registry.prototype_count(), 2);
}

#[test]
fn cluster_members_point_directly_at_their_prototype() {
    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), scenario_config()).unwrap();

    let tracks = [
        ("ride-1", loop_track(51.5, -0.13, 1000.0, 100, 1)),
        ("ride-2", loop_track(51.5, -0.13, 1000.0, 50, 2)),
        ("ride-3", loop_track(51.5, -0.13, 1000.0, 80, 1)),
        ("away-1", loop_track(48.85, 2.35, 1000.0, 100, 1)),
    ];
    for (id, track) in &tracks {
        registry.register(id, track).unwrap();
    }

    // Single-level mapping: every recorded prototype id maps to itself.
    for (id, _) in &tracks {
        let prototype = registry.prototype_of(id).unwrap().unwrap();
        assert_eq!(
            registry.prototype_of(&prototype).unwrap().unwrap(),
            prototype
        );
    }
    assert_eq!(registry.prototype_count(), 2);
}

#[test]
fn rematch_all_is_idempotent() {
    let activities = vec![
        ("ride-1".to_string(), loop_track(51.5, -0.13, 1000.0, 100, 1)),
        ("ride-2".to_string(), loop_track(51.5, -0.13, 1000.0, 50, 2)),
        ("away-1".to_string(), loop_track(48.85, 2.35, 1000.0, 100, 1)),
    ];

    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), scenario_config()).unwrap();
    for (id, track) in &activities {
        registry.register(id, track).unwrap();
    }

    let first = registry
        .rematch_all(&activities, scenario_config())
        .unwrap();
    let after_first = registry.snapshot_json().unwrap();

    let second = registry
        .rematch_all(&activities, scenario_config())
        .unwrap();
    let after_second = registry.snapshot_json().unwrap();

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    // The replayed mapping matches what incremental registration produced.
    assert_eq!(first["ride-2"].prototype_id, "ride-1");
    assert!(first["away-1"].is_new_prototype());
}

#[test]
fn rematch_with_tighter_thresholds_splits_clusters() {
    let activities = vec![
        ("ride-1".to_string(), loop_track(51.5, -0.13, 1000.0, 100, 1)),
        ("ride-2".to_string(), loop_track(51.5, -0.13, 1000.0, 50, 2)),
    ];

    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), scenario_config()).unwrap();
    for (id, track) in &activities {
        registry.register(id, track).unwrap();
    }
    assert_eq!(registry.prototype_count(), 1);

    // The resampled recording costs ~0.5 of the path length; a 0.1
    // threshold no longer admits it.
    let strict = MatchingConfig {
        tight_match_threshold: 0.1,
        ..scenario_config()
    };
    let results = registry.rematch_all(&activities, strict).unwrap();

    assert!(results["ride-2"].is_new_prototype());
    assert_eq!(registry.prototype_count(), 2);
}

#[test]
fn oversized_alignments_are_skipped_per_candidate() {
    // A cap below 101x101 cells: the prototype comparison is skipped and
    // the candidate is promoted instead of the call failing.
    let config = MatchingConfig {
        dtw_cell_cap: 5_000,
        ..scenario_config()
    };
    let mut registry = PrototypeRegistry::new(MemoryStore::new(), config).unwrap();

    registry
        .register("ride-1", &loop_track(51.5, -0.13, 1000.0, 100, 1))
        .unwrap();
    let result = registry
        .register("ride-2", &loop_track(51.5, -0.13, 1000.0, 100, 1))
        .unwrap();

    assert!(result.is_new_prototype());
    assert_eq!(registry.prototype_count(), 2);
}

#[test]
fn simplification_bounds_alignment_without_changing_the_decision() {
    // Track reduction is applied identically to candidate and prototype, so
    // re-recordings of the same route still align at zero cost.
    let config = MatchingConfig {
        simplification_tolerance: Some(1e-5),
        ..scenario_config()
    };
    let mut registry = PrototypeRegistry::new(MemoryStore::new(), config).unwrap();

    let ride = loop_track(51.5, -0.13, 1000.0, 100, 1);
    registry.register("ride-1", &ride).unwrap();
    let result = registry.register("ride-2", &ride).unwrap();

    assert_eq!(result.prototype_id, "ride-1");
    assert_eq!(result.tight_distance, Some(0.0));
}

#[test]
fn store_records_every_registration() {
    let mut registry =
        PrototypeRegistry::new(MemoryStore::new(), scenario_config()).unwrap();

    registry
        .register("ride-1", &loop_track(51.5, -0.13, 1000.0, 100, 1))
        .unwrap();
    registry
        .register("ride-2", &loop_track(51.5, -0.13, 1000.0, 50, 2))
        .unwrap();

    let entries = registry.store().entries().unwrap();
    assert_eq!(
        entries,
        vec![
            ("ride-1".to_string(), "ride-1".to_string()),
            ("ride-2".to_string(), "ride-1".to_string()),
        ]
    );
}
