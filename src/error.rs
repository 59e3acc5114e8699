//! Unified error handling for the route-prototype library.
//!
//! This module provides a consistent error type for all matching operations,
//! replacing mixed error handling patterns (Option, panic, silent failures).

use std::fmt;

/// Unified error type for route-prototype operations.
#[derive(Debug, Clone)]
pub enum MatchError {
    /// Track has too few points to derive features from
    InsufficientData {
        activity_id: String,
        point_count: usize,
        minimum_required: usize,
    },
    /// An alignment would exceed the configured cost-matrix cell cap
    TrackTooLarge { cells: u64, cap: u64 },
    /// A matching threshold is negative or non-finite
    InvalidConfig { message: String },
    /// Prototype store failure
    Storage { message: String },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::InsufficientData {
                activity_id,
                point_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Activity '{}' has {} points, minimum {} required",
                    activity_id, point_count, minimum_required
                )
            }
            MatchError::TrackTooLarge { cells, cap } => {
                write!(f, "Alignment needs {} cost cells, cap is {}", cells, cap)
            }
            MatchError::InvalidConfig { message } => {
                write!(f, "Configuration error: {}", message)
            }
            MatchError::Storage { message } => {
                write!(f, "Prototype store error: {}", message)
            }
        }
    }
}

impl std::error::Error for MatchError {}

/// Result type alias for route-prototype operations.
pub type Result<T> = std::result::Result<T, MatchError>;
