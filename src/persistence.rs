//! SQLite-backed prototype store.
//!
//! Persists the activity-to-prototype mapping (with ingestion order) and a
//! MessagePack cache of prototype feature vectors, so a restarted process
//! can rebuild its registry without re-deriving features. Full GPS tracks
//! stay with the activity-storage collaborator and are only requested for
//! the prototypes themselves.

use rusqlite::{params, Connection};

use crate::error::{MatchError, Result};
use crate::registry::{PrototypeRegistry, PrototypeStore};
use crate::{ActivityId, GeoPoint, MatchingConfig, RouteFeatures};

impl From<rusqlite::Error> for MatchError {
    fn from(e: rusqlite::Error) -> Self {
        MatchError::Storage {
            message: e.to_string(),
        }
    }
}

/// [`PrototypeStore`] backed by a SQLite database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if necessary) a store at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a transient in-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prototype_map (
                activity_id TEXT PRIMARY KEY,
                prototype_id TEXT NOT NULL,
                seq INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS feature_cache (
                activity_id TEXT PRIMARY KEY,
                features BLOB NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Cache the feature vector of an activity.
    pub fn save_features(&self, activity_id: &str, features: &RouteFeatures) -> Result<()> {
        let blob = rmp_serde::to_vec(features).map_err(|e| MatchError::Storage {
            message: e.to_string(),
        })?;
        self.conn.execute(
            "INSERT INTO feature_cache (activity_id, features) VALUES (?1, ?2)
             ON CONFLICT(activity_id) DO UPDATE SET features = excluded.features",
            params![activity_id, blob],
        )?;
        Ok(())
    }

    /// Load a cached feature vector, if one exists.
    pub fn load_features(&self, activity_id: &str) -> Result<Option<RouteFeatures>> {
        let mut stmt = self
            .conn
            .prepare("SELECT features FROM feature_cache WHERE activity_id = ?1")?;
        let mut rows = stmt.query(params![activity_id])?;

        match rows.next()? {
            Some(row) => {
                let blob: Vec<u8> = row.get(0)?;
                let features = rmp_serde::from_slice(&blob).map_err(|e| MatchError::Storage {
                    message: e.to_string(),
                })?;
                Ok(Some(features))
            }
            None => Ok(None),
        }
    }
}

impl PrototypeStore for SqliteStore {
    fn get(&self, activity_id: &str) -> Result<Option<ActivityId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT prototype_id FROM prototype_map WHERE activity_id = ?1")?;
        let mut rows = stmt.query(params![activity_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, activity_id: &str, prototype_id: &str) -> Result<()> {
        // New entries take the next sequence number; overwrites keep their
        // original ingestion position.
        self.conn.execute(
            "INSERT INTO prototype_map (activity_id, prototype_id, seq)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), -1) + 1 FROM prototype_map))
             ON CONFLICT(activity_id) DO UPDATE SET prototype_id = excluded.prototype_id",
            params![activity_id, prototype_id],
        )?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(ActivityId, ActivityId)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT activity_id, prototype_id FROM prototype_map ORDER BY seq")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM prototype_map", [])?;
        Ok(())
    }
}

/// Rebuild a registry from a persisted store.
///
/// `track_for` supplies the GPS track of each prototype recorded in the
/// store (the activity-storage collaborator owns tracks). Cached feature
/// vectors are used when present and re-derived otherwise.
pub fn restore_registry<F>(
    store: SqliteStore,
    config: MatchingConfig,
    mut track_for: F,
) -> Result<PrototypeRegistry<SqliteStore>>
where
    F: FnMut(&str) -> Option<Vec<GeoPoint>>,
{
    let entries = store.entries()?;
    let mut registry = PrototypeRegistry::new(store, config)?;

    for (activity_id, prototype_id) in &entries {
        if activity_id != prototype_id {
            continue;
        }
        let track = track_for(activity_id).ok_or_else(|| MatchError::Storage {
            message: format!("no track available for prototype '{}'", activity_id),
        })?;
        let features = match registry.store().load_features(activity_id)? {
            Some(cached) => cached,
            None => RouteFeatures::from_track(activity_id, &track)?,
        };
        let prepared = registry.prepare_track(&track);
        registry.insert_prototype(activity_id.clone(), features, prepared);
    }

    Ok(registry)
}
