//! Database schema definitions.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Rides table
CREATE TABLE IF NOT EXISTS rides (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    bike_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    duration_seconds INTEGER NOT NULL,
    distance_km REAL NOT NULL,
    max_lean_left REAL NOT NULL,
    max_lean_right REAL NOT NULL,
    max_speed_mps REAL,
    avg_speed_kmh REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rides_bike_id ON rides(bike_id);
CREATE INDEX IF NOT EXISTS idx_rides_started_at ON rides(started_at);

-- Ride trajectory, in arrival order
CREATE TABLE IF NOT EXISTS ride_coordinates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ride_id TEXT NOT NULL REFERENCES rides(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    speed_mps REAL,
    recorded_at TEXT NOT NULL,
    UNIQUE(ride_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_ride_coordinates_ride_id ON ride_coordinates(ride_id);

-- Session autosave (crash recovery)
CREATE TABLE IF NOT EXISTS session_autosave (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    state TEXT NOT NULL,
    session_json TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
"#;

/// Trajectory of the autosaved session, appended at each autosave.
pub const SESSION_TRACK_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_coordinates (
    ride_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    speed_mps REAL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (ride_id, seq)
);
"#;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;
