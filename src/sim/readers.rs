//! Read-only telemetry procedures.

use serde_json::{Map, Value, json};

use crate::error::SimError;
use crate::sim::SimConnection;

/// A read-only probe against an open connection.
pub type Reader = fn(&mut dyn SimConnection) -> Result<Value, SimError>;

pub fn flight_snapshot(conn: &mut dyn SimConnection) -> Result<Value, SimError> {
    conn.call("readers.flight_snapshot", &[])
}

pub fn vessel_info(conn: &mut dyn SimConnection) -> Result<Value, SimError> {
    conn.call("readers.vessel_info", &[])
}

pub fn time_status(conn: &mut dyn SimConnection) -> Result<Value, SimError> {
    conn.call("readers.time_status", &[])
}

pub fn environment_info(conn: &mut dyn SimConnection) -> Result<Value, SimError> {
    conn.call("readers.environment_info", &[])
}

pub fn orbit_info(conn: &mut dyn SimConnection) -> Result<Value, SimError> {
    conn.call("readers.orbit_info", &[])
}

pub fn part_tree(conn: &mut dyn SimConnection) -> Result<Value, SimError> {
    conn.call("readers.part_tree", &[])
}

/// Per-stage delta-v and burn plan. `environment` selects the reference
/// conditions (`"current"`, `"vacuum"`, `"sea_level"`).
pub fn stage_plan(conn: &mut dyn SimConnection, environment: &str) -> Result<Value, SimError> {
    conn.call("readers.stage_plan", &[json!(environment)])
}

/// Fields gathered by a full diagnostics snapshot, in order.
pub const DIAGNOSTIC_FIELDS: &[(&str, Reader)] = &[
    ("vessel", vessel_info),
    ("time", time_status),
    ("environment", environment_info),
    ("flight", flight_snapshot),
    ("orbit", orbit_info),
];

/// Run each reader, keeping whatever succeeds.
///
/// Failures are recorded under `errors.<field>` instead of aborting the
/// snapshot; `errors` is omitted when every reader succeeded.
pub fn collect_diagnostics(conn: &mut dyn SimConnection, fields: &[(&str, Reader)]) -> Value {
    let mut out = Map::new();
    let mut errors = Map::new();
    for (name, reader) in fields {
        match reader(conn) {
            Ok(value) => {
                out.insert((*name).to_string(), value);
            }
            Err(e) => {
                tracing::debug!("Diagnostics field {} unavailable: {}", name, e);
                errors.insert((*name).to_string(), Value::String(e.to_string()));
            }
        }
    }
    if !errors.is_empty() {
        out.insert("errors".to_string(), Value::Object(errors));
    }
    Value::Object(out)
}
