//! Field lookup policy for platform payloads
//!
//! The platform does not guarantee field names, so every value the
//! autoscaler reads from a service payload is looked up through an ordered
//! list of candidate paths. The first path holding a usable value wins.
//! Dotted paths descend into nested objects.

use serde_json::Value;

/// Candidate paths for the CPU utilization percentage, in priority order
pub const CPU_FIELD_CANDIDATES: &[&str] = &[
    "cpu",
    "cpuUsage",
    "cpuPercent",
    "cpu_percent",
    "cpu.percent",
    "cpu.usage",
    "stats.cpu",
    "stats.cpuUsage",
    "stats.cpuPercent",
    "stats.cpu.percent",
];

/// Candidate paths for the current replica count, in priority order
pub const REPLICA_FIELD_CANDIDATES: &[&str] = &["replicas", "deploy.replicas", "currentReplicas"];

/// Candidate paths for published ports, in priority order
pub const EXPOSED_PORT_FIELD_CANDIDATES: &[&str] = &["exposedPorts", "ports", "deploy.ports"];

/// Keys of the tRPC response envelope, outermost first
const ENVELOPE_KEYS: &[&str] = &["result", "data", "json"];

/// Resolve a dotted path inside a JSON value
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// Strip the `result.data.json` envelope (or any prefix of it)
///
/// Objects that already look like a project are returned untouched.
pub fn unwrap_envelope(payload: &Value) -> &Value {
    let mut current = payload;
    loop {
        let Some(map) = current.as_object() else {
            return current;
        };
        if map.contains_key("name") && map.contains_key("services") {
            return current;
        }
        match ENVELOPE_KEYS.iter().find_map(|key| map.get(*key)) {
            Some(next) if !next.is_null() => current = next,
            _ => return current,
        }
    }
}

fn as_percent(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;

    (parsed.is_finite() && parsed >= 0.0).then_some(parsed)
}

fn as_replicas(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn as_exposed(value: &Value) -> Option<bool> {
    match value {
        Value::Array(ports) => Some(!ports.is_empty()),
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn first_match<T>(
    value: &Value,
    candidates: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    candidates
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(convert)
}

/// First present, non-null, numeric CPU value
pub fn cpu_percent(value: &Value) -> Option<f64> {
    first_match(value, CPU_FIELD_CANDIDATES, as_percent)
}

/// First present replica count
pub fn replica_count(value: &Value) -> Option<u32> {
    first_match(value, REPLICA_FIELD_CANDIDATES, as_replicas)
}

/// Whether the payload lists at least one published port
pub fn exposed_ports(value: &Value) -> Option<bool> {
    first_match(value, EXPOSED_PORT_FIELD_CANDIDATES, as_exposed)
}

/// Human-readable JSON type name for warnings
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
