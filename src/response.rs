//! Extracting one chute's utilization from a `/chutes/utilization` payload.
//!
//! The endpoint answers for every chute at once and its shape has varied, so
//! the payload is tried against each known layout in turn:
//!
//! 1. a list of per-chute records (`chute_id`, `name`, `utilization_current`,
//!    `utilization_5m`, `utilization_15m`, ...), matched by id and then by a
//!    normalized name;
//! 2. an object carrying the value directly (`{"utilization": 0.1}`);
//! 3. an object with a `chutes` map of id -> record;
//! 4. an object with a `data` list of records, matched by id.

use serde_json::{Map, Value};

/// Record fields, most recent reading first.
const RECORD_FIELDS: &[&str] = &[
    "utilization_current",
    "utilization_5m",
    "utilization_15m",
    "utilization",
    "util",
    "usage",
    "load",
];

const TOP_LEVEL_FIELDS: &[&str] = &["utilization", "util", "usage", "load", "capacity"];

const ID_FIELDS: &[&str] = &["chute_id", "id"];

const NAME_FIELDS: &[&str] = &["name", "model"];

/// Utilization for `chute_id`, or `None` when no known layout yields one.
pub fn parse_utilization(payload: &Value, chute_id: &str) -> Option<f64> {
    match payload {
        Value::Array(records) => from_records(records, chute_id),
        Value::Object(object) => from_scalar_fields(object)
            .or_else(|| from_chutes_map(object, chute_id))
            .or_else(|| from_data_list(object, chute_id)),
        _ => None,
    }
}

fn from_records(records: &[Value], chute_id: &str) -> Option<f64> {
    let records: Vec<&Map<String, Value>> = records.iter().filter_map(Value::as_object).collect();

    if let Some(record) = records.iter().find(|r| has_id(r, chute_id)) {
        return record_value(record);
    }

    // Heuristic: may match an unintended chute when names overlap, and misses
    // ids that drop name parts (`chute_qwen3.5_397b_tee` never matches
    // `Qwen/Qwen3.5-397B-A17B-TEE`, so that chute stays at the neutral value).
    let wanted = clean_id(chute_id);
    if wanted.is_empty() {
        return None;
    }
    records
        .iter()
        .filter(|r| record_name(r).map_or(false, |name| clean_name(name).contains(&wanted)))
        .find_map(|r| record_value(r))
}

fn from_scalar_fields(object: &Map<String, Value>) -> Option<f64> {
    TOP_LEVEL_FIELDS
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(as_number)
}

fn from_chutes_map(object: &Map<String, Value>, chute_id: &str) -> Option<f64> {
    let record = object.get("chutes")?.as_object()?.get(chute_id)?.as_object()?;
    record_value(record)
}

fn from_data_list(object: &Map<String, Value>, chute_id: &str) -> Option<f64> {
    object
        .get("data")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .filter(|r| has_id(r, chute_id))
        .find_map(record_value)
}

fn record_value(record: &Map<String, Value>) -> Option<f64> {
    RECORD_FIELDS
        .iter()
        .filter_map(|field| record.get(*field))
        .find_map(as_utilization)
}

fn has_id(record: &Map<String, Value>, chute_id: &str) -> bool {
    ID_FIELDS
        .iter()
        .any(|field| record.get(*field).and_then(Value::as_str) == Some(chute_id))
}

fn record_name(record: &Map<String, Value>) -> Option<&str> {
    NAME_FIELDS
        .iter()
        .find_map(|field| record.get(*field).and_then(Value::as_str))
}

/// Strict numeric value for top-level fields.
fn as_number(value: &Value) -> Option<f64> {
    value.as_f64().and_then(clamp)
}

/// Numeric value for record fields; numeric strings are accepted too.
fn as_utilization(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(clamp),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(clamp),
        _ => None,
    }
}

fn clamp(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// `chute_kimi_k2.5_tee` -> `kimik2.5tee`
pub(crate) fn clean_id(chute_id: &str) -> String {
    let lower = chute_id.to_lowercase();
    let stripped = lower
        .strip_prefix("chute_")
        .or_else(|| lower.strip_prefix("chute-"))
        .unwrap_or(&lower);
    squash(stripped)
}

/// `moonshotai/Kimi-K2.5-TEE` -> `kimik2.5tee`
pub(crate) fn clean_name(name: &str) -> String {
    squash(name.rsplit('/').next().unwrap_or(name))
}
