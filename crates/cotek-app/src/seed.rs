use std::collections::HashMap;
use std::fs;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use types::SensorName;

/// Reads last-known sensor values persisted by the host.
///
/// The file is a JSON object keyed by sensor name. Numbers and numeric
/// strings seed a value; `null`, `"unavailable"` and anything else seed the
/// sensor as unavailable. Unknown names are skipped.
pub fn load_seed(path: &str) -> Result<Vec<(SensorName, Option<f64>)>> {
    let content = fs::read_to_string(path).with_context(|| format!("read seed file {path}"))?;
    parse_seed(&content)
}

pub fn parse_seed(content: &str) -> Result<Vec<(SensorName, Option<f64>)>> {
    let raw: HashMap<String, Value> = serde_json::from_str(content).context("parse seed json")?;

    let mut values: Vec<(SensorName, Option<f64>)> = raw
        .into_iter()
        .filter_map(|(key, value)| match key.parse::<SensorName>() {
            Ok(name) => Some((name, seed_value(&value))),
            Err(err) => {
                warn!(error = %err, "skipping seed entry");
                None
            }
        })
        .collect();
    values.sort_by_key(|(name, _)| name.index());

    Ok(values)
}

fn seed_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
