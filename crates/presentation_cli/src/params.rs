//! `--param key=value` parsing

use std::collections::HashMap;

use anyhow::bail;
use serde_json::Value;

/// Parse one `key=value` pair
///
/// The value is read as JSON when it parses as JSON (numbers, booleans,
/// arrays) and kept as a plain string otherwise.
pub fn parse_param(raw: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got {raw:?}");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty parameter name in {raw:?}");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Collect pairs into an override map; later keys win
pub fn overrides(pairs: Vec<(String, Value)>) -> HashMap<String, Value> {
    pairs.into_iter().collect()
}
