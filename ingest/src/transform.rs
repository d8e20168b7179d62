//! Flattening of enrichment API responses into raw records.
//!
//! A record is built from up to four field layers, merged lowest precedence
//! first:
//!
//! | layer    | source                                        |
//! |----------|-----------------------------------------------|
//! | `Item`   | the work item (`city, lat, lon, region, country`) |
//! | `Call`   | call-level metadata (`info` / top-level fields) |
//! | `Row`    | one element of the response's row array       |
//! | `Nested` | first element of the row's nested array       |
//!
//! A higher layer replaces the value of a key set by a lower one but keeps the
//! key's original position, so the column order of every line follows the
//! item fields first.

use crate::model::WorkItem;
use common::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Item,
    Call,
    Row,
    Nested,
}

/// Merges `layers` in precedence order regardless of the order given.
pub fn merge_layers(layers: &[(Layer, &Record)]) -> Record {
    let mut ordered: Vec<&(Layer, &Record)> = layers.iter().collect();
    ordered.sort_by_key(|(layer, _)| *layer);

    let mut merged = Record::new();
    let mut origin: HashMap<&str, Layer> = HashMap::new();
    for (layer, fields) in ordered {
        for (key, value) in fields.iter() {
            if let Some(previous) = origin.insert(key.as_str(), *layer) {
                debug!(field = %key, from = ?previous, to = ?layer, "Field overridden by higher layer");
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub fn item_fields(item: &WorkItem) -> Record {
    let mut fields = Record::new();
    fields.insert("city".into(), Value::from(item.city.clone()));
    fields.insert("lat".into(), Value::from(item.latitude));
    fields.insert("lon".into(), Value::from(item.longitude));
    fields.insert("region".into(), Value::from(item.region.clone()));
    fields.insert("country".into(), Value::from(item.country.clone()));
    fields
}

fn as_record<'a>(value: &'a Value, what: &str) -> Result<&'a Record> {
    value
        .as_object()
        .ok_or_else(|| Error::Transform(format!("{} is not a JSON object", what)))
}

/// Returns the row array under `key`; a missing, null or empty array means the
/// API had nothing to report.
fn rows<'a>(response: &'a Record, key: &str) -> Result<&'a [Value]> {
    match response.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(rows)) => Ok(rows),
        Some(_) => Err(Error::Transform(format!("'{}' is not an array", key))),
    }
}

/// Satellite-pass response: `{info: {...}, passes: [...]}`.
pub fn transform_passes(item: &WorkItem, response: &Value) -> Result<Vec<Record>> {
    let response = as_record(response, "passes response")?;
    let info = response
        .get("info")
        .ok_or_else(|| Error::Transform("passes response has no 'info'".into()))
        .and_then(|info| as_record(info, "'info'"))?;
    let base = item_fields(item);

    let passes = rows(response, "passes")?;
    if passes.is_empty() {
        return Ok(vec![merge_layers(&[(Layer::Item, &base), (Layer::Call, info)])]);
    }

    passes
        .iter()
        .map(|row| {
            let row = as_record(row, "pass")?;
            Ok(merge_layers(&[
                (Layer::Item, &base),
                (Layer::Call, info),
                (Layer::Row, row),
            ]))
        })
        .collect()
}

/// One Call weather response: top-level fields plus `hourly: [{weather: [...]}]`.
/// The `hourly` and `weather` arrays themselves are not carried into records.
pub fn transform_weather(item: &WorkItem, response: &Value) -> Result<Vec<Record>> {
    let response = as_record(response, "weather response")?;
    let base = item_fields(item);
    let call: Record = response
        .iter()
        .filter(|(key, _)| key.as_str() != "hourly")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let hourly = rows(response, "hourly")?;
    if hourly.is_empty() {
        return Ok(vec![merge_layers(&[(Layer::Item, &base), (Layer::Call, &call)])]);
    }

    hourly
        .iter()
        .map(|row| {
            let row = as_record(row, "hourly row")?;
            let nested = match rows(row, "weather")?.first() {
                Some(first) => as_record(first, "weather[0]")?.clone(),
                None => Record::new(),
            };
            let row: Record = row
                .iter()
                .filter(|(key, _)| key.as_str() != "weather")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            Ok(merge_layers(&[
                (Layer::Item, &base),
                (Layer::Call, &call),
                (Layer::Row, &row),
                (Layer::Nested, &nested),
            ]))
        })
        .collect()
}

/// One JSON object per line, no trailing newline.
pub fn encode_records(records: &[Record]) -> Result<String> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}
