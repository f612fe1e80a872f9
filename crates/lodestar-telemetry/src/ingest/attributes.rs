//! Attribute and identifier encoding shared by every ingestion path.

use base64::Engine;
use opentelemetry_proto::tonic::common::v1::{any_value::Value as AnyValueKind, AnyValue, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::number_data_point;
use opentelemetry_proto::tonic::resource::v1::Resource;
use serde_json::{Map, Value};

use crate::TelemetryError;

/// Resource attribute carrying the service name.
pub const SERVICE_NAME: &str = "service.name";

/// Encode an attribute list as a JSON object.
///
/// Every `AnyValue` variant maps onto a JSON value; an empty list encodes
/// to `{}`. Later duplicates of a key overwrite earlier ones.
pub fn encode_attributes(attrs: &[KeyValue]) -> String {
    Value::Object(attributes_to_map(attrs)).to_string()
}

/// Encode a list of attribute lists as a JSON array of objects.
pub fn encode_attribute_list<'a>(lists: impl IntoIterator<Item = &'a [KeyValue]>) -> String {
    let items = lists
        .into_iter()
        .map(|attrs| Value::Object(attributes_to_map(attrs)))
        .collect();
    Value::Array(items).to_string()
}

/// Decode a stored attribute blob back into a JSON map.
pub fn decode_attributes(blob: &str) -> Result<Map<String, Value>, TelemetryError> {
    if blob.is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(blob).map_err(|source| TelemetryError::JsonDecode { source })
}

/// Decode a stored JSON array of attribute objects.
pub fn decode_attribute_list(blob: &str) -> Result<Vec<Map<String, Value>>, TelemetryError> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(blob).map_err(|source| TelemetryError::JsonDecode { source })
}

fn attributes_to_map(attrs: &[KeyValue]) -> Map<String, Value> {
    attrs
        .iter()
        .map(|kv| {
            let value = kv.value.as_ref().map_or(Value::Null, any_value_to_json);
            (kv.key.clone(), value)
        })
        .collect()
}

/// Convert an OTLP `AnyValue` to its JSON representation.
pub fn any_value_to_json(value: &AnyValue) -> Value {
    match &value.value {
        Some(AnyValueKind::StringValue(s)) => Value::String(s.clone()),
        Some(AnyValueKind::BoolValue(b)) => Value::Bool(*b),
        Some(AnyValueKind::IntValue(i)) => Value::from(*i),
        // Non-finite doubles have no JSON form and become null.
        Some(AnyValueKind::DoubleValue(d)) => Value::from(*d),
        Some(AnyValueKind::ArrayValue(arr)) => {
            Value::Array(arr.values.iter().map(any_value_to_json).collect())
        }
        Some(AnyValueKind::KvlistValue(kvlist)) => {
            Value::Object(attributes_to_map(&kvlist.values))
        }
        Some(AnyValueKind::BytesValue(b)) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        None => Value::Null,
    }
}

/// Render a log body: strings verbatim, anything else as JSON.
pub fn body_to_string(body: Option<&AnyValue>) -> String {
    match body.and_then(|b| b.value.as_ref()) {
        Some(AnyValueKind::StringValue(s)) => s.clone(),
        Some(_) => body.map(any_value_to_json).unwrap_or(Value::Null).to_string(),
        None => String::new(),
    }
}

/// Render a trace or span id as lowercase hex.
///
/// Empty and all-zero ids both mean "absent" in OTLP and render as `""`.
pub fn hex_id(id: &[u8]) -> String {
    if id.iter().all(|&b| b == 0) {
        String::new()
    } else {
        hex::encode(id)
    }
}

/// Look up `service.name` in a resource, defaulting to `""`.
pub fn service_name(resource: Option<&Resource>) -> String {
    resource
        .and_then(|r| r.attributes.iter().find(|kv| kv.key == SERVICE_NAME))
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(AnyValueKind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Resolve a number data point to a single float column value.
///
/// An unset value resolves to `0.0`.
pub fn resolve_number(value: Option<&number_data_point::Value>) -> f64 {
    match value {
        Some(number_data_point::Value::AsDouble(d)) => *d,
        Some(number_data_point::Value::AsInt(i)) => *i as f64,
        None => {
            tracing::debug!("number data point has no value, storing 0.0");
            0.0
        }
    }
}

/// Serialise a slice as a JSON array, the bind format for integer and text
/// list columns.
pub(crate) fn json_list<T>(items: &[T]) -> String
where
    T: Clone + Into<Value>,
{
    Value::Array(items.iter().cloned().map(Into::into).collect()).to_string()
}

/// Render floats as a DuckDB list literal, the bind format for `DOUBLE[]`
/// columns.
///
/// JSON has no spelling for NaN or the infinities, so these use DuckDB's
/// `NaN`, `Infinity` and `-Infinity` literals instead.
pub(crate) fn double_list(items: &[f64]) -> String {
    let items: Vec<String> = items.iter().map(|&value| double_literal(value)).collect();
    format!("[{}]", items.join(", "))
}

fn double_literal(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value == f64::INFINITY {
        "Infinity".to_owned()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_owned()
    } else {
        format!("{value:?}")
    }
}
