//! Document to node conversion.
//!
//! Documents carry their node path in the ID (`"{depth}:{path}"`) or, for
//! paths too long to use as a key, in a `_path` field. Fields starting with
//! `_` are bookkeeping and never become properties. String values may carry a
//! type prefix (`nam:`, `dat:`, ...) that is stripped and sets the type.

use serde_json::Value;

use crate::error::{DownloadError, Result};
use crate::source::RawDocument;
use crate::types::{NodeData, NodeProperty, PropertyValue, ValueType};

/// Field holding the real path of a document with a hashed ID
pub const PATH_FIELD: &str = "_path";

/// Field marking a document as deleted
pub const DELETED_FIELD: &str = "_deleted";

/// String prefixes that select a property type
const TYPE_PREFIXES: &[(&str, ValueType)] = &[
    ("str:", ValueType::String),
    ("nam:", ValueType::Name),
    ("pat:", ValueType::Path),
    ("dat:", ValueType::Date),
    ("ref:", ValueType::Reference),
    ("wea:", ValueType::WeakReference),
    ("uri:", ValueType::Uri),
    ("dec:", ValueType::Decimal),
    (":blobId:", ValueType::Binary),
];

/// Convert a raw document into a node.
///
/// Returns `Ok(None)` for deleted documents. Fails with
/// [`DownloadError::Conversion`] when no valid absolute path can be derived.
pub fn to_node_data(doc: &RawDocument) -> Result<Option<NodeData>> {
    if matches!(doc.fields.get(DELETED_FIELD), Some(Value::Bool(true))) {
        tracing::trace!(id = %doc.id, "Skipping deleted document");
        return Ok(None);
    }

    let path = node_path(doc)?;

    let mut properties = Vec::with_capacity(doc.fields.len());
    for (name, value) in &doc.fields {
        if name.starts_with('_') {
            continue;
        }
        match convert_value(value) {
            Some((value_type, value)) => properties.push(NodeProperty {
                name: name.clone(),
                value_type,
                value,
            }),
            None => {
                tracing::debug!(id = %doc.id, property = %name, "Skipping nested object value");
            }
        }
    }
    properties.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Some(NodeData::new(path, properties)))
}

fn node_path(doc: &RawDocument) -> Result<Vec<String>> {
    let conversion_error = |reason: String| DownloadError::Conversion {
        id: doc.id.clone(),
        reason,
    };

    let (depth, id_path) = match doc.id.split_once(':') {
        Some((depth, rest)) => (depth, rest),
        None => return Err(conversion_error("ID has no depth prefix".to_string()).into()),
    };

    let raw = match doc.fields.get(PATH_FIELD) {
        Some(Value::String(p)) => p.as_str(),
        Some(other) => {
            return Err(conversion_error(format!("{PATH_FIELD} is not a string: {other}")).into());
        }
        None => id_path,
    };
    if !raw.starts_with('/') {
        return Err(conversion_error(format!("path {raw:?} is not absolute")).into());
    }

    let elements: Vec<String> = raw
        .split('/')
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();

    if let Ok(depth) = depth.parse::<usize>()
        && depth != elements.len()
    {
        return Err(conversion_error(format!(
            "declared depth {depth} does not match path {raw:?} ({} elements)",
            elements.len()
        ))
        .into());
    }

    Ok(elements)
}

/// `None` when the value cannot be represented as a property
fn convert_value(value: &Value) -> Option<(ValueType, PropertyValue)> {
    match value {
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            let mut element_type: Option<ValueType> = None;
            let mut mixed = false;
            for item in items {
                let (vt, v) = convert_scalar(item)?;
                if v.is_some() {
                    match element_type {
                        None => element_type = Some(vt),
                        Some(t) if t != vt => mixed = true,
                        Some(_) => {}
                    }
                }
                values.push(v);
            }
            let value_type = match element_type {
                Some(t) if !mixed => t,
                _ => ValueType::String,
            };
            Some((value_type, PropertyValue::Multi(values)))
        }
        scalar => {
            let (vt, v) = convert_scalar(scalar)?;
            Some((vt, PropertyValue::Single(v)))
        }
    }
}

fn convert_scalar(value: &Value) -> Option<(ValueType, Option<String>)> {
    match value {
        Value::Null => Some((ValueType::Undefined, None)),
        Value::Bool(b) => Some((ValueType::Boolean, Some(b.to_string()))),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some((ValueType::Long, Some(n.to_string()))),
        Value::Number(n) => Some((ValueType::Double, Some(n.to_string()))),
        Value::String(s) => {
            for (prefix, value_type) in TYPE_PREFIXES {
                if let Some(rest) = s.strip_prefix(prefix) {
                    return Some((*value_type, Some(rest.to_string())));
                }
            }
            Some((ValueType::String, Some(s.clone())))
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}
