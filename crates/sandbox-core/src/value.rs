//! Values crossing the sandbox boundary.
//!
//! Inputs are materialized on the execution's heap before the entry point
//! runs; outputs are read back into a [`SerializedValue`] after it returns.
//! Results are compared through [`SerializedValue::to_canonical_bytes`], a
//! bincode encoding (BCS cannot carry doubles).

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sandbox_types::names::{from_sandboxed, sandboxed_reference};

use crate::interpreter::{Abort, Interpreter, ObjectKind, ObjectRef, Unwind, Value};
use crate::well_known::{BOOLEAN, BOX_VALUE, CHARACTER, DOUBLE, INTEGER, LONG, OBJECT, STRING};

/// A host-side value passed to or returned from an entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SerializedValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Array(Vec<SerializedValue>),
    /// A class handle, by original name.
    Class(String),
    /// Any other object; only its original class name crosses the boundary.
    Object { class: String },
}

impl SerializedValue {
    /// Canonical encoding used to compare results byte for byte.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("Failed to encode serialized value")
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("Failed to decode serialized value")
    }

    pub fn array<T: Into<SerializedValue>>(items: impl IntoIterator<Item = T>) -> Self {
        SerializedValue::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SerializedValue::Null => "null",
            SerializedValue::Bool(_) => "bool",
            SerializedValue::Int(_) => "int",
            SerializedValue::Long(_) => "long",
            SerializedValue::Double(_) => "double",
            SerializedValue::String(_) => "string",
            SerializedValue::Array(_) => "array",
            SerializedValue::Class(_) => "class",
            SerializedValue::Object { .. } => "object",
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            SerializedValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SerializedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for SerializedValue {
    fn from(value: bool) -> Self {
        SerializedValue::Bool(value)
    }
}

impl From<i32> for SerializedValue {
    fn from(value: i32) -> Self {
        SerializedValue::Int(value)
    }
}

impl From<i64> for SerializedValue {
    fn from(value: i64) -> Self {
        SerializedValue::Long(value)
    }
}

impl From<f64> for SerializedValue {
    fn from(value: f64) -> Self {
        SerializedValue::Double(value)
    }
}

impl From<&str> for SerializedValue {
    fn from(value: &str) -> Self {
        SerializedValue::String(value.to_string())
    }
}

impl From<String> for SerializedValue {
    fn from(value: String) -> Self {
        SerializedValue::String(value)
    }
}

// =============================================================================
// Host -> sandbox
// =============================================================================

fn boxed(interp: &mut Interpreter<'_>, class: &str, primitive: Value) -> Result<Value, Unwind> {
    let class = interp.class(class)?;
    let object = interp.alloc_instance(&class, false)?;
    interp.set_field(object, format!("{}.{}", class.name, BOX_VALUE), primitive)?;
    Ok(Value::Ref(object))
}

/// Element descriptor of an input array: primitive when every item has the
/// same primitive kind, `String` for strings and nulls, `Object` otherwise.
fn element_descriptor(items: &[SerializedValue]) -> String {
    let all = |f: fn(&SerializedValue) -> bool| !items.is_empty() && items.iter().all(f);
    if all(|v| matches!(v, SerializedValue::Int(_))) {
        "I".to_string()
    } else if all(|v| matches!(v, SerializedValue::Long(_))) {
        "J".to_string()
    } else if all(|v| matches!(v, SerializedValue::Double(_))) {
        "D".to_string()
    } else if all(|v| matches!(v, SerializedValue::Bool(_))) {
        "Z".to_string()
    } else if all(|v| matches!(v, SerializedValue::String(_) | SerializedValue::Null))
        && items.iter().any(|v| matches!(v, SerializedValue::String(_)))
    {
        format!("L{};", STRING)
    } else {
        format!("L{};", OBJECT)
    }
}

/// Materialize `value` on the interpreter's heap.
pub(crate) fn to_runtime(interp: &mut Interpreter<'_>, value: &SerializedValue) -> Result<Value, Unwind> {
    match value {
        SerializedValue::Null => Ok(Value::Null),
        SerializedValue::Bool(v) => boxed(interp, BOOLEAN, Value::Int(i32::from(*v))),
        SerializedValue::Int(v) => boxed(interp, INTEGER, Value::Int(*v)),
        SerializedValue::Long(v) => boxed(interp, LONG, Value::Long(*v)),
        SerializedValue::Double(v) => boxed(interp, DOUBLE, Value::Double(*v)),
        SerializedValue::String(s) => interp.new_string(s.clone()),
        SerializedValue::Class(name) => interp.class_handle(&sandboxed_reference(name)),
        SerializedValue::Array(items) => {
            let element = element_descriptor(items);
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let value = match (element.as_str(), item) {
                    ("I", SerializedValue::Int(v)) => Value::Int(*v),
                    ("J", SerializedValue::Long(v)) => Value::Long(*v),
                    ("D", SerializedValue::Double(v)) => Value::Double(*v),
                    ("Z", SerializedValue::Bool(v)) => Value::Int(i32::from(*v)),
                    _ => to_runtime(interp, item)?,
                };
                values.push(value);
            }
            interp.new_array(&element, values)
        }
        SerializedValue::Object { class } => Err(Unwind::Abort(Abort::Malformed(format!(
            "an opaque {} object cannot be passed into a sandbox",
            class
        )))),
    }
}

// =============================================================================
// Sandbox -> host
// =============================================================================

/// Read `value` back from the interpreter's heap.
pub(crate) fn from_runtime(interp: &Interpreter<'_>, value: Value) -> SerializedValue {
    read(interp, value, &mut HashSet::new())
}

fn original(name: &str) -> String {
    from_sandboxed(name).unwrap_or(name).to_string()
}

/// `path` holds the arrays currently being read, so self-containing arrays
/// terminate.
fn read(interp: &Interpreter<'_>, value: Value, path: &mut HashSet<ObjectRef>) -> SerializedValue {
    let object = match value {
        Value::Null => return SerializedValue::Null,
        Value::Int(v) => return SerializedValue::Int(v),
        Value::Long(v) => return SerializedValue::Long(v),
        Value::Double(v) => return SerializedValue::Double(v),
        Value::Ref(object) => object,
    };
    let Some(heap_object) = interp.heap().get(object) else {
        return SerializedValue::Null;
    };
    let class_name = heap_object.class.name.as_str();
    match &heap_object.kind {
        ObjectKind::Str(text) => SerializedValue::String(text.clone()),
        ObjectKind::ClassHandle(name) if name.starts_with('[') => {
            SerializedValue::Class(name.replace("Lsandbox/", "L"))
        }
        ObjectKind::ClassHandle(name) => SerializedValue::Class(original(name)),
        ObjectKind::Array { element, values } => {
            if !path.insert(object) {
                return SerializedValue::Object {
                    class: format!("[{}", element.replace("Lsandbox/", "L")),
                };
            }
            let items = values
                .iter()
                .map(|v| match (element.as_str(), v) {
                    ("Z", Value::Int(b)) => SerializedValue::Bool(*b != 0),
                    _ => read(interp, *v, path),
                })
                .collect();
            path.remove(&object);
            SerializedValue::Array(items)
        }
        ObjectKind::Plain { .. } if [INTEGER, LONG, DOUBLE, BOOLEAN, CHARACTER].contains(&class_name) => {
            match (class_name == BOOLEAN, heap_object.field(&format!("{}.{}", class_name, BOX_VALUE))) {
                (true, Some(Value::Int(v))) => SerializedValue::Bool(v != 0),
                (false, Some(primitive)) => read(interp, primitive, path),
                _ => SerializedValue::Null,
            }
        }
        _ => SerializedValue::Object {
            class: heap_object.class.original_name().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_element_inference() {
        assert_eq!(element_descriptor(&[1.into(), 2.into()]), "I");
        assert_eq!(element_descriptor(&[true.into()]), "Z");
        assert_eq!(
            element_descriptor(&["a".into(), SerializedValue::Null]),
            "Lsandbox/lang/String;"
        );
        assert_eq!(element_descriptor(&[1.into(), "a".into()]), "Lsandbox/lang/Object;");
        assert_eq!(element_descriptor(&[SerializedValue::Null]), "Lsandbox/lang/Object;");
        assert_eq!(element_descriptor(&[]), "Lsandbox/lang/Object;");
    }

    #[test]
    fn test_canonical_bytes() {
        let value = SerializedValue::array([1.5, f64::NAN]);
        let bytes = value.to_canonical_bytes().unwrap();
        assert_eq!(bytes, value.clone().to_canonical_bytes().unwrap());
        let decoded = SerializedValue::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(decoded.to_canonical_bytes().unwrap(), bytes);
        assert_ne!(
            SerializedValue::Int(1).to_canonical_bytes().unwrap(),
            SerializedValue::Long(1).to_canonical_bytes().unwrap()
        );
    }
}
