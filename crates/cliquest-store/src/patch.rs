//! Partial document updates.
//!
//! A [`Patch`] is an ordered list of field operations. Besides plain sets it
//! carries the backend's atomic primitives: numeric increments and set-like
//! array union/remove. Those are what make concurrent "mark as read" and
//! "send" safe without reading the current value first.

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Increment(i64),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<(String, FieldOp)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push((field.into(), FieldOp::Set(value.into())));
        self
    }

    pub fn increment(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push((field.into(), FieldOp::Increment(by)));
        self
    }

    pub fn array_union(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.ops.push((field.into(), FieldOp::ArrayUnion(values)));
        self
    }

    pub fn array_remove(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.ops.push((field.into(), FieldOp::ArrayRemove(values)));
        self
    }

    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.ops.push((field.into(), FieldOp::Delete));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    /// Apply every operation to `data` in order.
    pub fn apply(&self, data: &mut Value) -> Result<()> {
        if !data.is_object() {
            *data = Value::Object(Map::new());
        }
        for (field, op) in &self.ops {
            apply_op(data, field, op)?;
        }
        Ok(())
    }
}

fn apply_op(data: &mut Value, field: &str, op: &FieldOp) -> Result<()> {
    let invalid = |reason: &str| StoreError::InvalidPatch {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let mut segments: Vec<&str> = field.split('.').collect();
    let last = match segments.pop() {
        Some(s) if !s.is_empty() => s,
        _ => return Err(invalid("empty field path")),
    };

    let mut parent = data;
    for segment in segments {
        let map = parent
            .as_object_mut()
            .ok_or_else(|| invalid("path crosses a non-object value"))?;
        parent = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = parent
        .as_object_mut()
        .ok_or_else(|| invalid("path crosses a non-object value"))?;

    match op {
        FieldOp::Set(value) => {
            map.insert(last.to_string(), value.clone());
        }
        FieldOp::Delete => {
            map.remove(last);
        }
        FieldOp::Increment(by) => {
            let current = match map.get(last) {
                None | Some(Value::Null) => Value::from(0),
                Some(v @ Value::Number(_)) => v.clone(),
                Some(_) => return Err(invalid("increment on a non-numeric value")),
            };
            let next = match current.as_i64() {
                Some(n) => Value::from(n + by),
                None => Value::from(current.as_f64().unwrap_or_default() + *by as f64),
            };
            map.insert(last.to_string(), next);
        }
        FieldOp::ArrayUnion(values) => {
            let entry = map
                .entry(last.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if entry.is_null() {
                *entry = Value::Array(Vec::new());
            }
            let arr = entry
                .as_array_mut()
                .ok_or_else(|| invalid("array union on a non-array value"))?;
            for value in values {
                if !arr.contains(value) {
                    arr.push(value.clone());
                }
            }
        }
        FieldOp::ArrayRemove(values) => {
            if let Some(entry) = map.get_mut(last) {
                let arr = entry
                    .as_array_mut()
                    .ok_or_else(|| invalid("array remove on a non-array value"))?;
                arr.retain(|v| !values.contains(v));
            }
        }
    }
    Ok(())
}
