//! Field-level update operations for upserts
//!
//! A [`DocUpdate`] is the unit the store applies atomically to one document:
//! an ordered list of set / increment / push / add-to-set / set-on-insert
//! operations on top-level fields.

use serde_json::{Map, Value};

/// One operation on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Overwrite the field
    Set(String, Value),
    /// Add to a numeric field (missing counts as 0)
    Inc(String, i64),
    /// Append to an array field
    Push(String, Value),
    /// Append to an array field unless an equal value is present
    AddToSet(String, Value),
    /// Set the field only when the document is being created
    SetOnInsert(String, Value),
}

impl UpdateOp {
    pub fn field(&self) -> &str {
        match self {
            UpdateOp::Set(f, _)
            | UpdateOp::Inc(f, _)
            | UpdateOp::Push(f, _)
            | UpdateOp::AddToSet(f, _)
            | UpdateOp::SetOnInsert(f, _) => f,
        }
    }
}

/// Ordered update for a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocUpdate {
    ops: Vec<UpdateOp>,
}

impl DocUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.to_string(), value.into()));
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(field.to_string(), by));
        self
    }

    pub fn push(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push(field.to_string(), value.into()));
        self
    }

    pub fn add_to_set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops
            .push(UpdateOp::AddToSet(field.to_string(), value.into()));
        self
    }

    pub fn set_on_insert(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops
            .push(UpdateOp::SetOnInsert(field.to_string(), value.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Find the first operation touching `field`
    pub fn op_for(&self, field: &str) -> Option<&UpdateOp> {
        self.ops.iter().find(|op| op.field() == field)
    }

    /// Apply all operations to `doc`.
    ///
    /// `inserting` is true when the document did not exist before this
    /// update. Fields holding the wrong type for an operation are replaced
    /// rather than rejected.
    pub fn apply(&self, doc: &mut Map<String, Value>, inserting: bool) {
        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    doc.insert(field.clone(), value.clone());
                }
                UpdateOp::Inc(field, by) => {
                    let next = match doc.get(field) {
                        Some(Value::Number(n)) => match n.as_i64() {
                            Some(current) => Value::from(current + by),
                            None => Value::from(n.as_f64().unwrap_or(0.0) + *by as f64),
                        },
                        _ => Value::from(*by),
                    };
                    doc.insert(field.clone(), next);
                }
                UpdateOp::Push(field, value) => {
                    with_array(doc, field, |items| items.push(value.clone()));
                }
                UpdateOp::AddToSet(field, value) => {
                    with_array(doc, field, |items| {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    });
                }
                UpdateOp::SetOnInsert(field, value) => {
                    if inserting {
                        doc.insert(field.clone(), value.clone());
                    }
                }
            }
        }
    }
}

fn with_array(doc: &mut Map<String, Value>, field: &str, f: impl FnOnce(&mut Vec<Value>)) {
    let mut items = match doc.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    f(&mut items);
    doc.insert(field.to_string(), Value::Array(items));
}
