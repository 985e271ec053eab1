//! Query descriptors: collection, filters, ordering and limit.
//!
//! The same descriptor drives both the backend (which evaluates it) and the
//! client-side materializer (which re-sorts incremental changes with
//! [`Query::compare`]).

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{lookup, Document};
use crate::error::{Result, StoreError};

/// Pseudo field path addressing the document id.
pub const DOCUMENT_ID: &str = "__id__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        let id_value;
        let field = if self.field == DOCUMENT_ID {
            id_value = Value::String(doc.id.clone());
            Some(&id_value)
        } else {
            lookup(&doc.data, &self.field)
        };

        match self.op {
            FilterOp::Eq => field == Some(&self.value),
            FilterOp::NotEq => field.is_some() && field != Some(&self.value),
            FilterOp::Lt => cmp_present(field, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                cmp_present(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => cmp_present(field, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                cmp_present(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::ArrayContains => field
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.contains(&self.value)),
            FilterOp::ArrayContainsAny => {
                let wanted = self.value.as_array().map(Vec::as_slice).unwrap_or_default();
                field
                    .and_then(Value::as_array)
                    .is_some_and(|arr| arr.iter().any(|v| wanted.contains(v)))
            }
            FilterOp::In => {
                let wanted = self.value.as_array().map(Vec::as_slice).unwrap_or_default();
                field.is_some_and(|v| wanted.contains(v))
            }
            FilterOp::NotIn => {
                let excluded = self.value.as_array().map(Vec::as_slice).unwrap_or_default();
                field.is_some_and(|v| !excluded.contains(v))
            }
        }
    }
}

fn cmp_present(field: Option<&Value>, value: &Value) -> Option<Ordering> {
    let field = field?;
    if type_rank(field) != type_rank(value) {
        return None;
    }
    Some(compare_values(field, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Descriptor of a backend query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn where_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(field, FilterOp::In, Value::Array(values))
    }

    pub fn array_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::ArrayContains, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject descriptors the backend would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(StoreError::InvalidQuery("empty collection name".into()));
        }
        for filter in &self.filters {
            let needs_list = matches!(
                filter.op,
                FilterOp::In | FilterOp::NotIn | FilterOp::ArrayContainsAny
            );
            if needs_list {
                match filter.value.as_array() {
                    Some(list) if !list.is_empty() => {}
                    _ => {
                        return Err(StoreError::InvalidQuery(format!(
                            "'{:?}' on '{}' needs a non-empty list",
                            filter.op, filter.field
                        )))
                    }
                }
            }
        }
        if self.limit == Some(0) {
            return Err(StoreError::InvalidQuery("limit must be positive".into()));
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Ordering of two documents under this query; ties break on the id.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_field = match &self.order_by {
            Some(order) => {
                let null = Value::Null;
                let left = lookup(&a.data, &order.field).unwrap_or(&null);
                let right = lookup(&b.data, &order.field).unwrap_or(&null);
                let ord = compare_values(left, right);
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }
            None => Ordering::Equal,
        };
        by_field.then_with(|| a.id.cmp(&b.id))
    }

    /// Sort documents in place per the query ordering.
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| self.compare(a, b));
    }

    /// Evaluate the whole query over a set of candidate documents.
    pub fn run<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect();
        self.sort(&mut matched);
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
