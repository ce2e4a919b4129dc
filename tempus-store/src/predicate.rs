//! Field-level filters applied by the resolver.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::mem::discriminant;
use tempus_model::{compare_json, BusinessKey, Document};
use tempus_types::DocumentId;

/// A filter over documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Business key equals.
    Key(BusinessKey),
    /// Document id equals.
    Id(DocumentId),
    /// Field equals a value.
    Eq { field: String, value: Value },
    /// Field is one of the values.
    In { field: String, values: Vec<Value> },
    /// Field lies in `[min, max)`; either bound may be omitted. Values of a
    /// different JSON kind than the bound never match.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    /// Field is present and not null.
    Exists(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn key(key: BusinessKey) -> Self {
        Self::Key(key)
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, min: Option<Value>, max: Option<Value>) -> Self {
        Self::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Returns true if `doc` satisfies this predicate.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Key(key) => &doc.key == key,
            Self::Id(id) => &doc.id == id,
            Self::Eq { field, value } => doc.field(field) == Some(value),
            Self::In { field, values } => doc.field(field).is_some_and(|v| values.contains(v)),
            Self::Range { field, min, max } => doc.field(field).is_some_and(|v| {
                let above = min
                    .as_ref()
                    .is_none_or(|m| same_kind(v, m) && compare_json(v, m) != Ordering::Less);
                let below = max
                    .as_ref()
                    .is_none_or(|m| same_kind(v, m) && compare_json(v, m) == Ordering::Less);
                above && below
            }),
            Self::Exists(field) => doc.field(field).is_some(),
            Self::And(all) => all.iter().all(|p| p.matches(doc)),
            Self::Or(any) => any.iter().any(|p| p.matches(doc)),
            Self::Not(inner) => !inner.matches(doc),
        }
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    discriminant(a) == discriminant(b)
}
