use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tempus_types::{DocumentId, StoreName, Timestamp};

/// One version of a logical entity held in the local store.
///
/// `data` keeps every field the feed delivered, including the ones that were
/// lifted into `store_name`, `effective_from` and `effective_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub store_name: StoreName,
    pub key: BusinessKey,
    pub effective_from: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<Timestamp>,
    pub data: serde_json::Value,
}

impl Document {
    /// Returns true if this version has no `effective_to`.
    pub fn is_open(&self) -> bool {
        self.effective_to.is_none()
    }

    /// Returns true if this version is authoritative at `instant`.
    pub fn is_effective_at(&self, instant: Timestamp) -> bool {
        instant.within(self.effective_from, self.effective_to)
    }

    /// Orders two versions by `effective_from`, breaking ties with the
    /// lexicographically greater `id` as the newer one.
    pub fn version_cmp(&self, other: &Document) -> Ordering {
        self.effective_from
            .cmp(&other.effective_from)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Looks up a payload field by name, dotted path or JSON pointer.
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        field_value(&self.data, path)
    }

    /// Extract a string value from `data`.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.field(path).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `data`.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.field(path).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `data`.
    pub fn get_number(&self, path: &str) -> Option<f64> {
        self.field(path).and_then(|v| v.as_f64())
    }
}

/// Resolves `path` against a JSON value.
///
/// A path starting with `/` is a JSON pointer; anything else is a dotted
/// path of object keys (`"plan.code"`). Null values count as absent.
pub fn field_value<'a>(data: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let found = if path.starts_with('/') {
        data.pointer(path)
    } else {
        path.split('.')
            .try_fold(data, |value, segment| value.as_object()?.get(segment))
    };
    found.filter(|v| !v.is_null())
}

/// Business identity of a document: its values for the collection's
/// matching fields, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessKey(Vec<serde_json::Value>);

impl BusinessKey {
    /// Builds a key from explicit component values.
    pub fn new(components: Vec<serde_json::Value>) -> Self {
        Self(components)
    }

    /// Builds a single-component string key.
    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![serde_json::Value::String(value.into())])
    }

    /// Key used when a collection has no matching fields: every document is
    /// its own entity.
    pub fn from_id(id: &DocumentId) -> Self {
        Self::single(id.as_str())
    }

    /// Projects `data` onto `fields`. Returns the first field that has no
    /// value as the error.
    pub fn project<'f>(data: &serde_json::Value, fields: &'f [String]) -> Result<Self, &'f str> {
        fields
            .iter()
            .map(|f| field_value(data, f).cloned().ok_or(f.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Returns the key components.
    pub fn components(&self) -> &[serde_json::Value] {
        &self.0
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            match component {
                serde_json::Value::String(s) => f.write_str(s)?,
                other => write!(f, "{other}")?,
            }
        }
        Ok(())
    }
}

/// A document as the change feed delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: DocumentId,
    /// Creation time reported by the remote system, used when the document
    /// carries no explicit effective-from field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<Timestamp>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl RawDocument {
    /// Creates a raw document from an id and a JSON object. Non-object
    /// values produce an empty field map.
    pub fn new(id: impl Into<DocumentId>, fields: serde_json::Value) -> Self {
        let fields = match fields {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            id: id.into(),
            create_time: None,
            fields,
        }
    }

    /// Sets the remote creation time.
    pub fn with_create_time(mut self, at: Timestamp) -> Self {
        self.create_time = Some(at);
        self
    }

    /// Returns a raw field by name.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }
}
