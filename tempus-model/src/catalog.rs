//! Bootstrap configuration.
//!
//! A [`Catalog`] is read once at startup and shared as `Arc<Catalog>`. It is
//! never mutated afterwards; a configuration change means building a new
//! engine around a new catalog.

use crate::document::{BusinessKey, Document, RawDocument};
use crate::schema::StoreSchema;
use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tempus_types::{CollectionId, StoreName, Timestamp};

/// Immutable per-process configuration for every mirrored collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub collections: HashMap<CollectionId, CollectionConfig>,
    /// Sort criteria applied when materializing a store's results.
    #[serde(default)]
    pub sort: HashMap<StoreName, Vec<SortField>>,
    #[serde(default)]
    pub schemas: HashMap<StoreName, StoreSchema>,
    #[serde(default)]
    pub layout: FieldLayout,
}

/// Configuration for one remote collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Fields whose values identify "the same logical entity". Empty means
    /// every document is its own entity.
    #[serde(default)]
    pub matching_fields: Vec<String>,
    /// Store used for documents that carry no store-name field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_store: Option<StoreName>,
}

impl CollectionConfig {
    pub fn new<S: Into<String>>(matching_fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            matching_fields: matching_fields.into_iter().map(Into::into).collect(),
            default_store: None,
        }
    }

    pub fn with_default_store(mut self, store: impl Into<StoreName>) -> Self {
        self.default_store = Some(store.into());
        self
    }
}

/// Names of the raw fields that carry the temporal and partition metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldLayout {
    pub store_field: String,
    pub effective_from_field: String,
    pub effective_to_field: String,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            store_field: "storeName".to_string(),
            effective_from_field: "effectiveFrom".to_string(),
            effective_to_field: "effectiveTo".to_string(),
        }
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Compares two documents on this field. Documents missing the field
    /// sort after those that have it, whatever the direction.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        match (a.field(&self.field), b.field(&self.field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_json(x, y);
                match self.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            }
        }
    }
}

/// Total order over scalar JSON values of the same kind; mixed kinds order
/// by kind (bool < number < string < other).
pub fn compare_json(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value;
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog from its JSON bootstrap snapshot.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_collection(
        mut self,
        collection: impl Into<CollectionId>,
        config: CollectionConfig,
    ) -> Self {
        self.collections.insert(collection.into(), config);
        self
    }

    pub fn with_sort(mut self, store: impl Into<StoreName>, fields: Vec<SortField>) -> Self {
        self.sort.insert(store.into(), fields);
        self
    }

    pub fn with_schema(mut self, schema: StoreSchema) -> Self {
        self.schemas.insert(schema.store_name.clone(), schema);
        self
    }

    pub fn with_layout(mut self, layout: FieldLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn collection(&self, collection: &CollectionId) -> Option<&CollectionConfig> {
        self.collections.get(collection)
    }

    /// Sort criteria for a store; empty means arrival order.
    pub fn sort_for(&self, store: &StoreName) -> &[SortField] {
        self.sort.get(store).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn schema_for(&self, store: &StoreName) -> Option<&StoreSchema> {
        self.schemas.get(store)
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Validates a raw feed document and lifts it into a [`Document`].
    ///
    /// `now` is used as `effective_from` when the document has neither an
    /// explicit effective-from field nor a remote creation time.
    pub fn document_from_raw(
        &self,
        collection: &CollectionId,
        raw: RawDocument,
        now: Timestamp,
    ) -> ModelResult<Document> {
        let config = self
            .collection(collection)
            .ok_or_else(|| ModelError::UnknownCollection(collection.clone()))?;
        let layout = &self.layout;

        let store_name = match raw.get(&layout.store_field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => StoreName::new(s.as_str()),
            Some(other) => {
                return Err(ModelError::InvalidField {
                    id: raw.id.clone(),
                    field: layout.store_field.clone(),
                    reason: format!("expected a non-empty string, found {other}"),
                });
            }
            None => config
                .default_store
                .clone()
                .ok_or_else(|| ModelError::MissingStore { id: raw.id.clone() })?,
        };

        let effective_from = match raw.get(&layout.effective_from_field) {
            Some(value) => parse_time(&raw, &layout.effective_from_field, value)?,
            None => raw.create_time.unwrap_or(now),
        };
        let effective_to = raw
            .get(&layout.effective_to_field)
            .map(|value| parse_time(&raw, &layout.effective_to_field, value))
            .transpose()?;

        if let Some(to) = effective_to {
            if to < effective_from {
                return Err(ModelError::InvalidField {
                    id: raw.id,
                    field: layout.effective_to_field.clone(),
                    reason: format!("{to} is before effective-from {effective_from}"),
                });
            }
        }

        let data = serde_json::Value::Object(raw.fields);

        let key = if config.matching_fields.is_empty() {
            BusinessKey::from_id(&raw.id)
        } else {
            BusinessKey::project(&data, &config.matching_fields).map_err(|field| {
                ModelError::UnresolvableKey {
                    id: raw.id.clone(),
                    field: field.to_string(),
                }
            })?
        };

        if let Some(schema) = self.schema_for(&store_name) {
            schema
                .validate(&data)
                .map_err(|(field, reason)| ModelError::InvalidField {
                    id: raw.id.clone(),
                    field,
                    reason,
                })?;
        }

        Ok(Document {
            id: raw.id,
            store_name,
            key,
            effective_from,
            effective_to,
            data,
        })
    }
}

fn parse_time(raw: &RawDocument, field: &str, value: &serde_json::Value) -> ModelResult<Timestamp> {
    Timestamp::from_json(value).map_err(|e| ModelError::InvalidField {
        id: raw.id.clone(),
        field: field.to_string(),
        reason: e.to_string(),
    })
}
