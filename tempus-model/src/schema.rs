use crate::document::field_value;
use serde::{Deserialize, Serialize};
use tempus_types::{StoreName, Timestamp};

/// Describes the payload shape expected for one store name.
///
/// Documents are checked against their store's schema before they are
/// admitted to the local store; stores without a schema accept any payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSchema {
    pub store_name: StoreName,
    pub fields: Vec<FieldSpec>,
}

impl StoreSchema {
    pub fn new(store_name: impl Into<StoreName>, fields: Vec<FieldSpec>) -> Self {
        Self {
            store_name: store_name.into(),
            fields,
        }
    }

    /// Checks `data` against every field spec. Returns the offending field
    /// path and a reason on the first mismatch.
    pub fn validate(&self, data: &serde_json::Value) -> Result<(), (String, String)> {
        for spec in &self.fields {
            match field_value(data, &spec.path) {
                None if spec.required => {
                    return Err((spec.path.clone(), "required field is missing".into()));
                }
                None => {}
                Some(value) => {
                    if !spec.field_type.accepts(value) {
                        return Err((
                            spec.path.clone(),
                            format!("expected {:?}, found {value}", spec.field_type),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A single typed field within a store's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, dotted path or JSON pointer (e.g., "amount", "/plan/code").
    pub path: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    fn simple(path: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            path: path.into(),
            field_type,
            required,
        }
    }

    /// Shorthand for a text field.
    pub fn text(path: &str, required: bool) -> Self {
        Self::simple(path, FieldType::Text, required)
    }

    /// Shorthand for a numeric field.
    pub fn number(path: &str, required: bool) -> Self {
        Self::simple(path, FieldType::Number, required)
    }

    /// Shorthand for a boolean field.
    pub fn bool(path: &str, required: bool) -> Self {
        Self::simple(path, FieldType::Bool, required)
    }

    /// Shorthand for a timestamp field.
    pub fn timestamp(path: &str, required: bool) -> Self {
        Self::simple(path, FieldType::Timestamp, required)
    }

    /// Shorthand for an array field.
    pub fn array(path: &str, required: bool) -> Self {
        Self::simple(path, FieldType::Array, required)
    }

    /// Shorthand for an untyped JSON field.
    pub fn json(path: &str, required: bool) -> Self {
        Self::simple(path, FieldType::Json, required)
    }
}

/// The data type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Bool,
    /// Epoch milliseconds or an RFC 3339 string.
    Timestamp,
    Array,
    Json,
}

impl FieldType {
    /// Returns true if `value` is an instance of this type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => Timestamp::from_json(value).is_ok(),
            FieldType::Array => value.is_array(),
            FieldType::Json => true,
        }
    }
}
