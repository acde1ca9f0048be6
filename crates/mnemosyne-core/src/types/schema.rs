//! Collection schema types.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use strum::{Display, EnumString};

use crate::error::{MnemosyneError, MnemosyneResult};

/// A stored row: field name to JSON value.
pub type Entity = HashMap<String, serde_json::Value>;

/// Read an INT64 field value.
///
/// Milvus REST may return INT64 as a decimal string to avoid precision loss.
pub fn int64_value(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Field data types understood by the vector database.
///
/// Names match the Milvus RESTful API so they can be sent and parsed as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    VarChar,
    #[serde(rename = "JSON")]
    #[strum(serialize = "JSON")]
    Json,
    FloatVector,
}

impl DataType {
    /// Whether values of this type are integers.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Whether `value` is an acceptable JSON encoding of this type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Self::Bool => value.is_boolean(),
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => {
                value.is_i64() || value.is_u64()
            }
            Self::Float | Self::Double => value.is_number(),
            Self::VarChar => value.is_string(),
            Self::Json => true,
            Self::FloatVector => match value {
                Value::Array(items) => items.iter().all(Value::is_number),
                _ => false,
            },
        }
    }
}

/// Similarity metric of a vector index.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum MetricType {
    /// Squared Euclidean distance. Smaller is closer.
    #[default]
    L2,
    /// Inner product. Larger is closer.
    #[serde(rename = "IP")]
    #[strum(serialize = "IP")]
    Ip,
    /// Cosine similarity. Larger is closer.
    #[serde(rename = "COSINE")]
    #[strum(serialize = "COSINE")]
    Cosine,
}

impl MetricType {
    /// Whether a smaller distance value ranks higher.
    pub fn ascending(&self) -> bool {
        matches!(self, Self::L2)
    }

    /// Score `b` against `a` the way the server reports it: squared
    /// Euclidean distance for L2, raw similarity for IP and COSINE.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
        match self {
            Self::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::Ip => dot(a, b),
            Self::Cosine => {
                let norm = dot(a, a).sqrt() * dot(b, b).sqrt();
                if norm == 0.0 {
                    0.0
                } else {
                    dot(a, b) / norm
                }
            }
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Index parameters for a vector field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Index type, e.g. `IVF_FLAT`, `HNSW`, `FLAT`.
    pub index_type: String,
    /// Metric used for search on this index.
    #[serde(default)]
    pub metric_type: MetricType,
    /// Build parameters, e.g. `{"nlist": 256}`.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for IndexParams {
    fn default() -> Self {
        let mut params = serde_json::Map::new();
        params.insert("nlist".to_string(), serde_json::json!(256));
        Self {
            index_type: "IVF_FLAT".to_string(),
            metric_type: MetricType::L2,
            params,
        }
    }
}

/// Definition of a single collection field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub dtype: DataType,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub auto_id: bool,
    #[serde(default)]
    pub is_nullable: bool,
    /// Required for `VarChar`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Required for `FloatVector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    /// Index for `FloatVector` fields. Falls back to [`IndexParams::default`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_params: Option<IndexParams>,
}

impl FieldSchema {
    /// Create a plain field of the given type.
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            is_primary: false,
            auto_id: false,
            is_nullable: false,
            max_length: None,
            dim: None,
            index_params: None,
        }
    }

    /// INT64 primary key.
    pub fn primary_int64(name: impl Into<String>, auto_id: bool) -> Self {
        Self {
            is_primary: true,
            auto_id,
            ..Self::new(name, DataType::Int64)
        }
    }

    /// VARCHAR primary key.
    pub fn primary_varchar(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            is_primary: true,
            ..Self::varchar(name, max_length)
        }
    }

    /// VARCHAR field.
    pub fn varchar(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            max_length: Some(max_length),
            ..Self::new(name, DataType::VarChar)
        }
    }

    /// INT64 field.
    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Int64)
    }

    /// FLOAT_VECTOR field.
    pub fn float_vector(name: impl Into<String>, dim: usize) -> Self {
        Self {
            dim: Some(dim),
            ..Self::new(name, DataType::FloatVector)
        }
    }

    /// Mark the field as nullable.
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    /// Attach index parameters.
    pub fn with_index(mut self, params: IndexParams) -> Self {
        self.index_params = Some(params);
        self
    }

    /// Index parameters to build for this field, defaulting when absent.
    pub fn effective_index(&self) -> IndexParams {
        self.index_params.clone().unwrap_or_default()
    }
}

/// Definition of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub description: String,
}

impl CollectionSchema {
    /// Create a schema from fields.
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self {
            fields,
            description: String::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The primary key field.
    pub fn primary_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary)
    }

    /// The first vector field.
    pub fn vector_field(&self) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.dtype == DataType::FloatVector)
    }

    /// Check the schema is well-formed before it is sent to a backend.
    pub fn validate(&self) -> MnemosyneResult<()> {
        if self.fields.is_empty() {
            return Err(MnemosyneError::invalid_schema("schema has no fields"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(MnemosyneError::invalid_schema(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
            match field.dtype {
                DataType::VarChar if field.max_length.is_none() => {
                    return Err(MnemosyneError::invalid_schema(format!(
                        "VarChar field '{}' requires max_length",
                        field.name
                    )));
                }
                DataType::FloatVector if field.dim.unwrap_or(0) == 0 => {
                    return Err(MnemosyneError::invalid_schema(format!(
                        "FloatVector field '{}' requires a non-zero dim",
                        field.name
                    )));
                }
                _ => {}
            }
            if field.auto_id && !(field.is_primary && field.dtype == DataType::Int64) {
                return Err(MnemosyneError::invalid_schema(format!(
                    "auto_id is only allowed on an Int64 primary key, not '{}'",
                    field.name
                )));
            }
        }

        let primaries = self.fields.iter().filter(|f| f.is_primary).count();
        if primaries != 1 {
            return Err(MnemosyneError::invalid_schema(format!(
                "schema must have exactly one primary key, found {}",
                primaries
            )));
        }

        Ok(())
    }

    /// Compare this (expected) schema against an existing one.
    ///
    /// Returns every mismatch found; an empty vec means the schemas agree.
    pub fn diff(&self, actual: &CollectionSchema) -> Vec<SchemaMismatch> {
        if actual.fields.is_empty() && !self.fields.is_empty() {
            return vec![SchemaMismatch::NoActualFields];
        }
        if self.fields.is_empty() {
            return vec![SchemaMismatch::NoExpectedFields];
        }

        let existing: HashMap<&str, &FieldSchema> =
            actual.fields.iter().map(|f| (f.name.as_str(), f)).collect();
        let mut mismatches = Vec::new();

        for expected in &self.fields {
            let Some(found) = existing.get(expected.name.as_str()) else {
                mismatches.push(SchemaMismatch::MissingField {
                    field: expected.name.clone(),
                });
                continue;
            };

            if found.dtype != expected.dtype {
                mismatches.push(SchemaMismatch::TypeMismatch {
                    field: expected.name.clone(),
                    expected: expected.dtype,
                    actual: found.dtype,
                });
                continue;
            }

            match expected.dtype {
                DataType::VarChar if found.max_length != expected.max_length => {
                    mismatches.push(SchemaMismatch::MaxLengthMismatch {
                        field: expected.name.clone(),
                        expected: expected.max_length,
                        actual: found.max_length,
                    });
                }
                DataType::FloatVector if found.dim != expected.dim => {
                    mismatches.push(SchemaMismatch::DimMismatch {
                        field: expected.name.clone(),
                        expected: expected.dim,
                        actual: found.dim,
                    });
                }
                _ => {}
            }
        }

        let expected_names: HashSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        let mut extra: Vec<String> = actual
            .fields
            .iter()
            .filter(|f| !expected_names.contains(f.name.as_str()))
            .map(|f| f.name.clone())
            .collect();
        if !extra.is_empty() {
            extra.sort();
            mismatches.push(SchemaMismatch::ExtraFields { fields: extra });
        }

        mismatches
    }
}

/// One difference between an expected and an existing schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    NoActualFields,
    NoExpectedFields,
    MissingField {
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: DataType,
        actual: DataType,
    },
    MaxLengthMismatch {
        field: String,
        expected: Option<u32>,
        actual: Option<u32>,
    },
    DimMismatch {
        field: String,
        expected: Option<usize>,
        actual: Option<usize>,
    },
    ExtraFields {
        fields: Vec<String>,
    },
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoActualFields => write!(f, "collection has no fields"),
            Self::NoExpectedFields => write!(f, "expected schema has no fields"),
            Self::MissingField { field } => write!(f, "missing field '{}'", field),
            Self::TypeMismatch {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field '{}' has type {}, expected {}",
                field, actual, expected
            ),
            Self::MaxLengthMismatch {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field '{}' has max_length {:?}, expected {:?}",
                field, actual, expected
            ),
            Self::DimMismatch {
                field,
                expected,
                actual,
            } => write!(f, "field '{}' has dim {:?}, expected {:?}", field, actual, expected),
            Self::ExtraFields { fields } => write!(f, "unexpected fields: {}", fields.join(", ")),
        }
    }
}

/// A single result of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Primary key of the matched row.
    pub id: serde_json::Value,
    /// Distance or similarity under the index metric.
    pub distance: f32,
    /// Stored fields of the row, without the vector.
    pub entity: Entity,
}
