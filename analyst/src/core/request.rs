//! Immutable run input: query, dataset, schema, and retry budget.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// One dataset row keyed by column name.
pub type Row = Map<String, Value>;

/// Column name to declared type, in dataset column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<(String, String)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, replacing the type if the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, dtype: impl Into<String>) {
        let name = name.into();
        let dtype = dtype.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = dtype,
            None => self.columns.push((name, dtype)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, dtype)| dtype.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, dtype)| (name.as_str(), dtype.as_str()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Renders as `{'col': 'dtype', ...}`, the form prompts show to the model.
impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, dtype)) in self.columns().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{name}': '{dtype}'")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Schema {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut schema = Schema::new();
        for (name, dtype) in iter {
            schema.insert(name, dtype);
        }
        schema
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, dtype) in self.columns() {
            map.serialize_entry(name, dtype)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to declared type")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Schema, A::Error> {
                let mut schema = Schema::new();
                while let Some((name, dtype)) = access.next_entry::<String, String>()? {
                    schema.insert(name, dtype);
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// Reasons a run request is rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("query must be non-empty")]
    EmptyQuery,
    #[error("schema must declare at least one column")]
    EmptySchema,
    #[error("max_retry must be between 1 and {limit} (got {value})")]
    BudgetOutOfRange { value: u32, limit: u32 },
}

/// Input for one run. Validated on construction and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    query: String,
    rows: Vec<Row>,
    schema: Schema,
    max_retry: u32,
}

impl RunRequest {
    pub fn new(
        query: impl Into<String>,
        rows: Vec<Row>,
        schema: Schema,
        max_retry: u32,
        max_retry_limit: u32,
    ) -> Result<Self, RequestError> {
        let query = query.into().trim().to_string();
        if query.is_empty() {
            return Err(RequestError::EmptyQuery);
        }
        if schema.is_empty() {
            return Err(RequestError::EmptySchema);
        }
        if max_retry == 0 || max_retry > max_retry_limit {
            return Err(RequestError::BudgetOutOfRange {
                value: max_retry,
                limit: max_retry_limit,
            });
        }
        Ok(Self {
            query,
            rows,
            schema,
            max_retry,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        [("category", "object"), ("count", "int64")]
            .into_iter()
            .collect()
    }

    #[test]
    fn schema_preserves_column_order_through_json() {
        let schema: Schema = [("zeta", "object"), ("alpha", "int64"), ("mid", "float64")]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&schema).expect("serialize");
        assert_eq!(json, r#"{"zeta":"object","alpha":"int64","mid":"float64"}"#);
        let back: Schema = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, schema);
    }

    #[test]
    fn schema_displays_as_dict_literal() {
        assert_eq!(
            schema().to_string(),
            "{'category': 'object', 'count': 'int64'}"
        );
    }

    #[test]
    fn schema_insert_replaces_existing_type() {
        let mut schema = schema();
        schema.insert("count", "float64");
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("count"), Some("float64"));
    }

    #[test]
    fn request_trims_query() {
        let request = RunRequest::new("  bar chart  ", Vec::new(), schema(), 3, 7).expect("ok");
        assert_eq!(request.query(), "bar chart");
        assert_eq!(request.max_retry(), 3);
    }

    #[test]
    fn request_rejects_invalid_inputs() {
        assert_eq!(
            RunRequest::new("   ", Vec::new(), schema(), 3, 7),
            Err(RequestError::EmptyQuery)
        );
        assert_eq!(
            RunRequest::new("q", Vec::new(), Schema::new(), 3, 7),
            Err(RequestError::EmptySchema)
        );
        assert_eq!(
            RunRequest::new("q", Vec::new(), schema(), 0, 7),
            Err(RequestError::BudgetOutOfRange { value: 0, limit: 7 })
        );
        assert_eq!(
            RunRequest::new("q", Vec::new(), schema(), 8, 7),
            Err(RequestError::BudgetOutOfRange { value: 8, limit: 7 })
        );
    }
}
