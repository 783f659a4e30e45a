//! Source entities read from NDJSON exports.

mod schema;

pub use schema::{Bucket, RecordClass, Schema, SchemaRole};

use serde::Deserialize;
use snafu::prelude::*;
use std::collections::BTreeMap;

use crate::error::{EntityError, InvalidJsonSnafu, MissingFieldSnafu};

/// One entity: schema, stable id and multi-valued properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    schema: Schema,
    id: String,
    properties: BTreeMap<String, Vec<String>>,
    caption: Option<String>,
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    caption: Option<String>,
}

impl Entity {
    /// Parse one NDJSON line. `line` is 1-based and only used in errors.
    pub fn from_json_line(text: &str, line: usize) -> Result<Self, EntityError> {
        let raw: RawEntity = serde_json::from_str(text).context(InvalidJsonSnafu { line })?;

        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .context(MissingFieldSnafu { line, field: "id" })?;
        let schema = raw
            .schema
            .filter(|s| !s.is_empty())
            .context(MissingFieldSnafu {
                line,
                field: "schema",
            })?;

        Ok(Self {
            schema: Schema::parse(&schema),
            id,
            properties: raw.properties,
            caption: raw.caption.filter(|c| !c.is_empty()),
        })
    }

    /// Build an entity directly; mostly useful in tests and embedders.
    pub fn new(schema: Schema, id: impl Into<String>) -> Self {
        Self {
            schema,
            id: id.into(),
            properties: BTreeMap::new(),
            caption: None,
        }
    }

    pub fn with_property<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// All values of `prop`, empty if absent.
    pub fn values(&self, prop: &str) -> &[String] {
        self.properties.get(prop).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First non-empty value of `prop`.
    pub fn first(&self, prop: &str) -> Option<&str> {
        self.values(prop)
            .iter()
            .map(String::as_str)
            .find(|v| !v.is_empty())
    }

    pub fn has(&self, prop: &str) -> bool {
        self.first(prop).is_some()
    }

    /// Display caption: the explicit caption, else the first name.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref().or_else(|| self.first("name"))
    }
}
