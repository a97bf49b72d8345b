//! Raw and normalized records

use crate::names::{EntityName, NaturalKey};
use crate::value::Value;
use crate::watermark::Watermark;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub(crate) static NULL_VALUE: Value = Value::Null;

/// One untyped source record as delivered by an extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize for the rejected-record log
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, serde_json::Value)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A record mapped onto its entity's canonical, typed attribute set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub entity: EntityName,
    pub source_key: NaturalKey,
    pub observed_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, Value>,
}

impl NormalizedRecord {
    /// Attribute value, `Null` for unknown fields
    pub fn get(&self, field: &str) -> &Value {
        self.attributes.get(field).unwrap_or(&NULL_VALUE)
    }

    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.observed_at, self.source_key.as_str())
    }
}
