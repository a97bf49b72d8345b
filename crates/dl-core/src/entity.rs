//! Entity descriptors: field lists, SCD policy, fact references and measures
//!
//! One descriptor per source entity. Dimensions carry an SCD policy and the
//! tracked attribute set; facts carry dimension references, the business
//! deduplication tuple and the measures used to compute the total.

use crate::error::{CoreError, CoreResult};
use crate::names::EntityName;
use crate::value::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Columns the warehouse manages itself; entity fields may not use them
pub const RESERVED_COLUMNS: &[&str] = &[
    "surrogate_key",
    "natural_key",
    "effective_from",
    "effective_to",
    "is_current",
    "dw_created_at",
    "dw_updated_at",
    "dw_load_date",
    "dw_loaded_at",
];

/// Whether an entity lands in a dimension table or the fact table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Dimension,
    Fact,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Dimension => write!(f, "dimension"),
            EntityKind::Fact => write!(f, "fact"),
        }
    }
}

/// Slowly-changing-dimension merge policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScdPolicy {
    /// Overwrite attributes in place, no history
    Type1,
    /// Expire the current row and insert a new version
    #[default]
    Type2,
}

impl std::fmt::Display for ScdPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScdPolicy::Type1 => write!(f, "type1"),
            ScdPolicy::Type2 => write!(f, "type2"),
        }
    }
}

/// Normalization applied to string fields after trimming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldTransform {
    Trim,
    Lowercase,
    Uppercase,
}

/// One canonical field of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub transform: Option<FieldTransform>,
}

/// A fact field that must resolve to a dimension surrogate key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    /// Referenced dimension entity
    pub dimension: EntityName,

    /// Fact field holding the dimension's natural key
    pub field: String,

    /// Fact table column receiving the surrogate key
    pub column: String,
}

/// Fields feeding `total = quantity * unit_price - discount + tax`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Measures {
    pub quantity: String,
    pub unit_price: String,

    #[serde(default)]
    pub discount: Option<String>,

    #[serde(default)]
    pub tax: Option<String>,

    /// Output column for the computed total
    #[serde(default = "default_total_column")]
    pub total: String,
}

fn default_total_column() -> String {
    "total_amount".to_string()
}

/// Descriptor of one source entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDescriptor {
    pub name: EntityName,

    pub kind: EntityKind,

    /// Warehouse table name
    pub table: String,

    /// Field holding the business identifier
    pub natural_key: String,

    /// Date or timestamp field bounding incremental extraction
    #[serde(default)]
    pub watermark_field: Option<String>,

    pub fields: Vec<FieldSpec>,

    /// Source location for the bundled CSV extractor
    #[serde(default)]
    pub source: Option<String>,

    /// Dimension only: merge policy
    #[serde(default)]
    pub scd: ScdPolicy,

    /// Dimension only: attributes that trigger a new Type-2 version
    #[serde(default)]
    pub tracked: Vec<String>,

    /// Fact only: dimension references
    #[serde(default)]
    pub references: Vec<Reference>,

    /// Fact only: business tuple identifying a fact row across runs
    #[serde(default)]
    pub dedup_key: Vec<String>,

    /// Fact only: measure fields for the computed total
    #[serde(default)]
    pub measures: Option<Measures>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether normalized records carry `name`: a declared field or the
    /// computed fact total
    pub fn has_attribute(&self, name: &str) -> bool {
        self.field(name).is_some() || self.measures.as_ref().is_some_and(|m| m.total == name)
    }

    pub fn is_dimension(&self) -> bool {
        self.kind == EntityKind::Dimension
    }

    pub fn is_fact(&self) -> bool {
        self.kind == EntityKind::Fact
    }

    /// Attributes compared when deciding whether a Type-2 row needs a new version.
    ///
    /// Defaults to every field except the natural key.
    pub fn tracked_attributes(&self) -> Vec<&str> {
        if self.tracked.is_empty() {
            self.fields
                .iter()
                .map(|f| f.name.as_str())
                .filter(|name| *name != self.natural_key)
                .collect()
        } else {
            self.tracked.iter().map(String::as_str).collect()
        }
    }

    /// Check that every field this descriptor names is declared
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |message: String| CoreError::ConfigInvalid {
            message: format!("entity '{}': {}", self.name, message),
        };

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(invalid(format!("field name '{}' is reserved", field.name)));
            }
        }

        if self.field(&self.natural_key).is_none() {
            return Err(invalid(format!(
                "natural_key '{}' is not a declared field",
                self.natural_key
            )));
        }

        if let Some(wm) = &self.watermark_field {
            match self.field(wm) {
                Some(spec) if spec.field_type.is_temporal() => {}
                Some(spec) => {
                    return Err(invalid(format!(
                        "watermark_field '{}' must be a date or timestamp, found {}",
                        wm, spec.field_type
                    )))
                }
                None => {
                    return Err(invalid(format!(
                        "watermark_field '{wm}' is not a declared field"
                    )))
                }
            }
        }

        match self.kind {
            EntityKind::Dimension => {
                for name in &self.tracked {
                    if self.field(name).is_none() {
                        return Err(invalid(format!(
                            "tracked attribute '{name}' is not a declared field"
                        )));
                    }
                }
                if !self.references.is_empty()
                    || !self.dedup_key.is_empty()
                    || self.measures.is_some()
                {
                    return Err(invalid(
                        "references, dedup_key and measures apply to facts only".to_string(),
                    ));
                }
            }
            EntityKind::Fact => {
                if self.dedup_key.is_empty() {
                    return Err(invalid("fact entities require a dedup_key".to_string()));
                }
                for name in &self.dedup_key {
                    if self.field(name).is_none() {
                        return Err(invalid(format!(
                            "dedup_key field '{name}' is not a declared field"
                        )));
                    }
                }
                for reference in &self.references {
                    if self.field(&reference.field).is_none() {
                        return Err(invalid(format!(
                            "reference field '{}' is not a declared field",
                            reference.field
                        )));
                    }
                    if !seen.insert(reference.column.as_str())
                        || RESERVED_COLUMNS.contains(&reference.column.as_str())
                    {
                        return Err(invalid(format!(
                            "reference column '{}' collides with another column",
                            reference.column
                        )));
                    }
                }
                if let Some(m) = &self.measures {
                    if !seen.insert(m.total.as_str()) || RESERVED_COLUMNS.contains(&m.total.as_str()) {
                        return Err(invalid(format!(
                            "total column '{}' collides with another column",
                            m.total
                        )));
                    }
                    let names = [
                        Some(&m.quantity),
                        Some(&m.unit_price),
                        m.discount.as_ref(),
                        m.tax.as_ref(),
                    ];
                    for name in names.into_iter().flatten() {
                        match self.field(name) {
                            Some(spec)
                                if matches!(
                                    spec.field_type,
                                    FieldType::Integer | FieldType::Float
                                ) => {}
                            _ => {
                                return Err(invalid(format!(
                                    "measure '{name}' must be a declared numeric field"
                                )))
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "entity_test.rs"]
mod tests;
