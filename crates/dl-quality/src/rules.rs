//! Per-record rule predicates

use crate::error::{QualityError, QualityResult};
use dl_core::{NormalizedRecord, QualityRuleConfig, RuleCheck, Value};
use regex::Regex;
use std::collections::HashMap;

/// Maximum number of failing source keys kept per rule
pub const SAMPLE_LIMIT: usize = 5;

/// Counts produced by evaluating one rule over a batch
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub records_checked: usize,
    pub records_failed: usize,
    /// Source keys of the first failing records
    pub sample_failures: Vec<String>,
}

impl RuleOutcome {
    /// `100 * (checked - failed) / checked`, or 100 for an empty batch
    pub fn score(&self) -> f64 {
        if self.records_checked == 0 {
            return 100.0;
        }
        let passed = self.records_checked.saturating_sub(self.records_failed);
        100.0 * passed as f64 / self.records_checked as f64
    }
}

/// A rule ready to be evaluated, with its pattern compiled once
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub config: QualityRuleConfig,
    pattern: Option<Regex>,
}

impl CompiledRule {
    pub fn compile(config: &QualityRuleConfig) -> QualityResult<Self> {
        let pattern = match &config.check {
            RuleCheck::Regex { pattern } => {
                // Anchored: the whole value must match
                let anchored = format!("^(?:{pattern})$");
                let compiled =
                    Regex::new(&anchored).map_err(|e| QualityError::InvalidPattern {
                        rule: config.name.to_string(),
                        message: e.to_string(),
                    })?;
                Some(compiled)
            }
            _ => None,
        };
        Ok(Self {
            config: config.clone(),
            pattern,
        })
    }

    /// Evaluate the rule over every record of the batch
    pub fn evaluate(&self, batch: &[NormalizedRecord]) -> RuleOutcome {
        let field = self.config.field.as_str();
        let duplicates = match self.config.check {
            RuleCheck::Unique => value_counts(batch, field),
            _ => HashMap::new(),
        };

        let mut outcome = RuleOutcome {
            records_checked: batch.len(),
            records_failed: 0,
            sample_failures: Vec::new(),
        };
        for record in batch {
            let value = record.get(field);
            let passed = match &self.config.check {
                RuleCheck::Unique => value
                    .render()
                    .map_or(true, |v| duplicates.get(&v).copied().unwrap_or(0) <= 1),
                check => self.check_value(check, value),
            };
            if !passed {
                outcome.records_failed += 1;
                if outcome.sample_failures.len() < SAMPLE_LIMIT {
                    outcome.sample_failures.push(record.source_key.to_string());
                }
            }
        }
        outcome
    }

    fn check_value(&self, check: &RuleCheck, value: &Value) -> bool {
        if value.is_null() {
            return !matches!(check, RuleCheck::NotNull);
        }
        match check {
            RuleCheck::NotNull | RuleCheck::Unique => true,
            RuleCheck::NonNegative => value.as_f64().is_some_and(|v| v >= 0.0),
            RuleCheck::Positive => value.as_f64().is_some_and(|v| v > 0.0),
            RuleCheck::MinValue { value: min } => value.as_f64().is_some_and(|v| v >= *min),
            RuleCheck::MaxValue { value: max } => value.as_f64().is_some_and(|v| v <= *max),
            RuleCheck::AcceptedValues { values } => value
                .render()
                .is_some_and(|v| values.iter().any(|accepted| *accepted == v)),
            RuleCheck::Regex { .. } => match (&self.pattern, value.render()) {
                (Some(re), Some(v)) => re.is_match(&v),
                _ => false,
            },
        }
    }
}

/// How often each non-null rendered value occurs in the batch
fn value_counts(batch: &[NormalizedRecord], field: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for value in batch.iter().filter_map(|r| r.get(field).render()) {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
#[path = "rules_test.rs"]
mod tests;
