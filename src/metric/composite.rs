//! Composite record metrics: a base string metric applied field-by-field.

use serde::{Deserialize, Serialize};

use super::{BaseMetric, Metric, normalize};
use crate::error::MetricError;
use crate::record::Record;

/// How per-field distances combine into one record distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Aggregation {
    /// Plain sum of field distances.
    Sum,
    /// `normalize(sum)`, always bounded by 1.
    Sigma,
    /// Arithmetic mean over field pairs.
    Mean,
    /// Largest field distance.
    Max,
    /// Mean over pairs where neither value is missing; `all_missing` when none remain.
    MeanIgnoringMissing { all_missing: f64 },
    /// Mean where a pair with a missing value contributes `missing`.
    MeanImputingMissing { missing: f64 },
}

impl Aggregation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Sigma => "sigma",
            Self::Mean => "mean",
            Self::Max => "max",
            Self::MeanIgnoringMissing { .. } => "mean-ignoring-missing",
            Self::MeanImputingMissing { .. } => "mean-imputing-missing",
        }
    }

    fn substitute(&self) -> Option<f64> {
        match self {
            Self::MeanIgnoringMissing { all_missing } => Some(*all_missing),
            Self::MeanImputingMissing { missing } => Some(*missing),
            _ => None,
        }
    }
}

/// Whether a field value counts as missing for the missing-aware aggregations.
pub fn is_missing(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v.is_empty() || v.contains("missing") || v == "--" || v == "----"
}

/// A base metric over positionally paired field lists.
///
/// Immutable after construction, so one instance is safely shared by every
/// worker thread.
#[derive(Debug, Clone)]
pub struct CompositeMetric {
    name: String,
    base: BaseMetric,
    fields1: Vec<usize>,
    fields2: Vec<usize>,
    aggregation: Aggregation,
}

impl CompositeMetric {
    /// Compare the same fields on both records (single-source linkage).
    pub fn symmetric(
        base: BaseMetric,
        fields: Vec<usize>,
        aggregation: Aggregation,
    ) -> Result<Self, MetricError> {
        Self::two_source(base, fields.clone(), fields, aggregation)
    }

    /// Compare `fields1[i]` of the first record with `fields2[i]` of the second.
    pub fn two_source(
        base: BaseMetric,
        fields1: Vec<usize>,
        fields2: Vec<usize>,
        aggregation: Aggregation,
    ) -> Result<Self, MetricError> {
        if fields1.len() != fields2.len() {
            return Err(MetricError::FieldListMismatch {
                left: fields1.len(),
                right: fields2.len(),
            });
        }
        if fields1.is_empty() {
            return Err(MetricError::EmptyFieldList);
        }
        if let Some(value) = aggregation.substitute() {
            if value < 0.0 || (base.max_distance_is_one() && value > 1.0) {
                return Err(MetricError::InvalidMissingDistance {
                    metric: base.name().to_string(),
                    value,
                });
            }
        }
        Ok(Self {
            name: format!("{}-{}", aggregation.label(), base.name()),
            base,
            fields1,
            fields2,
            aggregation,
        })
    }

    /// Override the generated name (`<aggregation>-<base>`).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn base(&self) -> BaseMetric {
        self.base
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn field_values<'r>(
        &self,
        a: &'r Record,
        b: &'r Record,
    ) -> Option<Vec<(&'r str, &'r str)>> {
        self.fields1
            .iter()
            .zip(&self.fields2)
            .map(|(&f1, &f2)| Some((a.get(f1)?, b.get(f2)?)))
            .collect()
    }
}

impl Metric for CompositeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn distance(&self, a: &Record, b: &Record) -> Option<f64> {
        let pairs = self.field_values(a, b)?;
        let n = pairs.len() as f64;
        let d = |(x, y): &(&str, &str)| self.base.distance(x, y);

        let value = match self.aggregation {
            Aggregation::Sum => pairs.iter().map(d).sum(),
            Aggregation::Sigma => normalize(pairs.iter().map(d).sum()),
            Aggregation::Mean => pairs.iter().map(d).sum::<f64>() / n,
            Aggregation::Max => pairs.iter().map(d).fold(0.0, f64::max),
            Aggregation::MeanIgnoringMissing { all_missing } => {
                let present: Vec<f64> = pairs
                    .iter()
                    .filter(|(x, y)| !is_missing(x) && !is_missing(y))
                    .map(d)
                    .collect();
                if present.is_empty() {
                    all_missing
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                }
            }
            Aggregation::MeanImputingMissing { missing } => {
                let total: f64 = pairs
                    .iter()
                    .map(|p| {
                        if is_missing(p.0) || is_missing(p.1) {
                            missing
                        } else {
                            d(p)
                        }
                    })
                    .sum();
                total / n
            }
        };
        Some(value)
    }

    fn max_distance_is_one(&self) -> bool {
        match self.aggregation {
            Aggregation::Sigma => true,
            Aggregation::Sum => false,
            _ => self.base.max_distance_is_one(),
        }
    }
}
