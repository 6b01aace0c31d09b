//! TOML configuration for the command-line runs.
//!
//! Fields are named rather than indexed here; they are resolved against the
//! header rows of the record files when the run is prepared. Relative paths
//! are taken relative to the directory holding the config file.
//!
//! ```toml
//! dataset = "umea"
//! linkage_type = "birth-birth-sibling"
//! comparison_fields = ["mother_forename", "mother_surname"]
//! ground_truth = [[["family", "family"]]]
//! metrics = ["levenshtein", "jaro-winkler"]
//! aggregation = { kind = "sigma" }
//! grouping = { kind = "symmetric" }
//!
//! [source1]
//! path = "births.csv"
//! role = "birth"
//!
//! [sweep]
//! runs = 2
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LinkageResult};
use crate::indirect::{IndirectPath, IndirectResolver, RecordIndex, load_links};
use crate::linkage::{DirectLinkage, LinkageSpec};
use crate::metric::{Aggregation, BaseMetric, Metric};
use crate::record::{DelimitedFileSource, Record, RecordSource, Schema};
use crate::sweep::SweepConfig;
use crate::truth::{
    AbsentFieldPolicy, FamilyKey, GroundTruth, GroupingMode, RuleSet, ViabilityConfig,
    ViabilityRule,
};

fn default_delimiter() -> char {
    ','
}

fn default_id_field() -> String {
    "id".into()
}

fn default_aggregation() -> Aggregation {
    Aggregation::Sigma
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn rebase(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// A delimited record file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub role: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl SourceConfig {
    pub fn source(&self) -> DelimitedFileSource {
        DelimitedFileSource::new(&self.path, &self.role, &self.id_field, self.delimiter)
    }
}

/// Grouping mode with family-key fields given by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GroupingConfig {
    #[default]
    Symmetric,
    Asymmetric,
    SiblingSymmetric {
        key: [String; 2],
    },
    SiblingNonSymmetric {
        key1: [String; 2],
        key2: [String; 2],
    },
}

impl GroupingConfig {
    pub fn is_single_source(&self) -> bool {
        matches!(self, Self::Symmetric | Self::SiblingSymmetric { .. })
    }

    fn resolve(&self, schema1: &Schema, schema2: &Schema) -> LinkageResult<GroupingMode> {
        let key = |schema: &Schema, [a, b]: &[String; 2]| -> LinkageResult<FamilyKey> {
            Ok(FamilyKey {
                field1: schema.field(a)?,
                field2: schema.field(b)?,
            })
        };
        Ok(match self {
            Self::Symmetric => GroupingMode::Symmetric,
            Self::Asymmetric => GroupingMode::Asymmetric,
            Self::SiblingSymmetric { key: k } => GroupingMode::SiblingSymmetric {
                key: key(schema1, k)?,
            },
            Self::SiblingNonSymmetric { key1, key2 } => GroupingMode::SiblingNonSymmetric {
                key1: key(schema1, key1)?,
                key2: key(schema2, key2)?,
            },
        })
    }
}

/// Viability rule with year fields given by name. The first field of each
/// variant is read from the first record, the second from the second record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ViabilityRuleConfig {
    #[default]
    Always,
    SiblingBirthYears { year1: String, year2: String },
    ParentChildBirthYears { parent_year: String, child_year: String },
    DeathAfterMarriage { death_year: String, marriage_year: String },
    AgeAtEvent { birth_year: String, event_year: String },
}

impl ViabilityRuleConfig {
    fn resolve(&self, schema1: &Schema, schema2: &Schema) -> LinkageResult<ViabilityRule> {
        Ok(match self {
            Self::Always => ViabilityRule::Always,
            Self::SiblingBirthYears { year1, year2 } => ViabilityRule::SiblingBirthYears {
                year1: schema1.field(year1)?,
                year2: schema2.field(year2)?,
            },
            Self::ParentChildBirthYears {
                parent_year,
                child_year,
            } => ViabilityRule::ParentChildBirthYears {
                parent_year: schema1.field(parent_year)?,
                child_year: schema2.field(child_year)?,
            },
            Self::DeathAfterMarriage {
                death_year,
                marriage_year,
            } => ViabilityRule::DeathAfterMarriage {
                death_year: schema1.field(death_year)?,
                marriage_year: schema2.field(marriage_year)?,
            },
            Self::AgeAtEvent {
                birth_year,
                event_year,
            } => ViabilityRule::AgeAtEvent {
                birth_year: schema1.field(birth_year)?,
                event_year: schema2.field(event_year)?,
            },
        })
    }
}

/// Alternative rule-sets of `[field_in_record1, field_in_record2]` pairs.
fn resolve_ground_truth(
    rules: &[Vec<[String; 2]>],
    policy: AbsentFieldPolicy,
    schema1: &Schema,
    schema2: &Schema,
) -> LinkageResult<GroundTruth> {
    let mut alternatives = Vec::with_capacity(rules.len());
    for rule in rules {
        let mut pairs = Vec::with_capacity(rule.len());
        for [f1, f2] in rule {
            pairs.push((schema1.field(f1)?, schema2.field(f2)?));
        }
        alternatives.push(RuleSet::from(pairs));
    }
    Ok(GroundTruth::new(alternatives, policy))
}

fn validate_rules(rules: &[Vec<[String; 2]>]) -> Result<(), ConfigError> {
    if rules.is_empty() || rules.iter().any(Vec::is_empty) {
        return Err(invalid(
            "ground_truth needs at least one rule-set, and every rule-set at least one field pair",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sweep runs
// ---------------------------------------------------------------------------

/// Configuration of a `sweep` or `count-truth` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub dataset: String,
    pub linkage_type: String,
    pub source1: SourceConfig,
    /// Required unless the grouping mode links a source with itself.
    #[serde(default)]
    pub source2: Option<SourceConfig>,
    pub comparison_fields: Vec<String>,
    /// Fields of the second source, when they differ from `comparison_fields`.
    #[serde(default)]
    pub comparison_fields2: Option<Vec<String>>,
    pub ground_truth: Vec<Vec<[String; 2]>>,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub viability: ViabilityRuleConfig,
    pub metrics: Vec<BaseMetric>,
    #[serde(default = "default_aggregation")]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub viability_settings: ViabilityConfig,
}

/// Everything needed to start a sweep.
pub struct PreparedRun {
    pub spec: LinkageSpec,
    pub metrics: Vec<Box<dyn Metric>>,
    pub source1: DelimitedFileSource,
    pub source2: Option<DelimitedFileSource>,
}

impl RunConfig {
    /// Load and validate a run config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = load_toml(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        rebase(base, &mut config.source1.path);
        if let Some(s) = config.source2.as_mut() {
            rebase(base, &mut s.path);
        }
        rebase(base, &mut config.sweep.output_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.is_empty() {
            return Err(invalid("metrics must name at least one base metric"));
        }
        if self.comparison_fields.is_empty() {
            return Err(invalid("comparison_fields must not be empty"));
        }
        if let Some(fields2) = &self.comparison_fields2 {
            if fields2.len() != self.comparison_fields.len() {
                return Err(invalid(format!(
                    "comparison_fields has {} entries but comparison_fields2 has {}",
                    self.comparison_fields.len(),
                    fields2.len()
                )));
            }
        }
        validate_rules(&self.ground_truth)?;
        match (self.grouping.is_single_source(), &self.source2) {
            (true, Some(_)) => {
                return Err(invalid(
                    "this grouping links a source with itself; remove source2",
                ));
            }
            (false, None) => return Err(invalid("this grouping needs source2")),
            _ => {}
        }
        self.sweep
            .validate()
            .map_err(|e| invalid(e.to_string()))
    }

    /// Resolve field names against the record files and build the spec and metrics.
    pub fn prepare(&self) -> LinkageResult<PreparedRun> {
        let source1 = self.source1.source();
        let source2 = self.source2.as_ref().map(SourceConfig::source);
        let schema1 = source1.schema()?;
        let schema2 = match &source2 {
            Some(s) => s.schema()?,
            None => Arc::clone(&schema1),
        };

        let fields1 = schema1.fields(&self.comparison_fields)?;
        let fields2 = schema2.fields(
            self.comparison_fields2
                .as_deref()
                .unwrap_or(&self.comparison_fields),
        )?;
        let ground_truth = resolve_ground_truth(
            &self.ground_truth,
            self.sweep.absent_field_policy,
            &schema1,
            &schema2,
        )?;
        let grouping = self.grouping.resolve(&schema1, &schema2)?;
        let rule = self.viability.resolve(&schema1, &schema2)?;

        let spec = LinkageSpec::new(
            &self.linkage_type,
            schema1.name(),
            schema2.name(),
            fields1,
            fields2,
            ground_truth,
            grouping,
        )?
        .with_viability_rule(rule, self.viability_settings);

        let mut metrics: Vec<Box<dyn Metric>> = Vec::with_capacity(self.metrics.len());
        for base in &self.metrics {
            metrics.push(Box::new(spec.composite_metric(*base, self.aggregation)?));
        }

        Ok(PreparedRun {
            spec,
            metrics,
            source1,
            source2,
        })
    }
}

// ---------------------------------------------------------------------------
// Indirect resolution
// ---------------------------------------------------------------------------

/// One pivot path: two link files and how to join them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    pub first: PathBuf,
    pub second: PathBuf,
    pub link_type: String,
    #[serde(default)]
    pub reversed: bool,
}

/// The direct linkage that decides whether a resolved link is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub linkage_type: String,
    pub role1: String,
    pub role2: String,
    pub rules: Vec<Vec<[String; 2]>>,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub policy: AbsentFieldPolicy,
}

/// Configuration of a `resolve` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectConfig {
    /// Every record file a link file refers to.
    pub records: Vec<SourceConfig>,
    pub paths: Vec<PathConfig>,
    pub ground_truth: OracleConfig,
}

/// A resolver with the oracle to assess it against.
pub struct PreparedResolution {
    pub resolver: IndirectResolver,
    pub oracle: DirectLinkage,
}

impl IndirectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = load_toml(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        for s in &mut config.records {
            rebase(base, &mut s.path);
        }
        for p in &mut config.paths {
            rebase(base, &mut p.first);
            rebase(base, &mut p.second);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.is_empty() {
            return Err(invalid("at least one [[paths]] entry is required"));
        }
        validate_rules(&self.ground_truth.rules)?;
        for role in [&self.ground_truth.role1, &self.ground_truth.role2] {
            if !self.records.iter().any(|s| &s.role == role) {
                return Err(invalid(format!("no [[records]] entry has role {role:?}")));
            }
        }
        Ok(())
    }

    /// Load records and links, and build the resolver and its oracle.
    pub fn prepare(&self) -> LinkageResult<PreparedResolution> {
        let mut index = RecordIndex::default();
        let mut by_role: Vec<(String, Arc<Schema>, Vec<Arc<Record>>)> = Vec::new();
        for config in &self.records {
            let source = config.source();
            let schema = source.schema()?;
            let records = source.records()?;
            index.extend(records.iter().cloned());
            by_role.push((config.role.clone(), schema, records));
        }

        let mut paths = Vec::with_capacity(self.paths.len());
        for p in &self.paths {
            let path = IndirectPath::new(
                load_links(&p.first, &index)?,
                load_links(&p.second, &index)?,
                &p.link_type,
            );
            paths.push(if p.reversed { path.reversed() } else { path });
        }

        let gt = &self.ground_truth;
        let side = |role: &str| {
            by_role
                .iter()
                .find(|(r, _, _)| r == role)
                .ok_or_else(|| invalid(format!("no [[records]] entry has role {role:?}")))
        };
        let (_, schema1, records1) = side(&gt.role1)?;
        let (_, schema2, records2) = side(&gt.role2)?;
        let spec = LinkageSpec::new(
            &gt.linkage_type,
            &gt.role1,
            &gt.role2,
            Vec::new(),
            Vec::new(),
            resolve_ground_truth(&gt.rules, gt.policy, schema1, schema2)?,
            gt.grouping.resolve(schema1, schema2)?,
        )?;
        // A single-source oracle counts links within its first record set.
        let records2 = if spec.is_single_source() {
            records1.clone()
        } else {
            records2.clone()
        };

        Ok(PreparedResolution {
            resolver: IndirectResolver::new(paths),
            oracle: DirectLinkage::new(spec, records1.clone(), records2),
        })
    }
}
