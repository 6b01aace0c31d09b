//! # linkage-calibrate
//!
//! Calibration of record-linkage parameters for historical person records.
//!
//! ## Architecture
//!
//! - **Records** (`record`): schema-indexed field vectors from CSV or memory
//! - **Metrics** (`metric`): `strsim` base distances combined over field lists
//! - **Ground truth** (`truth`): tri-state classification, grouping, viability
//! - **Threshold sweep** (`sweep`): block-parallel confusion matrices over a
//!   dense threshold grid, with checkpoint/resume
//! - **Indirect resolution** (`indirect`): two-hop links through a pivot record,
//!   best-candidate selection and assessment
//!
//! ## Library usage
//!
//! ```no_run
//! use linkage_calibrate::linkage::LinkageSpec;
//! use linkage_calibrate::metric::{Aggregation, BaseMetric, Metric};
//! use linkage_calibrate::record::DelimitedFileSource;
//! use linkage_calibrate::sweep::{SweepConfig, SweepEngine};
//! use linkage_calibrate::truth::{AbsentFieldPolicy, GroundTruth, GroupingMode};
//!
//! let births = DelimitedFileSource::new("births.csv", "birth", "id", ',');
//! let schema = births.schema().unwrap();
//! let spec = LinkageSpec::symmetric(
//!     "birth-birth-sibling",
//!     "birth",
//!     schema.fields(&["mother_forename", "mother_surname"]).unwrap(),
//!     GroundTruth::single(vec![(schema.field("family").unwrap(), schema.field("family").unwrap())],
//!         AbsentFieldPolicy::ClosedWorld),
//!     GroupingMode::Symmetric,
//! )
//! .unwrap();
//! let metric: Box<dyn Metric> =
//!     Box::new(spec.composite_metric(BaseMetric::JaroWinkler, Aggregation::Sigma).unwrap());
//!
//! let mut engine = SweepEngine::new(spec, vec![metric], SweepConfig::default()).unwrap();
//! engine.load_records(&births, None).unwrap();
//! let summary = engine.run().unwrap();
//! println!("{} records processed", summary.records_processed);
//! ```

pub mod config;
pub mod error;
pub mod indirect;
pub mod linkage;
pub mod metric;
pub mod quality;
pub mod record;
pub mod sweep;
pub mod truth;
