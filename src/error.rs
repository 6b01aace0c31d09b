//! Rich diagnostic error types for linkage calibration.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.
//!
//! Malformed record fields are deliberately absent from this taxonomy: a field that
//! cannot be read or parsed degrades the affected pair to `LinkStatus::Unknown`
//! (or to "viable" for viability checks) instead of producing an error.

// Fields read only by the derived `Display`/`Diagnostic` impls trip this lint.
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for linkage calibration.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum LinkageError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sweep(#[from] SweepError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Record errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RecordError {
    #[error("failed to read record source: {path}")]
    #[diagnostic(
        code(linkage::record::read),
        help("Check that the record file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record source {path} has no header row")]
    #[diagnostic(
        code(linkage::record::no_header),
        help("The first non-comment line of a record file must name the fields.")
    )]
    MissingHeader { path: String },

    #[error("unknown field \"{field}\" in schema \"{schema}\"")]
    #[diagnostic(
        code(linkage::record::unknown_field),
        help("Field names are taken from the header row of the record file. Check spelling and case.")
    )]
    UnknownField { schema: String, field: String },

    #[error("row {line} of {path} has {actual} values, header declares {expected}")]
    #[diagnostic(
        code(linkage::record::ragged_row),
        help("Every row must have one value per header field. Empty values are allowed.")
    )]
    RaggedRow {
        path: String,
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate record id \"{id}\" in source \"{role}\"")]
    #[diagnostic(
        code(linkage::record::duplicate_id),
        help("The identifier field must be unique within a record source.")
    )]
    DuplicateId { role: String, id: String },
}

// ---------------------------------------------------------------------------
// Metric errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MetricError {
    #[error("field lists must be the same length: {left} vs {right}")]
    #[diagnostic(
        code(linkage::metric::field_mismatch),
        help(
            "Two-source composite metrics compare fields positionally. \
             Supply one field in the second list for every field in the first."
        )
    )]
    FieldListMismatch { left: usize, right: usize },

    #[error("composite metric needs at least one field")]
    #[diagnostic(
        code(linkage::metric::no_fields),
        help("Add at least one comparison field to the linkage configuration.")
    )]
    EmptyFieldList,

    #[error("unknown base metric \"{name}\"")]
    #[diagnostic(
        code(linkage::metric::unknown),
        help(
            "Known metrics: levenshtein, damerau-levenshtein, osa, normalized-levenshtein, \
             jaro, jaro-winkler, sorensen-dice, exact."
        )
    )]
    UnknownMetric { name: String },

    #[error("missing-field distance {value} exceeds 1.0 for bounded metric \"{metric}\"")]
    #[diagnostic(
        code(linkage::metric::missing_distance),
        help("Bounded base metrics never exceed 1.0, so the substitute distance must lie in [0, 1].")
    )]
    InvalidMissingDistance { metric: String, value: f64 },

    #[error("duplicate metric name \"{name}\"")]
    #[diagnostic(
        code(linkage::metric::duplicate),
        help("Counters are keyed by metric name. Each metric in a sweep must have a distinct name.")
    )]
    DuplicateName { name: String },
}

// ---------------------------------------------------------------------------
// Sweep errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SweepError {
    #[error("invalid sweep configuration: {message}")]
    #[diagnostic(
        code(linkage::sweep::invalid_config),
        help("Check the SweepConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("output I/O failed on {path}")]
    #[diagnostic(
        code(linkage::sweep::io),
        help(
            "Writing results failed and the run was aborted. Output up to the last \
             completed block is still on disk; rerun with the same configuration to resume."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed results row {line} in {path}: {message}")]
    #[diagnostic(
        code(linkage::sweep::malformed_row),
        help(
            "The previous results file could not be replayed. Remove it (and any checkpoint) \
             to start the sweep from scratch."
        )
    )]
    MalformedRow {
        path: String,
        line: usize,
        message: String,
    },

    #[error("checkpoint error: {message}")]
    #[diagnostic(
        code(linkage::sweep::checkpoint),
        help("The checkpoint file is unreadable or from an incompatible version. Delete it to fall back to replaying the results CSV.")
    )]
    Checkpoint { message: String },

    #[error("checkpoint was written by a different run: {message}")]
    #[diagnostic(
        code(linkage::sweep::fingerprint),
        help(
            "Metrics, grid size, run count, seed and record counts must match to resume. \
             Use a different output directory or file stem for a new configuration."
        )
    )]
    FingerprintMismatch { message: String },

    #[error("worker for metric \"{metric}\" panicked")]
    #[diagnostic(
        code(linkage::sweep::worker_panic),
        help("A metric implementation panicked while evaluating a block. The run was aborted.")
    )]
    WorkerPanicked { metric: String },

    #[error("invalid transition from {from} to {to}")]
    #[diagnostic(
        code(linkage::sweep::state),
        help("Load records (or import a checkpoint) before running the sweep.")
    )]
    InvalidTransition { from: String, to: String },
}

// ---------------------------------------------------------------------------
// Indirect resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("failed to read links file: {path}")]
    #[diagnostic(
        code(linkage::resolve::read),
        help("Check that the links file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed link row {line} in {path}: {message}")]
    #[diagnostic(
        code(linkage::resolve::malformed_link),
        help("Rows are: key,record1_id,role1,record2_id,role2,confidence,distance,provenance")
    )]
    MalformedLink {
        path: String,
        line: usize,
        message: String,
    },

    #[error("link refers to unknown record \"{id}\"")]
    #[diagnostic(
        code(linkage::resolve::unknown_record),
        help("Every record id in a links file must exist in the corresponding record source.")
    )]
    UnknownRecord { id: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(linkage::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(linkage::config::parse),
        help("Check the TOML syntax. {message}")
    )]
    Parse { path: String, message: String },

    #[error("invalid config value: {message}")]
    #[diagnostic(code(linkage::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning linkage results.
pub type LinkageResult<T> = std::result::Result<T, LinkageError>;
