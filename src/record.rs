//! Records, schemas and record sources.
//!
//! A [`Record`] is an immutable field vector addressed by stable integer indices.
//! The [`Schema`] maps those indices to field names and names the identifier
//! field, which is consulted only by ground truth and never by matching.
//!
//! Record sources are external collaborators: anything that can hand over the
//! records of one role in a stable order implements [`RecordSource`]. Two sources
//! ship here, an in-memory one for tests and embedding, and a delimited-text
//! reader for the CLI.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::SeedableRng;
use rand::seq::SliceRandom;

use crate::error::{LinkageResult, RecordError};

/// Field layout shared by every record of one role (e.g. "birth", "death").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    fields: Vec<String>,
    index: HashMap<String, usize>,
    id_field: usize,
}

impl Schema {
    /// Build a schema from ordered field names, naming the identifier field.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<String>,
        id_field: &str,
    ) -> Result<Self, RecordError> {
        let name = name.into();
        let index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i))
            .collect();
        let id_field = *index.get(id_field).ok_or_else(|| RecordError::UnknownField {
            schema: name.clone(),
            field: id_field.to_string(),
        })?;
        Ok(Self {
            name,
            fields,
            index,
            id_field,
        })
    }

    /// Role or record type this schema describes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of fields per record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index of the identifier field.
    pub fn id_field(&self) -> usize {
        self.id_field
    }

    /// Resolve a field name to its index.
    pub fn field(&self, name: &str) -> Result<usize, RecordError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| RecordError::UnknownField {
                schema: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Resolve several field names, preserving order.
    pub fn fields<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>, RecordError> {
        names.iter().map(|n| self.field(n.as_ref())).collect()
    }

    /// Name of the field at `index`.
    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// An immutable, role-tagged field vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<String>,
}

impl Record {
    /// Create a record; `values` must have one entry per schema field.
    pub fn new(schema: Arc<Schema>, values: Vec<String>) -> Result<Self, RecordError> {
        if values.len() != schema.len() {
            return Err(RecordError::RaggedRow {
                path: schema.name().to_string(),
                line: 0,
                expected: schema.len(),
                actual: values.len(),
            });
        }
        Ok(Self { schema, values })
    }

    /// Create a record from `(field, value)` pairs; unnamed fields are empty.
    pub fn from_pairs(schema: Arc<Schema>, pairs: &[(&str, &str)]) -> Result<Self, RecordError> {
        let mut values = vec![String::new(); schema.len()];
        for (field, value) in pairs {
            let idx = schema.field(field)?;
            values[idx] = (*value).to_string();
        }
        Ok(Self { schema, values })
    }

    /// Value of the field at `index`, or `None` when the index is outside the schema.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Value of a named field.
    pub fn get_named(&self, name: &str) -> Option<&str> {
        self.schema.index.get(name).and_then(|&i| self.get(i))
    }

    /// Durable identifier, used for ground truth and link keys only.
    pub fn id(&self) -> &str {
        &self.values[self.schema.id_field]
    }

    /// Role label taken from the schema.
    pub fn role(&self) -> &str {
        self.schema.name()
    }

    /// The record's schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

/// Two records, possibly from different sources, plus an optional distance.
#[derive(Debug, Clone, Copy)]
pub struct RecordPair<'a> {
    pub record1: &'a Record,
    pub record2: &'a Record,
    pub distance: Option<f64>,
}

impl<'a> RecordPair<'a> {
    pub fn new(record1: &'a Record, record2: &'a Record) -> Self {
        Self {
            record1,
            record2,
            distance: None,
        }
    }

    pub fn with_distance(record1: &'a Record, record2: &'a Record, distance: f64) -> Self {
        Self {
            record1,
            record2,
            distance: Some(distance),
        }
    }
}

/// Something that can supply all records of one role in a stable order.
pub trait RecordSource {
    /// Role label of the records produced.
    fn role(&self) -> &str;

    /// Load every record. The order must be stable across calls so that the
    /// seeded permutation yields the same sequence every run.
    fn records(&self) -> LinkageResult<Vec<Arc<Record>>>;
}

/// A record source over records already in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    role: String,
    records: Vec<Arc<Record>>,
}

impl InMemorySource {
    pub fn new(role: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            role: role.into(),
            records: records.into_iter().map(Arc::new).collect(),
        }
    }
}

impl RecordSource for InMemorySource {
    fn role(&self) -> &str {
        &self.role
    }

    fn records(&self) -> LinkageResult<Vec<Arc<Record>>> {
        Ok(self.records.clone())
    }
}

/// Reads records from a delimited text file whose first line names the fields.
///
/// Lines starting with `#` and blank lines are skipped. Values may be wrapped
/// in double quotes, in which case the delimiter may appear inside them and
/// `""` stands for a literal quote.
#[derive(Debug, Clone)]
pub struct DelimitedFileSource {
    path: PathBuf,
    role: String,
    id_field: String,
    delimiter: char,
}

impl DelimitedFileSource {
    pub fn new(
        path: impl Into<PathBuf>,
        role: impl Into<String>,
        id_field: impl Into<String>,
        delimiter: char,
    ) -> Self {
        Self {
            path: path.into(),
            role: role.into(),
            id_field: id_field.into(),
            delimiter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read only the header row and build the schema from it.
    pub fn schema(&self) -> LinkageResult<Arc<Schema>> {
        let content = self.read()?;
        let header = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| RecordError::MissingHeader {
                path: self.path.display().to_string(),
            })?;
        Ok(Arc::new(self.schema_from_header(header)?))
    }

    fn read(&self) -> Result<String, RecordError> {
        std::fs::read_to_string(&self.path).map_err(|source| RecordError::Read {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn schema_from_header(&self, header: &str) -> Result<Schema, RecordError> {
        let fields = split_row(header, self.delimiter);
        Schema::new(self.role.clone(), fields, &self.id_field)
    }
}

impl RecordSource for DelimitedFileSource {
    fn role(&self) -> &str {
        &self.role
    }

    fn records(&self) -> LinkageResult<Vec<Arc<Record>>> {
        let content = self.read()?;
        let path = self.path.display().to_string();

        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

        let (_, header) = lines
            .next()
            .ok_or_else(|| RecordError::MissingHeader { path: path.clone() })?;
        let schema = Arc::new(self.schema_from_header(header)?);

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (line_num, line) in lines {
            let values = split_row(line, self.delimiter);
            if values.len() != schema.len() {
                return Err(RecordError::RaggedRow {
                    path,
                    line: line_num + 1,
                    expected: schema.len(),
                    actual: values.len(),
                }
                .into());
            }
            let record = Record {
                schema: Arc::clone(&schema),
                values,
            };
            if !seen.insert(record.id().to_string()) {
                return Err(RecordError::DuplicateId {
                    role: self.role.clone(),
                    id: record.id().to_string(),
                }
                .into());
            }
            records.push(Arc::new(record));
        }

        tracing::info!(path = %path, role = %self.role, count = records.len(), "loaded records");
        Ok(records)
    }
}

/// Split one delimited line into trimmed values, honouring double quotes.
pub(crate) fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                values.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    values.push(current.trim().to_string());
    values
}

/// Quote a value for delimited output if it contains the delimiter or a quote.
pub(crate) fn quote_value(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Deterministically shuffle records with a seeded generator.
///
/// The same input order and seed always produce the same output order, which
/// keeps block boundaries and run assignment reproducible across fresh and
/// resumed executions.
pub fn permute<T>(mut records: Vec<T>, seed: u64) -> Vec<T> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    records
}
