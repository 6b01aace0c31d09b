//! Direct-linkage results stored as CSV.
//!
//! ```text
//! key,record1_id,role1,record2_id,role2,confidence,distance,provenance
//! d17,d17,death,m4,marriage,0.93,0.12,groom-own-marriage|threshold 0.67
//! ```
//!
//! Records are resolved through a [`RecordIndex`] keyed by role and id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{Link, LinkMap};
use crate::error::ResolveError;
use crate::record::{Record, split_row};

const COLUMNS: usize = 8;

/// Records addressable by `(role, id)`.
#[derive(Debug, Clone, Default)]
pub struct RecordIndex {
    records: HashMap<(String, String), Arc<Record>>,
}

impl RecordIndex {
    pub fn new(records: impl IntoIterator<Item = Arc<Record>>) -> Self {
        let mut index = Self::default();
        index.extend(records);
        index
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Arc<Record>>) {
        for r in records {
            self.records
                .insert((r.role().to_string(), r.id().to_string()), r);
        }
    }

    pub fn get(&self, role: &str, id: &str) -> Option<&Arc<Record>> {
        self.records.get(&(role.to_string(), id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Load a link map. The first line is a header; `#` lines and blank lines
/// are skipped.
pub fn load_links(path: &Path, index: &RecordIndex) -> Result<LinkMap, ResolveError> {
    let content = std::fs::read_to_string(path).map_err(|source| ResolveError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let malformed = |line: usize, message: String| ResolveError::MalformedLink {
        path: path.display().to_string(),
        line,
        message,
    };

    let mut links = LinkMap::new();
    let mut count = 0usize;
    for (i, raw) in content.lines().enumerate().skip(1) {
        let line = i + 1;
        if raw.trim().is_empty() || raw.starts_with('#') {
            continue;
        }
        let cols = split_row(raw, ',');
        if cols.len() != COLUMNS {
            return Err(malformed(
                line,
                format!("expected {COLUMNS} columns, found {}", cols.len()),
            ));
        }
        let record = |id: &str, role: &str| {
            index
                .get(role, id)
                .cloned()
                .ok_or_else(|| ResolveError::UnknownRecord {
                    id: format!("{role}:{id}"),
                })
        };
        let number = |col: usize, what: &str| {
            cols[col]
                .trim()
                .parse::<f64>()
                .map_err(|_| malformed(line, format!("{what} {:?} is not a number", cols[col])))
        };

        let record1 = record(&cols[1], &cols[2])?;
        let record2 = record(&cols[3], &cols[4])?;
        let provenance = cols[7]
            .split('|')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let link = Link {
            record1,
            role1: cols[2].clone(),
            record2,
            role2: cols[4].clone(),
            confidence: number(5, "confidence")?,
            distance: number(6, "distance")?,
            provenance,
            link_type: None,
        };
        links.entry(cols[0].clone()).or_default().push(link);
        count += 1;
    }

    tracing::info!(
        path = %path.display(),
        keys = links.len(),
        links = count,
        "loaded direct links"
    );
    Ok(links)
}
