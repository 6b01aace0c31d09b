//! Streaming CSV output for sweeps, metadata sidecars, and CSV replay.
//!
//! Two tables are written side by side:
//!
//! - results: one row per (block, metric, run, threshold) with the confusion
//!   matrix and derived precision / recall / F-measure;
//! - distances: per (dump, metric, run) a `non-links` and a `links` row holding
//!   the distance histogram, one column per grid bucket.
//!
//! Rows are flushed as soon as a block finishes so that a crashed run leaves a
//! replayable prefix on disk.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{MetricState, Sample, ThresholdGrid};
use crate::error::SweepError;
use crate::quality;
use crate::record::{quote_value, split_row};

const DELIMITER: char = ',';

const RESULTS_HEADER: &str = "time,run number,records processed,pairs evaluated,pairs ignored,\
metric,threshold,tp,fp,fn,tn,precision,recall,f_measure";

const DISTANCES_HEADER_PREFIX: &str =
    "time,run number,records processed,pairs evaluated,pairs ignored,metric,links_non-link";

/// File locations derived from an output directory and a file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub results: PathBuf,
    pub distances: PathBuf,
    pub results_meta: PathBuf,
    pub distances_meta: PathBuf,
    pub checkpoint: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            results: dir.join(format!("{stem}.results.csv")),
            distances: dir.join(format!("{stem}.distances.csv")),
            results_meta: dir.join(format!("{stem}.results.meta")),
            distances_meta: dir.join(format!("{stem}.distances.meta")),
            checkpoint: dir.join(format!("{stem}.checkpoint")),
        }
    }
}

/// Free-form description written to the metadata sidecars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDescription {
    pub dataset: String,
    pub linkage_type: String,
    pub role1: String,
    pub role2: String,
    pub records1: usize,
    pub records2: usize,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SweepError + '_ {
    move |source| SweepError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

/// Appends result and distance rows; owned by the block-driving thread.
pub struct ResultsWriter {
    results: BufWriter<File>,
    distances: BufWriter<File>,
    paths: OutputPaths,
}

impl ResultsWriter {
    /// Start fresh: truncate both tables, write headers and metadata sidecars.
    pub fn create(
        paths: &OutputPaths,
        grid: &ThresholdGrid,
        description: &RunDescription,
    ) -> Result<Self, SweepError> {
        if let Some(dir) = paths.results.parent() {
            std::fs::create_dir_all(dir).map_err(io_error(dir))?;
        }
        let results = File::create(&paths.results).map_err(io_error(&paths.results))?;
        let distances = File::create(&paths.distances).map_err(io_error(&paths.distances))?;
        let mut writer = Self {
            results: BufWriter::new(results),
            distances: BufWriter::new(distances),
            paths: paths.clone(),
        };

        writeln!(writer.results, "{RESULTS_HEADER}").map_err(io_error(&paths.results))?;
        let thresholds: Vec<String> = grid.thresholds().map(|t| format!("{t:.2}")).collect();
        writeln!(
            writer.distances,
            "{DISTANCES_HEADER_PREFIX},{}",
            thresholds.join(",")
        )
        .map_err(io_error(&paths.distances))?;
        writer.flush()?;

        write_metadata(
            &paths.results_meta,
            "Checking quality of linkage using various string similarity metrics and thresholds",
            description,
        )?;
        write_metadata(
            &paths.distances_meta,
            "Checking distributions of record pair distances using various string similarity metrics",
            description,
        )?;
        Ok(writer)
    }

    /// Continue existing tables after a resume.
    pub fn append(paths: &OutputPaths) -> Result<Self, SweepError> {
        let open = |path: &Path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(BufWriter::new)
                .map_err(io_error(path))
        };
        Ok(Self {
            results: open(&paths.results)?,
            distances: open(&paths.distances)?,
            paths: paths.clone(),
        })
    }

    /// Write the current confusion matrices of every metric.
    pub fn write_samples<'s>(
        &mut self,
        records_processed: usize,
        states: impl IntoIterator<Item = &'s MetricState>,
        grid: &ThresholdGrid,
    ) -> Result<(), SweepError> {
        let time = timestamp();
        for state in states {
            let metric = quote_value(&state.name, DELIMITER);
            for run in 0..state.runs() {
                for (i, s) in state.samples[run].iter().enumerate() {
                    writeln!(
                        self.results,
                        "{time},{},{records_processed},{},{},{metric},{:.2},{},{},{},{},{:.2},{:.2},{:.2}",
                        run + 1,
                        state.pairs_evaluated[run],
                        state.pairs_ignored[run],
                        grid.index_to_threshold(i),
                        s.tp,
                        s.fp,
                        s.fn_,
                        s.tn,
                        quality::precision(s.tp, s.fp),
                        quality::recall(s.tp, s.fn_),
                        quality::f_measure(s.tp, s.fp, s.fn_),
                    )
                    .map_err(io_error(&self.paths.results))?;
                }
            }
        }
        self.results.flush().map_err(io_error(&self.paths.results))
    }

    /// Write the distance histograms of every metric.
    pub fn write_distances<'s>(
        &mut self,
        records_processed: usize,
        states: impl IntoIterator<Item = &'s MetricState>,
    ) -> Result<(), SweepError> {
        let time = timestamp();
        for state in states {
            let metric = quote_value(&state.name, DELIMITER);
            for run in 0..state.runs() {
                for (flag, counts) in [
                    ("non-links", &state.non_link_distances[run]),
                    ("links", &state.link_distances[run]),
                ] {
                    let counts: Vec<String> = counts.iter().map(u64::to_string).collect();
                    writeln!(
                        self.distances,
                        "{time},{},{records_processed},{},{},{metric},{flag},{}",
                        run + 1,
                        state.pairs_evaluated[run],
                        state.pairs_ignored[run],
                        counts.join(",")
                    )
                    .map_err(io_error(&self.paths.distances))?;
                }
            }
        }
        self.distances
            .flush()
            .map_err(io_error(&self.paths.distances))
    }

    fn flush(&mut self) -> Result<(), SweepError> {
        self.results.flush().map_err(io_error(&self.paths.results))?;
        self.distances
            .flush()
            .map_err(io_error(&self.paths.distances))
    }
}

fn write_metadata(path: &Path, purpose: &str, d: &RunDescription) -> Result<(), SweepError> {
    let body = format!(
        "Output file created: {}\n{purpose}\nDataset: {}\nLinkage type: {}\nSources: {}, {}\nRecords: {}, {}\n",
        timestamp(),
        d.dataset,
        d.linkage_type,
        d.role1,
        d.role2,
        d.records1,
        d.records2,
    );
    std::fs::write(path, body).map_err(io_error(path))
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Counters reconstructed from previously written tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
    /// Outer records covered by the restored counters.
    pub records_processed: usize,
    /// One state per metric, in the order requested. `next_run` is left at 0
    /// for the caller to recompute.
    pub states: Vec<MetricState>,
    /// Whether distance histograms were restored as well.
    pub histograms_restored: bool,
}

struct ResultRow {
    run: usize,
    evaluated: u64,
    ignored: u64,
    metric: usize,
    threshold: usize,
    sample: Sample,
}

struct DistanceRow {
    run: usize,
    metric: usize,
    links: bool,
    counts: Vec<u64>,
}

struct RowParser<'a> {
    path: &'a Path,
    line: usize,
    cols: Vec<String>,
}

impl RowParser<'_> {
    fn malformed(&self, message: impl Into<String>) -> SweepError {
        SweepError::MalformedRow {
            path: self.path.display().to_string(),
            line: self.line,
            message: message.into(),
        }
    }

    fn col(&self, i: usize) -> Result<&str, SweepError> {
        self.cols
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| self.malformed(format!("missing column {}", i + 1)))
    }

    fn parse<T: std::str::FromStr>(&self, i: usize) -> Result<T, SweepError> {
        let raw = self.col(i)?;
        raw.parse()
            .map_err(|_| self.malformed(format!("cannot parse column {}: {raw:?}", i + 1)))
    }

    fn run(&self, runs: usize) -> Result<usize, SweepError> {
        let run: usize = self.parse(1)?;
        if run == 0 || run > runs {
            return Err(self.malformed(format!("run number {run} outside 1..={runs}")));
        }
        Ok(run - 1)
    }

    fn metric(&self, names: &[String]) -> Result<usize, SweepError> {
        let name = self.col(5)?;
        names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| self.malformed(format!("unknown metric {name:?}")))
    }
}

/// Data rows of a table (header skipped), with 1-based line numbers.
fn data_rows(path: &Path) -> Result<Option<Vec<(usize, Vec<String>)>>, SweepError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(io_error(path))?;
    Ok(Some(
        content
            .lines()
            .enumerate()
            .skip(1)
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| (i + 1, split_row(l, DELIMITER)))
            .collect(),
    ))
}

/// Rebuild counters from existing output tables.
///
/// Returns `None` when no results table exists. The restored offset is the
/// latest one for which both tables hold rows, so counters and histograms stay
/// consistent even when histograms were dumped less often than results.
/// Where several rows share an offset and key, the last one wins.
pub fn replay(
    paths: &OutputPaths,
    metric_names: &[String],
    runs: usize,
    grid: &ThresholdGrid,
) -> Result<Option<Replayed>, SweepError> {
    let Some(rows) = data_rows(&paths.results)? else {
        return Ok(None);
    };

    // Thresholds are printed to two decimals, which does not identify a bucket
    // on fine grids. Each (offset, run, metric) group is written in grid order,
    // so the bucket is the row's position in its group.
    let mut results: BTreeMap<usize, Vec<ResultRow>> = BTreeMap::new();
    let mut positions: HashMap<(usize, usize, usize), usize> = HashMap::new();
    for (line, cols) in rows {
        let p = RowParser {
            path: &paths.results,
            line,
            cols,
        };
        let offset: usize = p.parse(2)?;
        let run = p.run(runs)?;
        let metric = p.metric(metric_names)?;
        let position = positions.entry((offset, run, metric)).or_default();
        let threshold = *position % grid.size();
        *position += 1;
        let expected = format!("{:.2}", grid.index_to_threshold(threshold));
        if p.col(6)? != expected {
            return Err(p.malformed(format!(
                "threshold {:?} out of sequence; expected {expected}",
                p.col(6)?
            )));
        }
        let row = ResultRow {
            run,
            evaluated: p.parse(3)?,
            ignored: p.parse(4)?,
            metric,
            threshold,
            sample: Sample {
                tp: p.parse(7)?,
                fp: p.parse(8)?,
                fn_: p.parse(9)?,
                tn: p.parse(10)?,
            },
        };
        results.entry(offset).or_default().push(row);
    }

    let mut distances: BTreeMap<usize, Vec<DistanceRow>> = BTreeMap::new();
    for (line, cols) in data_rows(&paths.distances)?.unwrap_or_default() {
        let p = RowParser {
            path: &paths.distances,
            line,
            cols,
        };
        let links = match p.col(6)? {
            "links" => true,
            "non-links" => false,
            other => return Err(p.malformed(format!("unknown link flag {other:?}"))),
        };
        let counts = (7..7 + grid.size())
            .map(|i| p.parse(i))
            .collect::<Result<Vec<u64>, _>>()?;
        let row = DistanceRow {
            run: p.run(runs)?,
            metric: p.metric(metric_names)?,
            links,
            counts,
        };
        distances.entry(p.parse(2)?).or_default().push(row);
    }

    let common = results
        .keys()
        .rev()
        .find(|k| distances.contains_key(k))
        .copied();
    let (offset, histograms_restored) = match (common, results.keys().next_back()) {
        (Some(k), _) => (k, true),
        (None, Some(&k)) => (k, false),
        (None, None) => (0, false),
    };

    let mut states: Vec<MetricState> = metric_names
        .iter()
        .map(|n| MetricState::new(n.clone(), runs, grid))
        .collect();

    for row in results.remove(&offset).unwrap_or_default() {
        let state = &mut states[row.metric];
        state.samples[row.run][row.threshold] = row.sample;
        state.pairs_evaluated[row.run] = row.evaluated;
        state.pairs_ignored[row.run] = row.ignored;
    }
    if histograms_restored {
        for row in distances.remove(&offset).unwrap_or_default() {
            let state = &mut states[row.metric];
            let target = if row.links {
                &mut state.link_distances[row.run]
            } else {
                &mut state.non_link_distances[row.run]
            };
            *target = row.counts;
        }
    }

    Ok(Some(Replayed {
        records_processed: offset,
        states,
        histograms_restored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str, grid: &ThresholdGrid) -> MetricState {
        let mut s = MetricState::new(name, 2, grid);
        s.record_decisions(0, grid, 0.5, true, true);
        s.record_distance(0, grid, 0.5, true);
        s.pairs_evaluated[0] = 1;
        s.record_decisions(1, grid, 0.2, true, false);
        s.record_distance(1, grid, 0.2, false);
        s.pairs_evaluated[1] = 1;
        s.pairs_ignored[1] = 3;
        s
    }

    #[test]
    fn headers_and_rows_are_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path(), "t");
        let grid = ThresholdGrid::new(3).unwrap();
        let mut w = ResultsWriter::create(&paths, &grid, &RunDescription::default()).unwrap();
        let s = state("sigma-jaro", &grid);
        w.write_samples(10, [&s], &grid).unwrap();
        w.write_distances(10, [&s]).unwrap();

        let results = std::fs::read_to_string(&paths.results).unwrap();
        let lines: Vec<&str> = results.lines().collect();
        assert_eq!(lines[0], RESULTS_HEADER);
        assert_eq!(lines.len(), 1 + 2 * 3);
        assert!(lines[3].ends_with(",1,10,1,0,sigma-jaro,1.00,1,0,0,0,1.00,1.00,1.00"));

        let distances = std::fs::read_to_string(&paths.distances).unwrap();
        let lines: Vec<&str> = distances.lines().collect();
        assert!(lines[0].ends_with("links_non-link,0.00,0.50,1.00"));
        assert!(lines[1].ends_with(",1,10,1,0,sigma-jaro,non-links,0,0,0"));
        assert!(lines[2].ends_with(",1,10,1,0,sigma-jaro,links,0,1,0"));

        let meta = std::fs::read_to_string(&paths.results_meta).unwrap();
        assert!(meta.starts_with("Output file created: "));
    }

    #[test]
    fn replay_restores_latest_consistent_offset() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path(), "t");
        let grid = ThresholdGrid::default();
        let names = vec!["m".to_string()];

        let early = MetricState::new("m", 2, &grid);
        let late = state("m", &grid);
        let mut later = late.clone();
        later.pairs_ignored[0] = 99;

        let mut w = ResultsWriter::create(&paths, &grid, &RunDescription::default()).unwrap();
        w.write_samples(5, [&early], &grid).unwrap();
        w.write_samples(10, [&late], &grid).unwrap();
        w.write_distances(10, [&late]).unwrap();
        // No histogram dump at 15: replay must stop at 10.
        w.write_samples(15, [&later], &grid).unwrap();
        drop(w);

        let replayed = replay(&paths, &names, 2, &grid).unwrap().unwrap();
        assert_eq!(replayed.records_processed, 10);
        assert!(replayed.histograms_restored);
        assert_eq!(replayed.states[0], late);
    }

    #[test]
    fn replay_without_distances_uses_last_results() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path(), "t");
        let grid = ThresholdGrid::default();
        let s = state("m", &grid);
        let mut w = ResultsWriter::create(&paths, &grid, &RunDescription::default()).unwrap();
        w.write_samples(7, [&s], &grid).unwrap();
        drop(w);

        let replayed = replay(&paths, &["m".to_string()], 2, &grid)
            .unwrap()
            .unwrap();
        assert_eq!(replayed.records_processed, 7);
        assert!(!replayed.histograms_restored);
        assert_eq!(replayed.states[0].samples, s.samples);
    }

    #[test]
    fn replay_places_rows_by_position_on_fine_grids() {
        for granularity in [41, 201] {
            let dir = tempfile::TempDir::new().unwrap();
            let paths = OutputPaths::new(dir.path(), "t");
            let grid = ThresholdGrid::new(granularity).unwrap();
            let mut s = MetricState::new("m", 2, &grid);
            for (i, d) in [0.0, 0.004, 0.075, 0.1, 0.333, 0.5, 0.9].into_iter().enumerate() {
                s.record_decisions(i % 2, &grid, d, true, i % 3 == 0);
                s.pairs_evaluated[i % 2] += 1;
            }
            let mut w = ResultsWriter::create(&paths, &grid, &RunDescription::default()).unwrap();
            w.write_samples(4, [&s], &grid).unwrap();
            // A repeated group at the same offset replaces the first one.
            w.write_samples(4, [&s], &grid).unwrap();
            drop(w);

            let replayed = replay(&paths, &["m".to_string()], 2, &grid)
                .unwrap()
                .unwrap();
            assert_eq!(replayed.states[0].samples, s.samples, "granularity {granularity}");
        }
    }

    #[test]
    fn replay_rejects_rows_out_of_grid_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path(), "t");
        let grid = ThresholdGrid::new(3).unwrap();
        let s = state("m", &grid);
        let mut w = ResultsWriter::create(&paths, &grid, &RunDescription::default()).unwrap();
        w.write_samples(1, [&s], &grid).unwrap();
        drop(w);

        let content = std::fs::read_to_string(&paths.results).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        lines.swap(1, 2);
        std::fs::write(&paths.results, lines.join("\n")).unwrap();

        let err = replay(&paths, &["m".to_string()], 2, &grid).unwrap_err();
        assert!(matches!(err, SweepError::MalformedRow { .. }));
    }

    #[test]
    fn replay_of_missing_table_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path(), "absent");
        let grid = ThresholdGrid::default();
        assert!(replay(&paths, &[], 1, &grid).unwrap().is_none());
    }

    #[test]
    fn replay_rejects_unknown_metric() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = OutputPaths::new(dir.path(), "t");
        let grid = ThresholdGrid::default();
        let mut w = ResultsWriter::create(&paths, &grid, &RunDescription::default()).unwrap();
        w.write_samples(1, [&state("old", &grid)], &grid).unwrap();
        drop(w);
        let err = replay(&paths, &["new".to_string()], 2, &grid).unwrap_err();
        assert!(matches!(err, SweepError::MalformedRow { .. }));
    }
}
