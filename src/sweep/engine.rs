//! The sweep engine: state machine, persistent worker cohort, block driver.
//!
//! ```text
//! Initialized ──load──▶ RecordsLoaded ──run──▶ BlockProcessing ──▶ Completed
//!      │                      ▲                      │
//!      └─import checkpoint──▶ CheckpointImported     ├──interrupt──▶ Interrupted
//!                                                    └──error──────▶ Failed
//! ```
//!
//! Counters only advance when a block has been written and checkpointed. A
//! block that is interrupted, panics, or fails to write leaves the counters as
//! they were after the last committed block.
//!
//! One scoped worker thread per metric lives for the whole call to
//! [`SweepEngine::run_blocks`]. A [`BlockBarrier`] releases all workers into a
//! block together and holds the driver until every worker is done. Each worker
//! has exclusive use of its metric's [`MetricState`] while the block runs; the
//! driver reads the states only between blocks, writes output rows and a
//! checkpoint, and moves on.

use std::fmt;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::output::{self, OutputPaths, ResultsWriter, RunDescription};
use super::worker::{BlockContext, BlockOutcome};
use super::{BlockBarrier, Checkpoint, MetricState, RunFingerprint, SweepConfig, ThresholdGrid};
use crate::error::{LinkageResult, MetricError, SweepError};
use crate::linkage::LinkageSpec;
use crate::metric::Metric;
use crate::record::{Record, RecordSource, permute};

/// Lifecycle of a sweep run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    Initialized,
    CheckpointImported,
    RecordsLoaded,
    BlockProcessing,
    Completed,
    Interrupted,
    /// A block failed; the engine holds the last committed counters and cannot run again.
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::CheckpointImported => "checkpoint-imported",
            Self::RecordsLoaded => "records-loaded",
            Self::BlockProcessing => "block-processing",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the counters of a run started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeSource {
    Fresh,
    Checkpoint,
    ResultsReplay,
}

/// Outcome of a call to [`SweepEngine::run_blocks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub phase: RunPhase,
    pub resumed_from: ResumeSource,
    pub records_processed: usize,
    pub records_to_check: usize,
    pub blocks_run: usize,
}

/// Mutable progress, kept apart from the inputs so that workers can borrow
/// the inputs while the driver updates progress.
struct Progress {
    records_processed: usize,
    states: Vec<MetricState>,
    writer: Option<ResultsWriter>,
    dump_clock: Instant,
    dumped_at: Option<usize>,
}

pub struct SweepEngine {
    config: SweepConfig,
    spec: LinkageSpec,
    metrics: Vec<Box<dyn Metric>>,
    grid: ThresholdGrid,
    paths: OutputPaths,
    dataset: String,
    phase: RunPhase,
    outer: Vec<Arc<Record>>,
    inner: Vec<Arc<Record>>,
    records_to_check: usize,
    imported: Option<Checkpoint>,
    resumed_from: ResumeSource,
    interrupt: Arc<AtomicBool>,
    progress: Progress,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SweepEngine {
    /// Create an engine. The run's absent-field policy overrides the one the
    /// spec's ground truth was built with.
    pub fn new(
        spec: LinkageSpec,
        metrics: Vec<Box<dyn Metric>>,
        config: SweepConfig,
    ) -> LinkageResult<Self> {
        config.validate()?;
        let grid = ThresholdGrid::new(config.granularity)?;
        if metrics.is_empty() {
            return Err(SweepError::InvalidConfig {
                message: "at least one metric is required".into(),
            }
            .into());
        }
        let mut names: Vec<&str> = Vec::with_capacity(metrics.len());
        for m in &metrics {
            if names.contains(&m.name()) {
                return Err(MetricError::DuplicateName {
                    name: m.name().to_string(),
                }
                .into());
            }
            names.push(m.name());
        }

        let mut spec = spec;
        spec.ground_truth = spec.ground_truth.with_policy(config.absent_field_policy);

        let states = metrics
            .iter()
            .map(|m| MetricState::new(m.name(), config.runs, &grid))
            .collect();
        let paths = OutputPaths::new(&config.output_dir, &config.file_stem);

        tracing::info!(
            linkage = %spec.name,
            metrics = metrics.len(),
            runs = config.runs,
            granularity = grid.size(),
            policy = config.absent_field_policy.label(),
            "sweep engine initialised"
        );

        Ok(Self {
            config,
            spec,
            metrics,
            grid,
            paths,
            dataset: String::new(),
            phase: RunPhase::Initialized,
            outer: Vec::new(),
            inner: Vec::new(),
            records_to_check: 0,
            imported: None,
            resumed_from: ResumeSource::Fresh,
            interrupt: Arc::new(AtomicBool::new(false)),
            progress: Progress {
                records_processed: 0,
                states,
                writer: None,
                dump_clock: Instant::now(),
                dumped_at: None,
            },
        })
    }

    /// Stop workers at the next record boundary once `flag` is raised.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Dataset name for the metadata sidecars.
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn grid(&self) -> &ThresholdGrid {
        &self.grid
    }

    pub fn states(&self) -> &[MetricState] {
        &self.progress.states
    }

    pub fn records_processed(&self) -> usize {
        self.progress.records_processed
    }

    pub fn records_to_check(&self) -> usize {
        self.records_to_check
    }

    pub fn output_paths(&self) -> &OutputPaths {
        &self.paths
    }

    fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.name().to_string()).collect()
    }

    fn transition_error(&self, to: RunPhase) -> SweepError {
        SweepError::InvalidTransition {
            from: self.phase.to_string(),
            to: to.to_string(),
        }
    }

    /// Shape of this run, for checkpoint compatibility checks.
    pub fn fingerprint(&self) -> RunFingerprint {
        RunFingerprint {
            metrics: self.metric_names(),
            granularity: self.grid.size(),
            runs: self.config.runs,
            seed: self.config.seed,
            block_size: self.config.block_size,
            records1: self.outer.len(),
            records2: self.inner.len(),
            records_to_check: self.records_to_check,
            multiplicity: self.config.multiplicity,
            policy: self.config.absent_field_policy.label().to_string(),
        }
    }

    /// Snapshot of the current counters as a checkpoint.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(
            self.fingerprint(),
            self.progress.records_processed,
            self.progress.states.clone(),
        )
        .with_last_dump(self.progress.dumped_at)
    }

    // -----------------------------------------------------------------------
    // Initialisation
    // -----------------------------------------------------------------------

    /// Adopt a checkpoint's counters. Its fingerprint is verified once the
    /// records are loaded.
    pub fn import_checkpoint(&mut self, checkpoint: Checkpoint) -> LinkageResult<()> {
        if self.phase != RunPhase::Initialized {
            return Err(self.transition_error(RunPhase::CheckpointImported).into());
        }
        tracing::info!(
            records_processed = checkpoint.records_processed,
            "checkpoint imported"
        );
        self.imported = Some(checkpoint);
        self.phase = RunPhase::CheckpointImported;
        Ok(())
    }

    /// Import the checkpoint in the output directory, if there is one.
    pub fn import_checkpoint_if_present(&mut self) -> LinkageResult<bool> {
        match Checkpoint::read_if_exists(&self.paths.checkpoint)? {
            Some(checkpoint) => {
                self.import_checkpoint(checkpoint)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load records from sources; two-source linkage needs `source2`.
    pub fn load_records(
        &mut self,
        source1: &dyn RecordSource,
        source2: Option<&dyn RecordSource>,
    ) -> LinkageResult<()> {
        let records1 = source1.records()?;
        let records2 = source2.map(|s| s.records()).transpose()?;
        self.load_record_sets(records1, records2)
    }

    /// Permute and adopt already-loaded record sets.
    pub fn load_record_sets(
        &mut self,
        records1: Vec<Arc<Record>>,
        records2: Option<Vec<Arc<Record>>>,
    ) -> LinkageResult<()> {
        if !matches!(
            self.phase,
            RunPhase::Initialized | RunPhase::CheckpointImported
        ) {
            return Err(self.transition_error(RunPhase::RecordsLoaded).into());
        }

        let single_source = self.spec.is_single_source();
        let outer = permute(records1, self.config.seed);
        let inner = match (single_source, records2) {
            (true, None) => outer.clone(),
            (false, Some(records2)) => permute(records2, self.config.seed),
            (true, Some(_)) => {
                return Err(SweepError::InvalidConfig {
                    message: format!("{} links a source with itself; give one source", self.spec.name),
                }
                .into());
            }
            (false, None) => {
                return Err(SweepError::InvalidConfig {
                    message: format!("{} links two sources; give both", self.spec.name),
                }
                .into());
            }
        };

        self.records_to_check = self
            .config
            .records_to_check
            .map_or(outer.len(), |cap| cap.min(outer.len()));
        self.outer = outer;
        self.inner = inner;

        if let Some(checkpoint) = self.imported.take() {
            checkpoint.verify(&self.fingerprint())?;
            self.progress.records_processed = checkpoint.records_processed;
            self.progress.dumped_at = checkpoint.last_dump;
            self.progress.states = checkpoint.states;
            self.resumed_from = ResumeSource::Checkpoint;
        }

        tracing::info!(
            records1 = self.outer.len(),
            records2 = self.inner.len(),
            records_to_check = self.records_to_check,
            blocks = self.records_to_check.div_ceil(self.config.block_size),
            "records loaded"
        );
        self.phase = RunPhase::RecordsLoaded;
        Ok(())
    }

    fn pairs_per_record(&self) -> usize {
        if self.spec.is_single_source() {
            self.inner.len().saturating_sub(1)
        } else {
            self.inner.len()
        }
    }

    fn description(&self) -> RunDescription {
        RunDescription {
            dataset: self.dataset.clone(),
            linkage_type: self.spec.name.clone(),
            role1: self.spec.role1.clone(),
            role2: self.spec.role2.clone(),
            records1: self.outer.len(),
            records2: self.inner.len(),
        }
    }

    /// Open output tables, replaying existing ones when no checkpoint was imported.
    fn open_output(&mut self) -> LinkageResult<()> {
        if self.resumed_from == ResumeSource::Checkpoint {
            tracing::info!(
                records_processed = self.progress.records_processed,
                "resuming from checkpoint"
            );
            self.progress.writer = Some(ResultsWriter::append(&self.paths)?);
            return Ok(());
        }

        let names = self.metric_names();
        match output::replay(&self.paths, &names, self.config.runs, &self.grid)? {
            Some(replayed) => {
                let offset = replayed.records_processed;
                let on_boundary =
                    offset % self.config.block_size == 0 || offset == self.records_to_check;
                if offset > self.records_to_check || !on_boundary {
                    return Err(SweepError::FingerprintMismatch {
                        message: format!(
                            "results table stops at record {offset}, which is not a block boundary \
                             of this run ({} records in blocks of {})",
                            self.records_to_check, self.config.block_size
                        ),
                    }
                    .into());
                }
                if !replayed.histograms_restored && offset > 0 {
                    tracing::warn!(
                        path = %self.paths.distances.display(),
                        "no matching distance rows; histograms restart from zero"
                    );
                }
                let next_run = (offset * self.pairs_per_record()) % self.config.runs;
                self.progress.states = replayed.states;
                for state in &mut self.progress.states {
                    state.next_run = next_run;
                }
                self.progress.records_processed = offset;
                self.progress.dumped_at = replayed.histograms_restored.then_some(offset);
                self.resumed_from = ResumeSource::ResultsReplay;
                tracing::info!(records_processed = offset, "resuming from results table");
                self.progress.writer = Some(ResultsWriter::append(&self.paths)?);
            }
            None => {
                self.progress.writer = Some(ResultsWriter::create(
                    &self.paths,
                    &self.grid,
                    &self.description(),
                )?);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run to completion (or interruption).
    pub fn run(&mut self) -> LinkageResult<SweepSummary> {
        self.run_blocks(usize::MAX)
    }

    /// Run at most `max_blocks` further blocks. Any error moves the engine to
    /// [`RunPhase::Failed`].
    pub fn run_blocks(&mut self, max_blocks: usize) -> LinkageResult<SweepSummary> {
        if !matches!(
            self.phase,
            RunPhase::RecordsLoaded | RunPhase::BlockProcessing
        ) {
            return Err(self.transition_error(RunPhase::BlockProcessing).into());
        }
        let result = self.advance(max_blocks);
        if result.is_err() {
            self.phase = RunPhase::Failed;
        }
        result
    }

    fn advance(&mut self, max_blocks: usize) -> LinkageResult<SweepSummary> {
        if self.progress.writer.is_none() {
            self.open_output()?;
        }
        self.phase = RunPhase::BlockProcessing;

        let (blocks_run, outcome) = self.execute_blocks(max_blocks)?;

        if outcome == BlockOutcome::Interrupted {
            tracing::warn!(
                records_processed = self.progress.records_processed,
                "sweep interrupted; the partial block was discarded"
            );
            self.phase = RunPhase::Interrupted;
        } else if self.progress.records_processed >= self.records_to_check {
            let processed = self.progress.records_processed;
            if self.progress.dumped_at != Some(processed) {
                if let Some(writer) = self.progress.writer.as_mut() {
                    writer.write_distances(processed, &self.progress.states)?;
                }
                self.progress.dumped_at = Some(processed);
            }
            tracing::info!(records_processed = processed, "sweep completed");
            self.phase = RunPhase::Completed;
        }

        Ok(SweepSummary {
            phase: self.phase,
            resumed_from: self.resumed_from,
            records_processed: self.progress.records_processed,
            records_to_check: self.records_to_check,
            blocks_run,
        })
    }

    fn execute_blocks(&mut self, max_blocks: usize) -> LinkageResult<(usize, BlockOutcome)> {
        let fingerprint = self.fingerprint();
        let single_source = self.spec.is_single_source();
        let pairs_per_record = self.pairs_per_record() as u64;
        let Self {
            ref config,
            ref spec,
            ref metrics,
            ref grid,
            ref paths,
            ref outer,
            ref inner,
            records_to_check: total,
            ref interrupt,
            ref mut progress,
            ..
        } = *self;

        let ctx = BlockContext {
            spec,
            outer: &outer[..total],
            inner,
            single_source,
            grid: *grid,
            multiplicity: config.multiplicity,
            interrupt,
        };
        // Counters as of the last written and checkpointed block.
        let mut committed = std::mem::take(&mut progress.states);
        let slots: Vec<Mutex<MetricState>> = committed.iter().cloned().map(Mutex::new).collect();
        let panicked: Vec<AtomicBool> = metrics.iter().map(|_| AtomicBool::new(false)).collect();
        let interrupted = AtomicBool::new(false);
        let block: Mutex<Range<usize>> = Mutex::new(0..0);
        let barrier = BlockBarrier::new(metrics.len());

        let result = std::thread::scope(|s| {
            for ((metric, slot), panicked) in metrics.iter().zip(&slots).zip(&panicked) {
                let (ctx, barrier, block, interrupted) = (&ctx, &barrier, &block, &interrupted);
                s.spawn(move || {
                    while barrier.wait_for_start() {
                        let range = lock(block).clone();
                        let mut state = lock(slot);
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            ctx.evaluate_block(metric.as_ref(), &mut state, range)
                        }));
                        match outcome {
                            Ok(BlockOutcome::Completed) => {}
                            Ok(BlockOutcome::Interrupted) => interrupted.store(true, Ordering::SeqCst),
                            Err(_) => panicked.store(true, Ordering::SeqCst),
                        }
                        drop(state);
                        barrier.finish();
                    }
                });
            }

            let mut drive = || -> LinkageResult<(usize, BlockOutcome)> {
                let mut blocks_run = 0;
                while progress.records_processed < total && blocks_run < max_blocks {
                    let start = progress.records_processed;
                    let end = (start + config.block_size).min(total);
                    *lock(&block) = start..end;
                    let started = Instant::now();

                    barrier.release();
                    barrier.await_completion();

                    if let Some(i) = panicked.iter().position(|p| p.load(Ordering::SeqCst)) {
                        return Err(SweepError::WorkerPanicked {
                            metric: metrics[i].name().to_string(),
                        }
                        .into());
                    }
                    if interrupted.load(Ordering::SeqCst) {
                        return Ok((blocks_run, BlockOutcome::Interrupted));
                    }

                    let guards: Vec<MutexGuard<'_, MetricState>> = slots.iter().map(lock).collect();
                    let states = || guards.iter().map(|g| &**g);

                    let Some(writer) = progress.writer.as_mut() else {
                        return Err(SweepError::InvalidTransition {
                            from: RunPhase::RecordsLoaded.to_string(),
                            to: RunPhase::BlockProcessing.to_string(),
                        }
                        .into());
                    };
                    writer.write_samples(end, states(), grid)?;

                    let pairs_since_dump =
                        end.saturating_sub(progress.dumped_at.unwrap_or(0)) as u64 * pairs_per_record;
                    let dump_due = config.dumps_every_block()
                        || end == total
                        || config
                            .dump_every_pairs
                            .is_some_and(|n| pairs_since_dump >= n)
                        || config.dump_interval_secs.is_some_and(|secs| {
                            progress.dump_clock.elapsed() >= Duration::from_secs(secs)
                        });
                    if dump_due {
                        writer.write_distances(end, states())?;
                    }
                    let dumped_at = if dump_due { Some(end) } else { progress.dumped_at };

                    let checkpoint =
                        Checkpoint::new(fingerprint.clone(), end, states().cloned().collect())
                            .with_last_dump(dumped_at);
                    checkpoint.write_atomic(&paths.checkpoint)?;
                    let evaluated = guards[0].total_evaluated();
                    drop(guards);

                    committed = checkpoint.states;
                    progress.records_processed = end;
                    if dump_due {
                        progress.dumped_at = dumped_at;
                        progress.dump_clock = Instant::now();
                    }
                    blocks_run += 1;

                    tracing::info!(
                        block = end.div_ceil(config.block_size),
                        records_processed = end,
                        pairs_evaluated = evaluated,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "block completed"
                    );
                }
                Ok((blocks_run, BlockOutcome::Completed))
            };

            let result = drive();
            barrier.shutdown();
            result
        });

        progress.states = committed;
        result
    }
}
