//! Run generation.
//!
//! Turns an unbounded input stream into individually sorted run files while
//! holding at most `p` records in memory. Two run-boundary policies are
//! supported: a fixed flush threshold keyed on the fan-in, and classical
//! replacement selection, which extends the current run for as long as
//! incoming records can still be placed behind its tail.

use std::error::Error;
use std::fmt;
use std::io;

use crate::store::{RunId, RunStore};
use crate::workset::WorkingSet;

/// Run generation error.
#[derive(Debug)]
pub enum GenerateError<E: Error> {
    /// Run file creation or write error.
    Io(io::Error),
    /// Input data stream error.
    Input(E),
}

impl<E: Error> From<io::Error> for GenerateError<E> {
    fn from(err: io::Error) -> Self {
        GenerateError::Io(err)
    }
}

impl<E: Error + 'static> Error for GenerateError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match self {
            GenerateError::Io(err) => err,
            GenerateError::Input(err) => err,
        })
    }
}

impl<E: Error> fmt::Display for GenerateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Io(err) => write!(f, "run file I/O failed: {}", err),
            GenerateError::Input(err) => write!(f, "input data stream error: {}", err),
        }
    }
}

/// Decides where one run ends and the next begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Seal the current run every `T` records. Produces exactly
    /// `ceil(N / T)` runs for `N` input records.
    FixedThreshold(usize),
    /// Classical replacement selection: keep extending the current run
    /// while incoming records are no smaller than the last record written
    /// to it. Produces runs averaging twice the working-set size on random
    /// input, and a single run on already-sorted input.
    ReplacementSelection,
}

impl RunPolicy {
    /// Default flush threshold for a given fan-in.
    pub fn fixed_for_fan_in(fan_in: usize) -> Self {
        RunPolicy::FixedThreshold(2 * fan_in)
    }
}

/// Result of a run generation phase.
pub struct GenerationOutcome {
    /// Ids of the produced runs, in creation order.
    pub runs: Vec<RunId>,
    /// Well-formed records consumed from the input.
    pub records: u64,
}

/// Bounded-memory run generator.
pub struct RunGenerator {
    fan_in: usize,
    policy: RunPolicy,
}

impl RunGenerator {
    pub fn new(fan_in: usize, policy: RunPolicy) -> Self {
        RunGenerator { fan_in, policy }
    }

    /// Consumes the input stream and materializes it as sorted runs in the
    /// store. The working set never holds more than `fan_in` records.
    pub fn generate<I, E>(
        &self,
        input: I,
        store: &mut RunStore,
    ) -> Result<GenerationOutcome, GenerateError<E>>
    where
        I: IntoIterator<Item = Result<i64, E>>,
        E: Error,
    {
        let mut input = input.into_iter();
        let mut workset = WorkingSet::new(self.fan_in);
        let mut records = 0u64;

        while !workset.is_full() {
            match input.next().transpose().map_err(GenerateError::Input)? {
                Some(value) => {
                    workset.push(value);
                    records += 1;
                }
                None => break,
            }
        }

        let outcome = match self.policy {
            RunPolicy::FixedThreshold(threshold) => {
                self.fill_threshold_runs(threshold, input, workset, records, store)
            }
            RunPolicy::ReplacementSelection => {
                self.fill_replacement_runs(input, workset, records, store)
            }
        }?;

        log::debug!(
            "run generation done: {} records in {} initial runs",
            outcome.records,
            outcome.runs.len()
        );
        Ok(outcome)
    }

    /// Fixed-threshold policy: every extracted minimum goes into a pending
    /// buffer that is sorted and sealed as one run once it reaches the
    /// threshold. The final run may be shorter.
    fn fill_threshold_runs<I, E>(
        &self,
        threshold: usize,
        mut input: I,
        mut workset: WorkingSet,
        mut records: u64,
        store: &mut RunStore,
    ) -> Result<GenerationOutcome, GenerateError<E>>
    where
        I: Iterator<Item = Result<i64, E>>,
        E: Error,
    {
        let mut runs = Vec::new();
        let mut pending: Vec<i64> = Vec::with_capacity(threshold);
        let mut flushed = 0u64;

        while let Some(min) = workset.pop_min() {
            pending.push(min);

            if pending.len() >= threshold {
                flushed += pending.len() as u64;
                runs.push(seal_run(store, &mut pending)?);
            }

            if let Some(value) = input.next().transpose().map_err(GenerateError::Input)? {
                records += 1;
                if workset.is_full() {
                    // Logical memory-full condition: the new record cannot
                    // join the working set, so it seeds the next run.
                    if !pending.is_empty() {
                        flushed += pending.len() as u64;
                        runs.push(seal_run(store, &mut pending)?);
                    }
                    pending.push(value);
                } else {
                    workset.push(value);
                }
            }

            debug_assert_eq!(
                records,
                flushed + workset.len() as u64 + pending.len() as u64
            );
        }

        // Drain whatever is still pending once input and slots are empty.
        if !pending.is_empty() {
            runs.push(seal_run(store, &mut pending)?);
        }

        Ok(GenerationOutcome { runs, records })
    }

    /// Replacement-selection policy: the working-set heap streams straight
    /// to the current run file; records smaller than the run's tail are
    /// staged for the next run, so residency stays bounded by the fan-in.
    fn fill_replacement_runs<I, E>(
        &self,
        mut input: I,
        mut workset: WorkingSet,
        mut records: u64,
        store: &mut RunStore,
    ) -> Result<GenerationOutcome, GenerateError<E>>
    where
        I: Iterator<Item = Result<i64, E>>,
        E: Error,
    {
        let mut runs = Vec::new();

        if workset.is_empty() {
            return Ok(GenerationOutcome { runs, records });
        }

        let mut deferred: Vec<i64> = Vec::with_capacity(self.fan_in);
        let (mut id, mut writer) = store.create_run()?;

        loop {
            match workset.pop_min() {
                Some(value) => {
                    writer.write(value)?;

                    if let Some(next) = input.next().transpose().map_err(GenerateError::Input)? {
                        records += 1;
                        if next >= value {
                            workset.push(next);
                        } else {
                            deferred.push(next);
                        }
                    }
                    debug_assert!(workset.len() + deferred.len() <= self.fan_in);
                }
                None => {
                    let len = writer.finish()?;
                    log::debug!("{} sealed ({} records)", id, len);
                    runs.push(id);

                    if deferred.is_empty() {
                        break;
                    }
                    for value in deferred.drain(..) {
                        workset.push(value);
                    }
                    let next = store.create_run()?;
                    id = next.0;
                    writer = next.1;
                }
            }
        }

        Ok(GenerationOutcome { runs, records })
    }
}

/// Sorts the pending buffer and seals it as one run.
fn seal_run(store: &mut RunStore, pending: &mut Vec<i64>) -> io::Result<RunId> {
    pending.sort_unstable();

    let (id, mut writer) = store.create_run()?;
    for &value in pending.iter() {
        writer.write(value)?;
    }
    let len = writer.finish()?;
    log::debug!("{} sealed ({} records)", id, len);

    pending.clear();
    Ok(id)
}
