//! External sorter and merge pass orchestration.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use rayon::prelude::*;

use crate::generate::{GenerateError, RunGenerator, RunPolicy};
use crate::merger::KWayMerger;
use crate::store::{RunId, RunStore, RunWriter};

/// Sorting error.
#[derive(Debug)]
pub enum SortError<E: Error> {
    /// Fan-in below the minimum of 2.
    InvalidFanIn(usize),
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuild(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    Io(io::Error),
    /// An input run became unreadable during a merge step, for a reason
    /// other than natural exhaustion.
    Merge(io::Error),
    /// Input data stream error.
    Input(E),
    /// The input contained no well-formed records; there is nothing to sort.
    EmptyInput,
}

impl<E: Error + 'static> Error for SortError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SortError::InvalidFanIn(_) | SortError::EmptyInput => None,
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuild(err) => Some(err),
            SortError::Io(err) => Some(err),
            SortError::Merge(err) => Some(err),
            SortError::Input(err) => Some(err),
        }
    }
}

impl<E: Error> Display for SortError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::InvalidFanIn(fan_in) => write!(f, "fan-in must be at least 2, got {}", fan_in),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuild(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Io(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Merge(err) => write!(f, "merge input run unreadable: {}", err),
            SortError::Input(err) => write!(f, "input data stream error: {}", err),
            SortError::EmptyInput => write!(f, "input contains no records"),
        }
    }
}

/// Statistics of a completed sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortReport {
    /// Well-formed records processed.
    pub records: u64,
    /// Fan-in / working-set size the sort ran with.
    pub fan_in: usize,
    /// Runs produced by the generation phase.
    pub initial_runs: usize,
    /// Merge passes needed to get down to one run. Equals
    /// `ceil(log_fan_in(initial_runs))`, or 0 for a single initial run.
    pub merge_passes: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`]
/// initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<E: Error> {
    /// Fan-in: working-set size and maximum runs merged per step.
    fan_in: usize,
    /// Run-boundary policy. Defaults to the fixed threshold for `fan_in`.
    policy: Option<RunPolicy>,
    /// Number of threads to be used to merge the groups of one pass in
    /// parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<E: Error> ExternalSorterBuilder<E> {
    /// Creates a builder for a sorter with the given fan-in.
    pub fn new(fan_in: usize) -> Self {
        ExternalSorterBuilder {
            fan_in,
            policy: None,
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            input_error_type: PhantomData,
        }
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<E>, SortError<E>> {
        ExternalSorter::new(
            self.fan_in,
            self.policy,
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
        )
    }

    /// Sets the run-boundary policy.
    pub fn with_run_policy(mut self, policy: RunPolicy) -> ExternalSorterBuilder<E> {
        self.policy = Some(policy);
        self
    }

    /// Sets number of threads to be used to merge groups in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<E> {
        self.threads_number = Some(threads_number);
        self
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<E> {
        self.tmp_dir = Some(path.into());
        self
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<E> {
        self.rw_buf_size = Some(buf_size);
        self
    }
}

/// Disk-based merge sorter.
///
/// Sorts a record stream of any length while holding at most `fan_in`
/// records in memory during run generation and merging at most `fan_in`
/// runs per merge step. Each sort invocation works inside its own
/// temporary directory which is removed on every exit path.
pub struct ExternalSorter<E: Error> {
    fan_in: usize,
    policy: RunPolicy,
    /// Merge thread pool. Groups within one pass touch disjoint run files,
    /// so they are safe to run concurrently; passes never overlap.
    thread_pool: rayon::ThreadPool,
    tmp_dir: Option<Box<Path>>,
    rw_buf_size: Option<usize>,

    input_error_type: PhantomData<E>,
}

impl<E: Error> ExternalSorter<E> {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `fan_in` - Working-set size and merge fan-in, at least 2.
    /// * `policy` - Run-boundary policy. If the parameter is [`None`] the
    ///   fixed flush threshold for `fan_in` is used.
    /// * `threads_number` - Number of threads to be used to merge groups in
    ///   parallel. If the parameter is [`None`] threads number will be
    ///   selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If
    ///   parameter is [`None`] default OS temporary directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    pub fn new(
        fan_in: usize,
        policy: Option<RunPolicy>,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError<E>> {
        if fan_in < 2 {
            return Err(SortError::InvalidFanIn(fan_in));
        }

        Ok(ExternalSorter {
            fan_in,
            policy: policy.unwrap_or_else(|| RunPolicy::fixed_for_fan_in(fan_in)),
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(|path| path.into()),
            rw_buf_size,
            input_error_type: PhantomData,
        })
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError<E>> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(SortError::ThreadPoolBuild)?;

        Ok(thread_pool)
    }

    /// Sorts data from the input and writes the totally ordered result to
    /// `output`. The output file is only created on success.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `output` - Path the sorted run is promoted to
    pub fn sort<I>(&self, input: I, output: &Path) -> Result<SortReport, SortError<E>>
    where
        I: IntoIterator<Item = Result<i64, E>>,
    {
        let mut store =
            RunStore::new(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(SortError::TempDir)?;

        let generator = RunGenerator::new(self.fan_in, self.policy);
        let outcome = generator.generate(input, &mut store).map_err(|err| match err {
            GenerateError::Io(err) => SortError::Io(err),
            GenerateError::Input(err) => SortError::Input(err),
        })?;

        if outcome.runs.is_empty() {
            return Err(SortError::EmptyInput);
        }

        let initial_runs = outcome.runs.len();
        log::info!(
            "{} records in {} initial runs, merging {} ways",
            outcome.records,
            initial_runs,
            self.fan_in
        );

        let mut runs = outcome.runs;
        let mut merge_passes = 0;

        while runs.len() > 1 {
            runs = self.merge_pass(&mut store, &runs)?;
            merge_passes += 1;
            log::info!("pass {} complete, {} runs remain", merge_passes, runs.len());
        }

        store.export(runs[0], output).map_err(SortError::Io)?;

        Ok(SortReport {
            records: outcome.records,
            fan_in: self.fan_in,
            initial_runs,
            merge_passes,
        })
    }

    /// Runs one merge pass: the run set is partitioned in id order into
    /// contiguous groups of at most `fan_in`, every group is merged into
    /// one new run, consumed inputs are retired and the outputs promoted.
    /// The next pass starts only after all of this has completed.
    fn merge_pass(&self, store: &mut RunStore, runs: &[RunId]) -> Result<Vec<RunId>, SortError<E>> {
        let groups: Vec<&[RunId]> = runs.chunks(self.fan_in).collect();
        log::debug!("merging {} runs in {} groups", runs.len(), groups.len());

        // Pending outputs are allocated up front so the groups only need a
        // shared view of the store while they run on the pool.
        let mut outputs = Vec::with_capacity(groups.len());
        for _ in &groups {
            outputs.push(store.create_pending().map_err(SortError::Io)?);
        }
        let output_ids: Vec<RunId> = outputs.iter().map(|(id, _)| *id).collect();

        {
            let store: &RunStore = store;
            self.thread_pool
                .install(|| {
                    groups
                        .into_par_iter()
                        .zip(outputs.into_par_iter())
                        .map(|(group, (id, writer))| merge_group(store, group, id, writer))
                        .collect::<Result<Vec<u64>, MergeStepError>>()
                })
                .map_err(|err| match err {
                    MergeStepError::Input(err) => SortError::Merge(err),
                    MergeStepError::Output(err) => SortError::Io(err),
                })?;
        }

        for &id in runs {
            store.retire(id).map_err(SortError::Io)?;
        }
        for &id in &output_ids {
            store.promote(id).map_err(SortError::Io)?;
        }

        Ok(output_ids)
    }
}

/// Merge step failure, split by side so the orchestrator can tell a fatal
/// merge-input error from an output storage error.
#[derive(Debug)]
enum MergeStepError {
    Input(io::Error),
    Output(io::Error),
}

/// Merges one group of sorted runs into a single pending output run.
/// Returns the number of records written.
fn merge_group(
    store: &RunStore,
    group: &[RunId],
    id: RunId,
    mut writer: RunWriter,
) -> Result<u64, MergeStepError> {
    let mut inputs = Vec::with_capacity(group.len());
    for &run in group {
        inputs.push(store.open_run(run).map_err(MergeStepError::Input)?);
    }

    for record in KWayMerger::new(inputs) {
        let record = record.map_err(MergeStepError::Input)?;
        writer.write(record).map_err(MergeStepError::Output)?;
    }

    let written = writer.finish().map_err(MergeStepError::Output)?;
    log::debug!("merged {} runs into {} ({} records)", group.len(), id, written);
    Ok(written)
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError, SortReport};
    use crate::generate::RunPolicy;

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn build_sorter(fan_in: usize, tmp: &Path) -> ExternalSorter<io::Error> {
        ExternalSorterBuilder::new(fan_in)
            .with_threads_number(2)
            .with_tmp_dir(tmp)
            .build()
            .unwrap()
    }

    fn sort_to_file(
        sorter: &ExternalSorter<io::Error>,
        values: Vec<i64>,
        output: &Path,
    ) -> Result<SortReport, SortError<io::Error>> {
        let input: Vec<Result<i64, io::Error>> = values.into_iter().map(Ok).collect();
        sorter.sort(input, output)
    }

    fn read_values(path: &Path) -> Vec<i64> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect()
    }

    fn expected_passes(initial_runs: usize, fan_in: usize) -> usize {
        let mut runs = initial_runs;
        let mut passes = 0;
        while runs > 1 {
            runs = (runs + fan_in - 1) / fan_in;
            passes += 1;
        }
        passes
    }

    #[rstest]
    fn test_reference_scenario(work_dir: tempfile::TempDir) {
        let output = work_dir.path().join("out.txt");
        let sorter = build_sorter(2, work_dir.path());

        let report = sort_to_file(&sorter, vec![5, 3, 8, 1, 9, 2, 7], &output).unwrap();

        assert_eq!(read_values(&output), vec![1, 2, 3, 5, 7, 8, 9]);
        assert_eq!(
            report,
            SortReport {
                records: 7,
                fan_in: 2,
                initial_runs: 2,
                merge_passes: 1,
            }
        );
    }

    #[rstest]
    #[case(2, 1000)]
    #[case(3, 1000)]
    #[case(7, 4096)]
    fn test_conservation_and_scaling(
        work_dir: tempfile::TempDir,
        #[case] fan_in: usize,
        #[case] count: usize,
    ) {
        let output = work_dir.path().join("out.txt");
        let sorter = build_sorter(fan_in, work_dir.path());

        // Repeated values make conservation a multiset property.
        let mut values: Vec<i64> = (0..count as i64).map(|v| v % 101).collect();
        values.shuffle(&mut rand::thread_rng());

        let report = sort_to_file(&sorter, values.clone(), &output).unwrap();

        values.sort_unstable();
        assert_eq!(read_values(&output), values);

        let threshold = 2 * fan_in;
        assert_eq!(report.records, count as u64);
        assert_eq!(report.initial_runs, (count + threshold - 1) / threshold);
        assert_eq!(report.merge_passes, expected_passes(report.initial_runs, fan_in));
    }

    #[rstest]
    fn test_idempotence_under_resort(work_dir: tempfile::TempDir) {
        let first = work_dir.path().join("first.txt");
        let second = work_dir.path().join("second.txt");
        let sorter = build_sorter(3, work_dir.path());

        let mut values: Vec<i64> = (-200..200).collect();
        values.shuffle(&mut rand::thread_rng());

        sort_to_file(&sorter, values, &first).unwrap();
        let resort_input = read_values(&first);
        sort_to_file(&sorter, resort_input, &second).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[rstest]
    fn test_single_record(work_dir: tempfile::TempDir) {
        let output = work_dir.path().join("out.txt");
        let sorter = build_sorter(4, work_dir.path());

        let report = sort_to_file(&sorter, vec![42], &output).unwrap();

        assert_eq!(read_values(&output), vec![42]);
        assert_eq!(report.initial_runs, 1);
        assert_eq!(report.merge_passes, 0);
    }

    #[rstest]
    fn test_empty_input_fails_without_output(work_dir: tempfile::TempDir) {
        let output = work_dir.path().join("out.txt");
        let sorter = build_sorter(2, work_dir.path());

        let result = sort_to_file(&sorter, vec![], &output);

        assert!(matches!(result, Err(SortError::EmptyInput)));
        assert!(!output.exists());
    }

    #[rstest]
    fn test_cleanup_after_success_and_failure(work_dir: tempfile::TempDir) {
        let output = work_dir.path().join("out.txt");
        let sorter = build_sorter(2, work_dir.path());

        sort_to_file(&sorter, vec![3, 1, 2, 9, 4, 6, 5, 8], &output).unwrap();
        sort_to_file(&sorter, vec![], &output).unwrap_err();

        // Only the sorted output may remain in the working directory.
        let leftovers: Vec<PathBuf> = fs::read_dir(work_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path != &output)
            .collect();
        assert!(leftovers.is_empty(), "leftover temp files: {:?}", leftovers);
    }

    #[rstest]
    fn test_replacement_selection_end_to_end(work_dir: tempfile::TempDir) {
        let output = work_dir.path().join("out.txt");
        let sorter: ExternalSorter<io::Error> = ExternalSorterBuilder::new(4)
            .with_run_policy(RunPolicy::ReplacementSelection)
            .with_threads_number(2)
            .with_tmp_dir(work_dir.path())
            .build()
            .unwrap();

        let mut values: Vec<i64> = (0..2000).map(|v| (v * 7919) % 1000).collect();
        values.shuffle(&mut rand::thread_rng());

        let report = sort_to_file(&sorter, values.clone(), &output).unwrap();

        values.sort_unstable();
        assert_eq!(read_values(&output), values);
        assert_eq!(report.merge_passes, expected_passes(report.initial_runs, 4));
    }

    #[rstest]
    fn test_input_error_is_surfaced(work_dir: tempfile::TempDir) {
        let output = work_dir.path().join("out.txt");
        let sorter = build_sorter(2, work_dir.path());

        let input = vec![
            Ok(5),
            Ok(1),
            Err(io::Error::new(io::ErrorKind::Other, "stream broken")),
        ];

        let result = sorter.sort(input, &output);
        assert!(matches!(result, Err(SortError::Input(_))));
        assert!(!output.exists());
    }

    #[test]
    fn test_fan_in_below_two_is_rejected() {
        for fan_in in [0, 1] {
            let result = ExternalSorterBuilder::<io::Error>::new(fan_in).build();
            assert!(matches!(result, Err(SortError::InvalidFanIn(_))));
        }
    }
}
