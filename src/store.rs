//! Run file store.
//!
//! Owns the temporary directory a sort works in and the arena of run
//! descriptors living inside it. Run identity is an explicit [`RunId`]
//! assigned monotonically; file names are derived from it, never the other
//! way around. Dropping the store removes the directory and everything in
//! it, so temporary artifacts cannot outlive a sort, successful or not.

use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use tempfile;

/// Identifier of a run held by a [`RunStore`]. Ids are never reused within
/// one store, so no two live runs can share a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(usize);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    /// Closed, sorted, readable.
    Live,
    /// A merge output still under its temporary name.
    Pending,
    /// Consumed by a merge and deleted.
    Retired,
}

struct RunEntry {
    path: PathBuf,
    state: RunState,
}

/// Arena of temporary run files backing one sort invocation.
pub struct RunStore {
    dir: tempfile::TempDir,
    runs: Vec<RunEntry>,
    rw_buf_size: Option<usize>,
}

impl RunStore {
    /// Creates a store backed by a fresh temporary directory. If `base` is
    /// [`None`] the OS temporary directory is used.
    pub fn new(base: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let dir = match base {
            Some(base) => tempfile::tempdir_in(base),
            None => tempfile::tempdir(),
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        Ok(RunStore {
            dir,
            runs: Vec::new(),
            rw_buf_size,
        })
    }

    fn alloc(&mut self, name: String, state: RunState) -> io::Result<(RunId, RunWriter)> {
        let id = RunId(self.runs.len());
        let path = self.dir.path().join(name);
        let file = fs::File::create(&path)?;

        self.runs.push(RunEntry { path, state });

        Ok((id, RunWriter::new(file, self.rw_buf_size)))
    }

    /// Creates a new live run and returns a writer for it.
    pub fn create_run(&mut self) -> io::Result<(RunId, RunWriter)> {
        let name = format!("run-{}.txt", self.runs.len());
        self.alloc(name, RunState::Live)
    }

    /// Creates a merge output staged under a temporary name. It becomes a
    /// live run only once [`RunStore::promote`] is called on it.
    pub fn create_pending(&mut self) -> io::Result<(RunId, RunWriter)> {
        let name = format!("merge-{}.tmp", self.runs.len());
        self.alloc(name, RunState::Pending)
    }

    /// Renames a completed merge output into the run naming scheme.
    pub fn promote(&mut self, id: RunId) -> io::Result<()> {
        let entry = &mut self.runs[id.0];
        debug_assert_eq!(entry.state, RunState::Pending);

        let final_path = self.dir.path().join(format!("run-{}.txt", id.0));
        fs::rename(&entry.path, &final_path)?;

        entry.path = final_path;
        entry.state = RunState::Live;
        Ok(())
    }

    /// Opens a live run for reading. Takes `&self` so the disjoint merge
    /// groups of one pass can open their inputs concurrently.
    pub fn open_run(&self, id: RunId) -> io::Result<RunReader> {
        let entry = &self.runs[id.0];
        debug_assert_eq!(entry.state, RunState::Live);

        let file = fs::File::open(&entry.path)?;
        Ok(RunReader::new(file, self.rw_buf_size))
    }

    /// Deletes the backing file of a consumed run. A file that was never
    /// created (or is already gone) is not an error.
    pub fn retire(&mut self, id: RunId) -> io::Result<()> {
        let entry = &mut self.runs[id.0];
        match fs::remove_file(&entry.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        entry.state = RunState::Retired;
        Ok(())
    }

    /// Moves the final run out of the store to the user's output path.
    /// Falls back to copy + delete when `dest` is on another filesystem.
    pub fn export(&mut self, id: RunId, dest: &Path) -> io::Result<()> {
        let entry = &mut self.runs[id.0];
        debug_assert_eq!(entry.state, RunState::Live);

        if fs::rename(&entry.path, dest).is_err() {
            fs::copy(&entry.path, dest)?;
            fs::remove_file(&entry.path)?;
        }
        entry.state = RunState::Retired;
        Ok(())
    }

    /// Number of runs ever allocated (live, pending or retired).
    pub fn allocated(&self) -> usize {
        self.runs.len()
    }

    /// Path of the temporary directory, for lifecycle assertions in tests.
    pub fn dir_path(&self) -> &Path {
        self.dir.path()
    }
}

/// Buffered writer producing the newline-delimited integer run format.
pub struct RunWriter {
    inner: io::BufWriter<fs::File>,
    len: u64,
}

impl RunWriter {
    fn new(file: fs::File, buf_size: Option<usize>) -> Self {
        let inner = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };
        RunWriter { inner, len: 0 }
    }

    /// Appends one record. Callers are responsible for feeding records in
    /// ascending order; the store does not re-check sortedness.
    pub fn write(&mut self, value: i64) -> io::Result<()> {
        writeln!(self.inner, "{}", value)?;
        self.len += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Flushes and closes the run file.
    pub fn finish(mut self) -> io::Result<u64> {
        self.inner.flush()?;
        Ok(self.len)
    }
}

/// Buffered reader over a closed run file.
///
/// End of file is natural exhaustion (`None`); anything else, including a
/// line that does not parse back to an integer, is surfaced as an error so
/// a damaged run is never mistaken for an exhausted one.
pub struct RunReader {
    lines: io::Lines<io::BufReader<fs::File>>,
}

impl RunReader {
    fn new(file: fs::File, buf_size: Option<usize>) -> Self {
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };
        RunReader {
            lines: reader.lines(),
        }
    }
}

impl Iterator for RunReader {
    type Item = io::Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lines.next()? {
            Ok(line) => Some(line.trim().parse::<i64>().map_err(|err| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupted run record {:?}: {}", line, err),
                )
            })),
            Err(err) => Some(Err(err)),
        }
    }
}
