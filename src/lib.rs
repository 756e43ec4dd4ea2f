//! `pways` is a p-way external merge sort implementation.
//!
//! External sorting is required when the data being sorted does not fit into
//! the main memory of a computer and must instead reside in slower external
//! memory, usually a disk. Sorting happens in two phases: run generation
//! first splits the input into individually sorted run files while holding
//! at most `p` records in memory, then bounded-fan-in merge passes combine
//! up to `p` runs at a time until a single totally ordered run remains. For
//! more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `pways` supports the following features:
//!
//! * **Bounded memory:**
//!   the memory budget is an explicit record count `p`, which also bounds
//!   the number of run files merged (and therefore held open) at once.
//! * **Pluggable run boundaries:**
//!   runs are cut either at a fixed flush threshold keyed on the fan-in, or
//!   by classical replacement selection, which produces longer runs and
//!   therefore fewer merge passes.
//! * **Parallel merge groups:**
//!   the merge groups of a single pass touch disjoint run files and are
//!   executed on a thread pool; passes themselves never overlap.
//! * **Guaranteed cleanup:**
//!   every sort works inside its own temporary directory which is removed
//!   on success and on failure alike.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path::Path;
//!
//! use pways::{ExternalSorter, ExternalSorterBuilder, IntegerLines};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let input = IntegerLines::new(io::BufReader::new(fs::File::open("input.txt").unwrap()));
//!
//!     let sorter: ExternalSorter<io::Error> = ExternalSorterBuilder::new(16)
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     let report = sorter.sort(input, Path::new("output.txt")).unwrap();
//!     println!("{} records, {} passes", report.records, report.merge_passes);
//! }
//! ```

pub mod generate;
pub mod input;
pub mod merger;
pub mod sort;
pub mod store;
pub mod workset;

pub use generate::{GenerationOutcome, RunGenerator, RunPolicy};
pub use input::IntegerLines;
pub use merger::KWayMerger;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortReport};
pub use store::{RunId, RunReader, RunStore, RunWriter};
pub use workset::WorkingSet;
