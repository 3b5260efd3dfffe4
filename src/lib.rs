//! `ext-merge-sort` is a memory-bounded external merge sort engine.
//!
//! External sorting handles inputs that do not fit into main memory. Sorting is done in two phases. During the
//! presort phase the input is read in units whose estimated size stays within a memory budget; each unit is
//! sorted in memory and written to a temporary file as a sorted run. During the merge phase the runs are merged,
//! at most `merge_factor` at a time, until a single final merge streams the result to its destination.
//! Inputs that fit into a single unit are sorted in memory and never touch the disk.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `ext-merge-sort` supports the following features:
//!
//! * **Record agnostic:**
//!   the record type, its order and its encoding are supplied by a [`RecordStrategy`]. Byte lines, ranked
//!   tab-separated records and any `serde` type (stored as `MessagePack`) are supported out of the box.
//! * **Bounded resources:**
//!   presort memory is limited by an estimated record size budget, the number of simultaneously open
//!   temporary files is limited by the merge factor.
//! * **Progress and cancellation:**
//!   a shared [`SortState`] reports the current phase, the number of sorted runs and the merge round, and lets
//!   another thread cancel a running sort.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use env_logger;
//! use log;
//!
//! use ext_merge_sort::{ByteLines, SortConfig, Sorter};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let input = fs::File::open("input.txt").unwrap();
//!     let output = fs::File::create("output.txt").unwrap();
//!
//!     let config = SortConfig::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_max_memory(50 * 1024 * 1024);
//!     let mut sorter = Sorter::new(config, ByteLines).unwrap();
//!
//!     let outcome = sorter.sort_stream(input, output).unwrap();
//!     assert!(outcome.is_completed());
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod merger;
pub mod presort;
pub mod record;
pub mod sort;
pub mod state;
pub mod strategy;
pub mod temp;

pub use buffer::{BufferConsistencyError, SegmentedBuffer};
pub use chunk::SortedRun;
pub use config::SortConfig;
pub use merger::{merge_sources, PairwiseMerger};
pub use record::{IterSource, RecordCodec, RecordSink, RecordSource, RecordStrategy, VecSink};
pub use sort::{SortError, SortOutcome, Sorted, Sorter};
pub use state::{Phase, SortState};
pub use strategy::{ByteLines, RankedRecords, RmpRecords, TextLines};
pub use temp::{StdTempFileProvider, TempResourceProvider};
