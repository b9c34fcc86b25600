#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Storage probe and memory-bounded streaming downloader.
//!
//! Given a direct URL and a destination file, the downloader runs one or more
//! HTTP Range readers feeding bounded per-segment buffers, and a single
//! writer that drains those buffers in file order with positional writes.
//! Because the writer commits bytes strictly in order, the on-disk contents
//! are a contiguous prefix at every instant, which makes resume after a drop
//! or a crash exact. Resident memory per job is bounded by the profile's
//! disk buffer plus the per-connection HTTP read buffers.

mod download;
mod meter;
mod probe;
mod sanitize;
mod segment;
mod storage;

pub use download::{FetchOutcome, FetchRequest, Fetcher, ProgressSample};
pub use meter::SpeedMeter;
pub use probe::{classify_iops, detect_disk_kind};
pub use sanitize::sanitize_file_name;
pub use segment::{Segment, plan_segments};
pub use storage::FileWriter;
