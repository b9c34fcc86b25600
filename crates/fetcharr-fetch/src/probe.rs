//! Storage medium detection.
//!
//! Preferred path: the block-device `rotational` attribute for the mount
//! holding the download directory. When that is unavailable (non-Linux,
//! unusual device topology), a short 4 KiB random-read micro-benchmark over a
//! scratch file classifies by achieved IOPS against a 400 IOPS threshold.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use fetcharr_core::DiskKind;

/// IOPS at or above which the medium is treated as solid-state.
const IOPS_THRESHOLD: f64 = 400.0;
/// Size of the scratch file the fallback benchmark reads from.
const SCRATCH_BYTES: u64 = 8 * 1024 * 1024;
/// How long the fallback benchmark samples reads.
const BENCH_DURATION: Duration = Duration::from_millis(250);
/// Read size used by the benchmark.
const READ_BYTES: usize = 4 * 1024;

/// Classify the medium backing `path`.
///
/// Never fails: when neither the sysfs attribute nor the benchmark can run,
/// the rotational profile is assumed, which is the conservative choice for
/// write patterns.
#[must_use]
pub fn detect_disk_kind(path: &Path) -> DiskKind {
    #[cfg(target_os = "linux")]
    if let Some(kind) = rotational_attribute(path) {
        debug!(path = %path.display(), kind = ?kind, "classified medium via sysfs");
        return kind;
    }

    match bench_random_reads(path) {
        Some(iops) => {
            let kind = classify_iops(iops);
            debug!(path = %path.display(), iops, kind = ?kind, "classified medium via benchmark");
            kind
        }
        None => {
            warn!(path = %path.display(), "storage probe failed; assuming rotational");
            DiskKind::Rotational
        }
    }
}

/// Map a measured random-read rate to a medium classification.
#[must_use]
pub fn classify_iops(iops: f64) -> DiskKind {
    if iops >= IOPS_THRESHOLD {
        DiskKind::Solid
    } else {
        DiskKind::Rotational
    }
}

/// Read the `rotational` queue attribute for the device holding `path`.
#[cfg(target_os = "linux")]
fn rotational_attribute(path: &Path) -> Option<DiskKind> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::metadata(nearest_existing(path)?).ok()?;
    let dev = metadata.dev();
    // Linux dev_t layout: 12-bit major spread across two fields.
    let major = (dev >> 8) & 0xfff;
    let minor = (dev & 0xff) | ((dev >> 12) & 0xffff_ff00);

    // The partition node itself usually has no queue/ directory; its parent
    // whole-disk device does.
    let candidates = [
        format!("/sys/dev/block/{major}:{minor}/queue/rotational"),
        format!("/sys/dev/block/{major}:{minor}/../queue/rotational"),
    ];
    for candidate in candidates {
        if let Ok(raw) = fs::read_to_string(&candidate) {
            return match raw.trim() {
                "0" => Some(DiskKind::Solid),
                "1" => Some(DiskKind::Rotational),
                _ => None,
            };
        }
    }
    None
}

/// Walk up from `path` to the nearest component that exists on disk.
#[cfg(target_os = "linux")]
fn nearest_existing(path: &Path) -> Option<PathBuf> {
    let mut current = path;
    loop {
        if current.exists() {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}

/// Time 4 KiB reads at random offsets over a scratch file in `dir`.
fn bench_random_reads(dir: &Path) -> Option<f64> {
    let dir = if dir.exists() {
        dir.to_path_buf()
    } else {
        dir.ancestors().find(|p| p.exists())?.to_path_buf()
    };
    let scratch = dir.join(".fetcharr-probe");
    let result = run_bench(&scratch);
    let _ = fs::remove_file(&scratch);
    result
}

fn run_bench(scratch: &PathBuf) -> Option<f64> {
    let mut file = fs::File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(scratch)
        .ok()?;
    let block = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    while written < SCRATCH_BYTES {
        file.write_all(&block).ok()?;
        written += block.len() as u64;
    }
    file.sync_all().ok()?;

    let mut rng = rand::rng();
    let mut buf = vec![0u8; READ_BYTES];
    let slots = SCRATCH_BYTES / READ_BYTES as u64;
    let started = Instant::now();
    let mut reads = 0u64;
    while started.elapsed() < BENCH_DURATION {
        let slot = rng.random_range(0..slots);
        file.seek(SeekFrom::Start(slot * READ_BYTES as u64)).ok()?;
        file.read_exact(&mut buf).ok()?;
        reads += 1;
    }
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed <= 0.0 || reads == 0 {
        return None;
    }
    #[expect(
        clippy::cast_precision_loss,
        reason = "read counts are far below f64 precision limits"
    )]
    Some(reads as f64 / elapsed)
}
