//! Destination file lifecycle.
//!
//! Opens (or creates) the destination file once per download attempt,
//! extends it to its full length when the profile preallocates, and supports
//! positional writes so segment data lands at its absolute offset without
//! seeking a shared cursor.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Writer for a destination file. Cheap to clone; every clone shares the
/// same open file, and each `write_at` is independent (pwrite-style).
#[derive(Clone)]
pub struct FileWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl FileWriter {
    /// Open `path` for writing, creating it if needed, and extend it to
    /// `size_total` when `preallocate` is set and the file is shorter.
    ///
    /// The file is never truncated: a resumed download reuses the bytes
    /// already present.
    ///
    /// # Errors
    ///
    /// Propagates the underlying I/O error.
    pub fn open(path: &Path, size_total: u64, preallocate: bool) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if preallocate && file.metadata()?.len() < size_total {
            file.set_len(size_total)?;
        }
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write all of `data` at `offset` without moving a shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Portable fallback: clone the handle, seek, write.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    /// Write a batch of chunks as one sequential run starting at `offset`.
    ///
    /// Returns the number of bytes written.
    pub fn write_batch(&self, offset: u64, chunks: &[bytes::Bytes]) -> io::Result<u64> {
        let mut cursor = offset;
        for chunk in chunks {
            self.write_at(cursor, chunk)?;
            cursor += chunk.len() as u64;
        }
        Ok(cursor - offset)
    }

    /// Flush file data and metadata to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Current length of the file on disk.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Path this writer was opened on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn open_preallocates_to_full_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("movie.mkv");
        let writer = FileWriter::open(&path, 1_000, true).expect("open");
        assert_eq!(writer.len().expect("len"), 1_000);

        // Re-opening never shrinks or truncates.
        drop(writer);
        let writer = FileWriter::open(&path, 500, true).expect("reopen");
        assert_eq!(writer.len().expect("len"), 1_000);
    }

    #[test]
    fn open_without_preallocation_leaves_length_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("episode.mkv");
        let writer = FileWriter::open(&path, 4_096, false).expect("open");
        assert_eq!(writer.len().expect("len"), 0);
    }

    #[test]
    fn positional_writes_land_at_their_offsets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.bin");
        let writer = FileWriter::open(&path, 100, true).expect("open");

        writer.write_at(0, b"hello").expect("write");
        writer.write_at(50, b"world").expect("write");
        let clone = writer.clone();
        clone.write_at(95, b"xy").expect("write");
        writer.sync().expect("sync");

        let mut contents = Vec::new();
        File::open(&path)
            .expect("open")
            .read_to_end(&mut contents)
            .expect("read");
        assert_eq!(&contents[0..5], b"hello");
        assert_eq!(&contents[50..55], b"world");
        assert_eq!(&contents[95..97], b"xy");
    }

    #[test]
    fn batch_write_is_one_sequential_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("batch.bin");
        let writer = FileWriter::open(&path, 12, true).expect("open");

        let chunks = [
            bytes::Bytes::from_static(b"abc"),
            bytes::Bytes::from_static(b"defg"),
            bytes::Bytes::from_static(b"hi"),
        ];
        let written = writer.write_batch(2, &chunks).expect("batch");
        assert_eq!(written, 9);

        let mut contents = Vec::new();
        File::open(&path)
            .expect("open")
            .read_to_end(&mut contents)
            .expect("read");
        assert_eq!(&contents[2..11], b"abcdefghi");
    }
}
