//! Positioned writer for `data.part` files.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Handle on a task's data file. Clone-cheap; every write is positioned
/// (pwrite-style), so workers of disjoint ranges can share one handle,
/// including across tasks in a shared-layout workspace.
#[derive(Clone)]
pub struct PartFile {
    file: Arc<File>,
    path: PathBuf,
}

impl PartFile {
    /// Create the file (truncating any previous content) and preallocate it
    /// to `size` bytes. On Unix tries `posix_fallocate` for real block
    /// allocation, falling back to `set_len` (sparse) on failure.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("create data file: {}", path.display()))?;
        let pf = PartFile {
            file: Arc::new(file),
            path: path.to_path_buf(),
        };
        if size > 0 {
            pf.preallocate(size)?;
        }
        Ok(pf)
    }

    /// Create the file as a sparse full-artifact-sized file (shared layout).
    pub fn create_sparse(path: &Path, size: u64) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("create sparse data file: {}", path.display()))?;
        if file.metadata()?.len() < size {
            file.set_len(size)
                .with_context(|| format!("size sparse data file: {}", path.display()))?;
        }
        Ok(PartFile {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Open an existing data file for resume (read+write, no truncation).
    pub fn open_existing(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open data file: {}", path.display()))?;
        Ok(PartFile {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    fn preallocate(&self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file
            .set_len(size)
            .context("preallocate data file")?;
        Ok(())
    }

    /// Write `data` at absolute `offset`. Never moves a shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let mut written = 0usize;
        while written < data.len() {
            let n = self.file.write_at(&data[written..], offset + written as u64)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "zero-length write to data file",
                ));
            }
            written += n;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    #[cfg(unix)]
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(not(unix))]
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(buf)
    }

    /// Flush written data to the device. Called when a checkpoint advances.
    pub fn sync_data(&self) -> std::io::Result<()> {
        self.file.sync_data()
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().context("stat data file")?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
