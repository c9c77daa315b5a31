use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};

use crate::types::{BufferError, Result};

/// Positioned byte-range I/O over a single backing file.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`. A read that runs past the
    /// end of the file fails with `ErrorKind::UnexpectedEof`; bytes read
    /// before the end are retained in `dst`.
    fn read_block(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`. The write may extend the file.
    fn write_block(&self, src: &[u8], off: u64) -> Result<()>;
    fn len(&self) -> Result<u64>;
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    fn sync_all(&self) -> Result<()>;
}

/// `std::fs::File` implementation using positioned reads and writes, so a
/// single handle can serve concurrent callers at disjoint offsets.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens `path` read-write, creating the file if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(BufferError::from)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn read_exact_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        while !dst.is_empty() {
            let read = self.inner.read_at(dst, off).map_err(BufferError::from)?;
            if read == 0 {
                return Err(BufferError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                )));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_all_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        while !src.is_empty() {
            let written = self.inner.write_at(src, off).map_err(BufferError::from)?;
            if written == 0 {
                return Err(BufferError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                )));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        use std::os::windows::fs::FileExt;
        while !dst.is_empty() {
            let read = self.inner.seek_read(dst, off).map_err(BufferError::from)?;
            if read == 0 {
                return Err(BufferError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                )));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        use std::os::windows::fs::FileExt;
        while !src.is_empty() {
            let written = self.inner.seek_write(src, off).map_err(BufferError::from)?;
            if written == 0 {
                return Err(BufferError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                )));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact_at(&self, _off: u64, _dst: &mut [u8]) -> Result<()> {
        Err(BufferError::Invalid(
            "positioned I/O unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_all_at(&self, _off: u64, _src: &[u8]) -> Result<()> {
        Err(BufferError::Invalid(
            "positioned I/O unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_block(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact_at(off, dst)
    }

    fn write_block(&self, src: &[u8], off: u64) -> Result<()> {
        self.write_all_at(off, src)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata().map_err(BufferError::from)?.len())
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(BufferError::from)
    }
}
