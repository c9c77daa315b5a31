use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::io::{FileIo, StdFileIo};
use crate::types::{BufferError, Result};

/// Backing store for page images, one file per segment.
///
/// Distinct pages of one segment occupy disjoint byte ranges, so
/// implementations do not need file-level locking.
pub trait SegmentStore: Send + Sync + 'static {
    /// Reads `dst.len()` bytes of segment `segment_id` at byte offset `off`.
    /// A range that runs past the end of the file is not an error: bytes
    /// beyond the end are left untouched in `dst`.
    fn read_block(&self, segment_id: u16, off: u64, dst: &mut [u8]) -> Result<()>;

    /// Writes all of `src` into segment `segment_id` at byte offset `off`,
    /// creating the segment file if it does not exist and extending it as
    /// needed.
    fn write_block(&self, segment_id: u16, src: &[u8], off: u64) -> Result<()>;
}

/// Directory-backed segment store. Each segment lives in a file named by
/// the decimal string of its segment id. Open handles are cached per
/// segment; creation is open-or-create and therefore idempotent under
/// concurrent first access.
pub struct DirStore {
    dir: PathBuf,
    handles: Mutex<HashMap<u16, StdFileIo>>,
}

impl DirStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Store rooted at the process working directory.
    pub fn in_working_dir() -> Self {
        Self::new(".")
    }

    pub fn segment_path(&self, segment_id: u16) -> PathBuf {
        self.dir.join(segment_id.to_string())
    }

    fn handle(&self, segment_id: u16) -> Result<StdFileIo> {
        let mut handles = self.handles.lock();
        if let Some(io) = handles.get(&segment_id) {
            return Ok(io.clone());
        }
        let io = StdFileIo::open(self.segment_path(segment_id))?;
        handles.insert(segment_id, io.clone());
        Ok(io)
    }
}

impl SegmentStore for DirStore {
    fn read_block(&self, segment_id: u16, off: u64, dst: &mut [u8]) -> Result<()> {
        let io = self.handle(segment_id)?;
        match io.read_block(off, dst) {
            Ok(()) => Ok(()),
            // short file: the prefix that existed was read, the rest stays
            Err(BufferError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn write_block(&self, segment_id: u16, src: &[u8], off: u64) -> Result<()> {
        self.handle(segment_id)?.write_block(src, off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_of_missing_segment_leaves_buffer_untouched() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        let mut buf = [0xEEu8; 64];
        store.read_block(9, 0, &mut buf).unwrap();
        assert_eq!(buf, [0xEEu8; 64]);
        // open-or-create left an empty segment file behind
        assert!(store.segment_path(9).exists());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        store.write_block(3, &[0xAB; 128], 1024).unwrap();
        let mut buf = [0u8; 128];
        store.read_block(3, 1024, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 128]);
    }

    #[test]
    fn segment_files_are_named_by_decimal_id() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        store.write_block(7, b"x", 0).unwrap();
        assert!(dir.path().join("7").is_file());
    }

    #[test]
    fn short_read_fills_only_existing_prefix() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        store.write_block(0, &[0x11; 16], 0).unwrap();
        let mut buf = [0u8; 64];
        store.read_block(0, 0, &mut buf).unwrap();
        assert_eq!(&buf[..16], &[0x11; 16]);
        assert!(buf[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn handles_are_cached_per_segment() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        store.write_block(5, b"first", 0).unwrap();
        store.write_block(5, b"second", 16).unwrap();
        assert_eq!(store.handles.lock().len(), 1);

        store.write_block(6, b"other", 0).unwrap();
        assert_eq!(store.handles.lock().len(), 2);
    }
}
