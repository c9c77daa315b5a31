use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::store::SegmentStore;
use crate::types::{PageId, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum FrameState {
    /// No page image loaded yet; no buffer allocated.
    Empty,
    /// Buffer matches the bytes on disk.
    Clean,
    /// Buffer was modified under an exclusive latch and must be written
    /// back before the frame goes away.
    Dirty,
}

/// The latched part of a frame: state and page image. Everything behind
/// the reader-writer latch lives here.
pub(crate) struct FrameSlot {
    pub(crate) state: FrameState,
    pub(crate) buf: Option<Box<[u8]>>,
}

pub(crate) type SharedGuard = ArcRwLockReadGuard<RawRwLock, FrameSlot>;
pub(crate) type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, FrameSlot>;

/// One page slot. Identity is fixed at construction; the image and its
/// state are guarded by the latch.
pub(crate) struct Frame {
    page_id: PageId,
    segment_id: u16,
    offset: u64,
    page_size: usize,
    /// Requesters that observed this frame resident and are about to block
    /// on its latch. Eviction skips pinned frames.
    pins: AtomicUsize,
    /// Set when the frame is unlinked from the table, by eviction or after
    /// a failed materialisation, so blocked waiters can tell the reference
    /// they hold no longer names a resident page.
    defunct: AtomicBool,
    slot: Arc<RwLock<FrameSlot>>,
}

impl Frame {
    pub(crate) fn new(page_id: PageId, page_size: usize) -> Self {
        Self {
            page_id,
            segment_id: page_id.segment_id(),
            offset: page_id.offset(page_size),
            page_size,
            pins: AtomicUsize::new(0),
            defunct: AtomicBool::new(false),
            slot: Arc::new(RwLock::new(FrameSlot {
                state: FrameState::Empty,
                buf: None,
            })),
        }
    }

    pub(crate) fn page_id(&self) -> PageId {
        self.page_id
    }

    pub(crate) fn try_lock_shared(&self) -> Option<SharedGuard> {
        self.slot.try_read_arc()
    }

    pub(crate) fn lock_shared(&self) -> SharedGuard {
        self.slot.read_arc()
    }

    pub(crate) fn try_lock_exclusive(&self) -> Option<ExclusiveGuard> {
        self.slot.try_write_arc()
    }

    pub(crate) fn lock_exclusive(&self) -> ExclusiveGuard {
        self.slot.write_arc()
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unpin(&self) {
        self.pins.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Relaxed) != 0
    }

    pub(crate) fn mark_defunct(&self) {
        self.defunct.store(true, Ordering::Release);
    }

    pub(crate) fn is_defunct(&self) -> bool {
        self.defunct.load(Ordering::Acquire)
    }

    /// Loads the page image from the store. The buffer starts zeroed; a
    /// segment file that is missing or shorter than the page yields a
    /// short read, leaving the tail zeroed.
    pub(crate) fn materialise(&self, slot: &mut FrameSlot, store: &dyn SegmentStore) -> Result<()> {
        debug_assert_eq!(slot.state, FrameState::Empty);
        let mut buf = vec![0u8; self.page_size].into_boxed_slice();
        store.read_block(self.segment_id, self.offset, &mut buf)?;
        slot.buf = Some(buf);
        slot.state = FrameState::Clean;
        Ok(())
    }

    /// Writes the image back if Dirty. Idempotent: a Clean frame is a
    /// no-op. Returns whether a write-back happened.
    pub(crate) fn flush(&self, slot: &mut FrameSlot, store: &dyn SegmentStore) -> Result<bool> {
        if slot.state != FrameState::Dirty {
            return Ok(false);
        }
        let buf = slot.buf.as_ref().expect("dirty frame has a buffer");
        store.write_block(self.segment_id, buf, self.offset)?;
        slot.state = FrameState::Clean;
        Ok(true)
    }
}

enum Latch {
    Shared(SharedGuard),
    Exclusive(ExclusiveGuard),
}

/// A fixed page: the frame plus the latch held on it. The page stays
/// resident and its bytes stay valid for exactly as long as this value
/// lives. Dropping it releases the latch without marking the page dirty,
/// same as `BufferPool::unfix(page, false)`.
pub struct FixedPage<'p> {
    frame: Arc<Frame>,
    latch: Latch,
    pool: PhantomData<&'p ()>,
}

impl<'p> FixedPage<'p> {
    pub(crate) fn shared(frame: Arc<Frame>, guard: SharedGuard) -> Self {
        Self {
            frame,
            latch: Latch::Shared(guard),
            pool: PhantomData,
        }
    }

    pub(crate) fn exclusive(frame: Arc<Frame>, guard: ExclusiveGuard) -> Self {
        Self {
            frame,
            latch: Latch::Exclusive(guard),
            pool: PhantomData,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.frame.page_id
    }

    /// Whether this fix holds the exclusive latch.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.latch, Latch::Exclusive(_))
    }

    /// The page image. Shared and exclusive fixes may read.
    pub fn data(&self) -> &[u8] {
        let slot: &FrameSlot = match &self.latch {
            Latch::Shared(guard) => guard,
            Latch::Exclusive(guard) => guard,
        };
        slot.buf
            .as_deref()
            .expect("page materialised before fix returned")
    }

    /// Mutable page image. Exclusive fixes only.
    ///
    /// # Panics
    ///
    /// Panics when the fix is shared. Mutating does not mark the page
    /// dirty by itself; pass `is_dirty` to `unfix` or call `mark_dirty`.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.latch {
            Latch::Exclusive(guard) => guard
                .buf
                .as_deref_mut()
                .expect("page materialised before fix returned"),
            Latch::Shared(_) => panic!("data_mut on a shared fix"),
        }
    }

    /// Marks the page dirty so it is written back before the frame is
    /// destroyed.
    ///
    /// # Panics
    ///
    /// Panics when the fix is shared.
    pub fn mark_dirty(&mut self) {
        match &mut self.latch {
            Latch::Exclusive(guard) => guard.state = FrameState::Dirty,
            Latch::Shared(_) => panic!("mark_dirty on a shared fix"),
        }
    }
}
