use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::frame::{ExclusiveGuard, FixedPage, Frame};
use crate::store::{DirStore, SegmentStore};
use crate::types::{BufferError, PageId, Result};

/// Configuration for a [`BufferPool`].
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Size in bytes of every page.
    pub page_size: usize,
    /// Maximum number of pages resident in memory at the same time.
    pub page_count: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            page_size: 8192,
            page_count: 128,
        }
    }
}

/// Counters accumulated over the pool's lifetime.
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    /// Fix requests served from a resident frame.
    pub hits: u64,
    /// Fix requests that had to load the page.
    pub misses: u64,
    /// Frames evicted to make room.
    pub evictions: u64,
    /// Dirty pages written back during eviction.
    pub dirty_writebacks: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} dirty_writebacks={}",
            self.hits, self.misses, self.evictions, self.dirty_writebacks
        )
    }
}

/// Frame table, replacement queues and counters, all serialised by the
/// pool mutex. No disk I/O happens while this is locked.
struct PoolInner {
    table: HashMap<PageId, Arc<Frame>>,
    fifo: VecDeque<Arc<Frame>>,
    lru: VecDeque<Arc<Frame>>,
    stats: PoolStats,
}

/// Which queue a victim was taken from, so a failed write-back can put it
/// back where it came from.
#[derive(Clone, Copy)]
enum VictimQueue {
    Fifo,
    Lru,
}

/// Bounded in-memory page cache with per-page shared/exclusive latching.
///
/// Pages are fixed by id and returned with the requested latch held; the
/// caller reads or writes the image and unfixes, optionally marking the
/// page dirty. Replacement is two-queue: frames enter a FIFO queue on
/// first residence and move to an LRU queue on reuse. Eviction victimises
/// the FIFO queue head-first and falls back to the LRU queue, taking the
/// first frame whose exclusive latch can be acquired without blocking.
///
/// `fix` and `unfix` are safe to call from arbitrary threads. On a
/// contended latch the requester takes a pin under the pool mutex before
/// blocking outside it, which keeps the frame out of eviction's reach for
/// the wait; a frame that is removed anyway (failed load, completed
/// eviction) is flagged so the waiter retries its fix from scratch.
pub struct BufferPool {
    store: Arc<dyn SegmentStore>,
    page_size: usize,
    page_count: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Pool over segment files in the process working directory.
    pub fn new(page_size: usize, page_count: usize) -> Result<Self> {
        Self::with_store(
            Arc::new(DirStore::in_working_dir()),
            PoolOptions {
                page_size,
                page_count,
            },
        )
    }

    /// Pool over segment files in `dir`.
    pub fn open_in(dir: impl AsRef<Path>, options: PoolOptions) -> Result<Self> {
        Self::with_store(Arc::new(DirStore::new(dir)), options)
    }

    /// Pool over a caller-supplied backing store.
    pub fn with_store(store: Arc<dyn SegmentStore>, options: PoolOptions) -> Result<Self> {
        if options.page_size == 0 {
            return Err(BufferError::Invalid("page size must be non-zero"));
        }
        if options.page_count == 0 {
            return Err(BufferError::Invalid("page count must be non-zero"));
        }
        Ok(Self {
            store,
            page_size: options.page_size,
            page_count: options.page_count,
            inner: Mutex::new(PoolInner {
                table: HashMap::with_capacity(options.page_count),
                fifo: VecDeque::new(),
                lru: VecDeque::new(),
                stats: PoolStats::default(),
            }),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Returns the page latched in the requested mode, loading it from the
    /// backing store when it is not resident.
    ///
    /// With `exclusive` set the page is latched exclusively, otherwise
    /// shared. A resident page is promoted to the LRU tail. A page that is
    /// not resident is loaded into a fresh frame, evicting the oldest
    /// unfixed frame (FIFO before LRU) when the pool is at capacity.
    ///
    /// Fails with [`BufferError::BufferFull`] when the page is not
    /// resident, the pool is at capacity and every frame is fixed; the
    /// pool is left unchanged and the caller may retry after unfixing.
    /// Fails with [`BufferError::Io`] when loading the page or writing
    /// back the eviction victim fails; a frame whose load failed is
    /// removed again, a victim whose write-back failed stays resident and
    /// dirty.
    pub fn fix(&self, page_id: PageId, exclusive: bool) -> Result<FixedPage<'_>> {
        loop {
            let mut inner = self.inner.lock();

            if let Some(frame) = inner.table.get(&page_id).cloned() {
                inner.stats.hits += 1;
                // reuse: leave FIFO for good, move to the LRU tail
                Self::unqueue(&mut inner, &frame);
                inner.lru.push_back(frame.clone());

                let fast = if exclusive {
                    frame
                        .try_lock_exclusive()
                        .map(|guard| FixedPage::exclusive(frame.clone(), guard))
                } else {
                    frame
                        .try_lock_shared()
                        .map(|guard| FixedPage::shared(frame.clone(), guard))
                };
                if let Some(page) = fast {
                    return Ok(page);
                }

                // contended: pin so eviction skips the frame, then block
                // for the latch outside the pool mutex
                frame.pin();
                drop(inner);
                let page = if exclusive {
                    FixedPage::exclusive(frame.clone(), frame.lock_exclusive())
                } else {
                    FixedPage::shared(frame.clone(), frame.lock_shared())
                };
                frame.unpin();
                if frame.is_defunct() {
                    // the frame left the pool while we waited
                    drop(page);
                    continue;
                }
                return Ok(page);
            }

            if inner.table.len() >= self.page_count {
                let (frame, mut guard, origin) = match Self::select_victim(&inner) {
                    Some(victim) => victim,
                    None => return Err(BufferError::BufferFull),
                };
                // unlink under the pool mutex so no new requester can reach
                // the victim, then flush with the mutex released
                Self::unqueue(&mut inner, &frame);
                inner.table.remove(&frame.page_id());
                drop(inner);

                let wrote_back = match frame.flush(&mut guard, self.store.as_ref()) {
                    Ok(wrote_back) => wrote_back,
                    Err(err) => {
                        // keep the dirty image: restore the victim at the
                        // head of its queue, unless a racing fix already
                        // reloaded the page from disk
                        let mut inner = self.inner.lock();
                        if !inner.table.contains_key(&frame.page_id()) {
                            inner.table.insert(frame.page_id(), frame.clone());
                            match origin {
                                VictimQueue::Fifo => inner.fifo.push_front(frame.clone()),
                                VictimQueue::Lru => inner.lru.push_front(frame.clone()),
                            }
                        }
                        return Err(err);
                    }
                };
                debug!(page_id = %frame.page_id(), wrote_back, "pool.evict");

                let mut inner = self.inner.lock();
                inner.stats.evictions += 1;
                if wrote_back {
                    inner.stats.dirty_writebacks += 1;
                }
                drop(inner);
                frame.mark_defunct();
                drop(guard);
                continue;
            }

            inner.stats.misses += 1;
            let frame = Arc::new(Frame::new(page_id, self.page_size));
            inner.table.insert(page_id, frame.clone());
            inner.fifo.push_back(frame.clone());
            let mut guard = frame
                .try_lock_exclusive()
                .expect("freshly created frame has no other latch holder");
            drop(inner);

            if let Err(err) = frame.materialise(&mut guard, self.store.as_ref()) {
                let mut inner = self.inner.lock();
                Self::unqueue(&mut inner, &frame);
                inner.table.remove(&page_id);
                drop(inner);
                frame.mark_defunct();
                return Err(err);
            }

            return Ok(if exclusive {
                FixedPage::exclusive(frame, guard)
            } else {
                FixedPage::shared(frame, ArcRwLockWriteGuard::downgrade(guard))
            });
        }
    }

    /// Releases the latch held by `page`. With `is_dirty` the page is
    /// marked dirty first, so it is written back before its frame is
    /// destroyed.
    ///
    /// # Panics
    ///
    /// Panics when `is_dirty` is passed for a shared fix.
    pub fn unfix(&self, mut page: FixedPage<'_>, is_dirty: bool) {
        if is_dirty {
            page.mark_dirty();
        }
    }

    /// Page ids currently in the FIFO queue, oldest first. Snapshots are
    /// meant for single-threaded inspection; concurrent fix/unfix calls
    /// reorder the queues underneath them.
    pub fn fifo_snapshot(&self) -> Vec<PageId> {
        self.inner.lock().fifo.iter().map(|f| f.page_id()).collect()
    }

    /// Page ids currently in the LRU queue, least recently used first.
    pub fn lru_snapshot(&self) -> Vec<PageId> {
        self.inner.lock().lru.iter().map(|f| f.page_id()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats.clone()
    }

    /// First frame, FIFO before LRU and oldest first within each queue,
    /// that is unpinned and whose exclusive latch is free. The try-lock is
    /// the "unfixed" oracle: any held latch makes it fail.
    fn select_victim(inner: &PoolInner) -> Option<(Arc<Frame>, ExclusiveGuard, VictimQueue)> {
        for (queue, origin) in [
            (&inner.fifo, VictimQueue::Fifo),
            (&inner.lru, VictimQueue::Lru),
        ] {
            for frame in queue {
                if frame.is_pinned() {
                    continue;
                }
                if let Some(guard) = frame.try_lock_exclusive() {
                    return Some((frame.clone(), guard, origin));
                }
            }
        }
        None
    }

    fn unqueue(inner: &mut PoolInner, frame: &Arc<Frame>) {
        if let Some(pos) = inner.fifo.iter().position(|f| Arc::ptr_eq(f, frame)) {
            inner.fifo.remove(pos);
        } else if let Some(pos) = inner.lru.iter().position(|f| Arc::ptr_eq(f, frame)) {
            inner.lru.remove(pos);
        }
    }
}

impl Drop for BufferPool {
    /// Writes every dirty frame back. Failures cannot propagate from a
    /// destructor and are logged instead; the frame keeps its dirty state.
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for frame in inner.table.values() {
            let mut guard = match frame.try_lock_exclusive() {
                Some(guard) => guard,
                None => {
                    warn!(page_id = %frame.page_id(), "pool.drop.frame_still_fixed");
                    continue;
                }
            };
            if let Err(err) = frame.flush(&mut guard, self.store.as_ref()) {
                warn!(page_id = %frame.page_id(), error = %err, "pool.drop.flush_failed");
            }
        }
    }
}
