//! Bounded entry allocator.
//!
//! One contiguous pool of `entries x entry_size` byte slots (both powers of
//! two) serves every entry that fits a slot. Entries that do not fit, or that
//! arrive while the pool is exhausted, are served from the heap when heap
//! fallback is enabled; otherwise allocation fails and the producer drops
//! the entry.
//!
//! Free slots live on a lock-free stack linked by slot index. The head word
//! packs a 32-bit modification tag with the top index so a pop that raced a
//! pop-then-push of the same slot fails its CAS instead of corrupting the
//! list. Producers pop; the backend thread is the only one that pushes.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::error::AllocError;
use crate::queue::{Hook, Node};
use crate::rendezvous::SyncPoint;

const BLOCK_ALIGN: usize = 8;

/// Every block starts with this prefix; wire bytes follow it.
#[repr(C)]
struct BlockPrefix {
    hook: Hook,
    // total block bytes, prefix included
    capacity: u32,
    // encoded bytes after the prefix
    len: u32,
    sync: *const SyncPoint,
}

pub(crate) const BLOCK_PREFIX: usize = size_of::<BlockPrefix>();
const MIN_SLOT: usize = BLOCK_PREFIX + 4;

/// Exclusive lease on one block. Not returned automatically: the holder must
/// hand it to [`BoundedAllocator::deallocate`] or the block is leaked.
#[must_use]
pub(crate) struct Entry {
    block: NonNull<BlockPrefix>,
}

// The lease is exclusive, so moving it between threads is fine.
unsafe impl Send for Entry {}

impl Entry {
    fn prefix(&self) -> &BlockPrefix {
        // SAFETY: the prefix was initialized when the block was leased.
        unsafe { self.block.as_ref() }
    }

    fn prefix_mut(&mut self) -> &mut BlockPrefix {
        // SAFETY: as above, and the lease is exclusive.
        unsafe { self.block.as_mut() }
    }

    /// Bytes available for the encoded entry.
    pub fn capacity(&self) -> usize {
        self.prefix().capacity as usize - BLOCK_PREFIX
    }

    /// The whole writable area, regardless of the recorded length.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        let capacity = self.capacity();
        // SAFETY: blocks are zero-initialized on allocation and the area after
        // the prefix belongs to this lease.
        unsafe {
            let data = self.block.as_ptr().cast::<u8>().add(BLOCK_PREFIX);
            std::slice::from_raw_parts_mut(data, capacity)
        }
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.prefix_mut().len = len as u32;
    }

    /// The encoded bytes recorded by [`Entry::set_len`].
    pub fn payload(&self) -> &[u8] {
        let len = self.prefix().len as usize;
        // SAFETY: `len <= capacity` and the bytes are initialized.
        unsafe {
            let data = self.block.as_ptr().cast::<u8>().add(BLOCK_PREFIX);
            std::slice::from_raw_parts(data, len)
        }
    }

    pub fn attach_sync(&mut self, point: Arc<SyncPoint>) {
        drop(self.take_sync());
        self.prefix_mut().sync = Arc::into_raw(point);
    }

    pub fn take_sync(&mut self) -> Option<Arc<SyncPoint>> {
        let raw = std::mem::replace(&mut self.prefix_mut().sync, ptr::null());
        // SAFETY: a non-null pointer always comes from `Arc::into_raw` above.
        (!raw.is_null()).then(|| unsafe { Arc::from_raw(raw) })
    }
}

unsafe impl Node for Entry {
    fn into_hook(self) -> NonNull<Hook> {
        // `hook` is the first field of the `repr(C)` prefix.
        self.block.cast()
    }

    unsafe fn from_hook(hook: NonNull<Hook>) -> Self {
        Entry { block: hook.cast() }
    }
}

struct FreeList {
    // (tag << 32) | (index + 1); a zero low half means empty
    head: CachePadded<AtomicU64>,
    // next index + 1 for every slot, 0 terminates
    links: Box<[AtomicU32]>,
}

impl FreeList {
    fn full(entries: usize) -> Self {
        let links = (0..entries)
            .map(|i| AtomicU32::new(if i + 1 < entries { i as u32 + 2 } else { 0 }))
            .collect();
        let head = if entries > 0 { 1 } else { 0 };
        Self {
            head: CachePadded::new(AtomicU64::new(head)),
            links,
        }
    }

    #[inline]
    fn pack(tag: u64, link: u32) -> u64 {
        (tag.wrapping_add(1) << 32) | link as u64
    }

    fn pop(&self) -> Option<usize> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let top = head as u32;
            if top == 0 {
                return None;
            }
            let next = self.links[top as usize - 1].load(Ordering::Relaxed);
            let new = Self::pack(head >> 32, next);
            match self
                .head
                .compare_exchange_weak(head, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(top as usize - 1),
                Err(current) => head = current,
            }
        }
    }

    fn push(&self, index: usize) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            self.links[index].store(head as u32, Ordering::Relaxed);
            let new = Self::pack(head >> 32, index as u32 + 1);
            match self
                .head
                .compare_exchange_weak(head, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Walks the list. Only meaningful while nothing allocates concurrently.
    fn len(&self) -> usize {
        let mut count = 0;
        let mut link = self.head.load(Ordering::Acquire) as u32;
        while link != 0 && count < self.links.len() {
            count += 1;
            link = self.links[link as usize - 1].load(Ordering::Relaxed);
        }
        count
    }
}

struct Pool {
    base: NonNull<u8>,
    entries: usize,
    entry_size: usize,
    layout: Layout,
    free: FreeList,
}

impl Pool {
    fn contains(&self, addr: usize) -> bool {
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + self.layout.size()
    }

    fn lease(&self, index: usize) -> Entry {
        // SAFETY: `index < entries`, so the slot lies inside the pool, and
        // popping it from the free list made it exclusively ours.
        unsafe {
            let block = self.base.as_ptr().add(index * self.entry_size).cast::<BlockPrefix>();
            ptr::write(
                block,
                BlockPrefix {
                    hook: Hook::new(),
                    capacity: self.entry_size as u32,
                    len: 0,
                    sync: ptr::null(),
                },
            );
            Entry {
                block: NonNull::new_unchecked(block),
            }
        }
    }
}

/// Allocator counters, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub fixed_entries: usize,
    pub entry_size: usize,
    pub heap_allocations: u64,
}

pub(crate) struct BoundedAllocator {
    pool: Option<Pool>,
    use_heap: bool,
    heap_allocations: AtomicU64,
}

// The pool is only reached through exclusive `Entry` leases and atomics.
unsafe impl Send for BoundedAllocator {}
unsafe impl Sync for BoundedAllocator {}

impl BoundedAllocator {
    pub fn new(
        fixed_entries: usize,
        fixed_entry_size: usize,
        use_heap: bool,
    ) -> Result<Self, AllocError> {
        if fixed_entries == 0 {
            if !use_heap {
                return Err(AllocError::NoCapacity);
            }
            return Ok(Self {
                pool: None,
                use_heap,
                heap_allocations: AtomicU64::new(0),
            });
        }

        let entries = fixed_entries.next_power_of_two();
        let entry_size = fixed_entry_size.next_power_of_two();
        if entry_size < MIN_SLOT {
            return Err(AllocError::SlotTooSmall {
                entry_size,
                min: MIN_SLOT,
            });
        }
        let too_large = AllocError::PoolTooLarge {
            entries,
            entry_size,
        };
        if entries >= u32::MAX as usize || entry_size > u32::MAX as usize {
            return Err(too_large);
        }
        let bytes = entries.checked_mul(entry_size).ok_or(too_large.clone())?;
        let layout = Layout::from_size_align(bytes, BLOCK_ALIGN).map_err(|_| too_large)?;

        // SAFETY: the layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(AllocError::OutOfMemory { bytes })?;

        tracing::debug!(entries, entry_size, use_heap, "entry pool allocated");

        Ok(Self {
            pool: Some(Pool {
                base,
                entries,
                entry_size,
                layout,
                free: FreeList::full(entries),
            }),
            use_heap,
            heap_allocations: AtomicU64::new(0),
        })
    }

    /// Leases a block able to hold `size` encoded bytes, or `None` when the
    /// pool is exhausted (or too small) and heap fallback is off.
    #[inline]
    pub fn allocate(&self, size: usize) -> Option<Entry> {
        let total = size.checked_add(BLOCK_PREFIX)?;
        if let Some(pool) = &self.pool {
            if total <= pool.entry_size {
                if let Some(index) = pool.free.pop() {
                    return Some(pool.lease(index));
                }
            }
        }
        if self.use_heap {
            return self.allocate_heap(total);
        }
        None
    }

    #[cold]
    fn allocate_heap(&self, total: usize) -> Option<Entry> {
        if total > u32::MAX as usize {
            return None;
        }
        let layout = Layout::from_size_align(total, BLOCK_ALIGN).ok()?;
        // SAFETY: `total` includes the prefix, so the layout is non-empty.
        let block = NonNull::new(unsafe { alloc_zeroed(layout) })?.cast::<BlockPrefix>();
        // SAFETY: freshly allocated, sized and aligned for the prefix.
        unsafe {
            ptr::write(
                block.as_ptr(),
                BlockPrefix {
                    hook: Hook::new(),
                    capacity: total as u32,
                    len: 0,
                    sync: ptr::null(),
                },
            );
        }
        self.heap_allocations.fetch_add(1, Ordering::Relaxed);
        Some(Entry { block })
    }

    /// True if `entry` was not served from the fixed pool.
    pub fn is_heap(&self, entry: &Entry) -> bool {
        !self
            .pool
            .as_ref()
            .is_some_and(|pool| pool.contains(entry.block.as_ptr() as usize))
    }

    /// Ends a lease. Must only be called from the consumer thread.
    ///
    /// Returns false if a pool address is not slot-aligned, which means the
    /// lease was corrupted; debug builds panic instead.
    pub fn deallocate(&self, mut entry: Entry) -> bool {
        drop(entry.take_sync());

        let addr = entry.block.as_ptr() as usize;
        if let Some(pool) = &self.pool {
            if pool.contains(addr) {
                let offset = addr - pool.base.as_ptr() as usize;
                if offset % pool.entry_size != 0 {
                    tracing::error!(offset, entry_size = pool.entry_size, "misaligned pool free ignored");
                    debug_assert!(false, "misaligned pool free at offset {offset}");
                    return false;
                }
                pool.free.push(offset / pool.entry_size);
                return true;
            }
        }

        let capacity = entry.prefix().capacity as usize;
        match Layout::from_size_align(capacity, BLOCK_ALIGN) {
            Ok(layout) => {
                // SAFETY: heap blocks are allocated with exactly this layout.
                unsafe { dealloc(entry.block.as_ptr().cast(), layout) };
                true
            }
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            fixed_entries: self.pool.as_ref().map_or(0, |p| p.entries),
            entry_size: self.pool.as_ref().map_or(0, |p| p.entry_size),
            heap_allocations: self.heap_allocations.load(Ordering::Relaxed),
        }
    }

    /// Free fixed slots. Exact only while no producer is allocating.
    pub fn free_slots(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.free.len())
    }
}

impl Drop for BoundedAllocator {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            // SAFETY: allocated in `new` with this layout.
            unsafe { dealloc(pool.base.as_ptr(), pool.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_rounds_to_powers_of_two() {
        let alloc = BoundedAllocator::new(5, 100, false).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.fixed_entries, 8);
        assert_eq!(stats.entry_size, 128);
        assert_eq!(alloc.free_slots(), 8);
    }

    #[test]
    fn test_rejects_unusable_configs() {
        assert_eq!(
            BoundedAllocator::new(0, 64, false).err(),
            Some(AllocError::NoCapacity)
        );
        assert!(matches!(
            BoundedAllocator::new(4, 8, false),
            Err(AllocError::SlotTooSmall { .. })
        ));
        assert!(BoundedAllocator::new(0, 0, true).is_ok());
    }

    #[test]
    fn test_exhaustion_without_heap_returns_none() {
        let alloc = BoundedAllocator::new(4, 64, false).unwrap();
        let leased: Vec<_> = (0..4).map(|_| alloc.allocate(16).unwrap()).collect();
        assert!(alloc.allocate(16).is_none());
        for entry in leased {
            assert!(alloc.deallocate(entry));
        }
        // Too large for a slot and no heap.
        assert!(alloc.allocate(1024).is_none());
        assert_eq!(alloc.free_slots(), 4);
    }

    #[test]
    fn test_heap_fallback() {
        let alloc = BoundedAllocator::new(1, 64, true).unwrap();
        let a = alloc.allocate(8).unwrap();
        assert!(!alloc.is_heap(&a));
        let b = alloc.allocate(8).unwrap();
        assert!(alloc.is_heap(&b));
        let mut big = alloc.allocate(4096).unwrap();
        assert!(alloc.is_heap(&big));
        assert!(big.capacity() >= 4096);
        big.buffer_mut()[4095] = 7;
        assert_eq!(alloc.stats().heap_allocations, 2);
        assert!(alloc.deallocate(a));
        assert!(alloc.deallocate(b));
        assert!(alloc.deallocate(big));
        assert_eq!(alloc.free_slots(), 1);
    }

    #[test]
    fn test_payload_and_sync_round_trip() {
        let alloc = BoundedAllocator::new(2, 64, false).unwrap();
        let mut entry = alloc.allocate(5).unwrap();
        entry.buffer_mut()[..5].copy_from_slice(b"hello");
        entry.set_len(5);
        assert_eq!(entry.payload(), b"hello");

        let point = Arc::new(SyncPoint::new());
        entry.attach_sync(point.clone());
        assert_eq!(Arc::strong_count(&point), 2);
        let back = entry.take_sync().unwrap();
        assert!(Arc::ptr_eq(&back, &point));
        assert!(entry.take_sync().is_none());

        // A still-attached point is released on deallocate.
        entry.attach_sync(point.clone());
        drop(back);
        assert!(alloc.deallocate(entry));
        assert_eq!(Arc::strong_count(&point), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "misaligned")]
    fn test_misaligned_free_is_fatal_in_debug() {
        let alloc = BoundedAllocator::new(2, 64, false).unwrap();
        let entry = alloc.allocate(8).unwrap();
        // SAFETY: only the address is inspected before the assertion fires.
        let shifted = unsafe { NonNull::new_unchecked(entry.block.as_ptr().cast::<u8>().add(8)) };
        let _ = alloc.deallocate(Entry {
            block: shifted.cast(),
        });
    }

    #[test]
    fn test_no_double_issue_under_contention() {
        const SLOTS: usize = 64;
        const THREADS: usize = 4;
        const ROUNDS: usize = 20_000;

        let alloc = Arc::new(BoundedAllocator::new(SLOTS, 64, false).unwrap());
        let queue = Arc::new(crate::queue::MpscQueue::<Entry>::new());
        let done = Arc::new(AtomicBool::new(false));

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let alloc = alloc.clone();
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut pushed = 0;
                    while pushed < ROUNDS {
                        if let Some(mut entry) = alloc.allocate(16) {
                            let stamp = ((t as u64) << 32) | pushed as u64;
                            entry.buffer_mut()[..8].copy_from_slice(&stamp.to_le_bytes());
                            entry.set_len(8);
                            queue.push(entry);
                            pushed += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        let consumer_queue = queue.clone();
        let consumer_alloc = alloc.clone();
        let consumer_done = done.clone();
        let consumer = thread::spawn(move || {
            let mut consumer = consumer_queue.consumer().unwrap();
            let mut seen = HashSet::new();
            let mut total = 0;
            loop {
                // Read before popping: once set, every push is already visible.
                let finished = consumer_done.load(Ordering::Acquire);
                match consumer.pop() {
                    Some(entry) => {
                        let stamp = u64::from_le_bytes(entry.payload().try_into().unwrap());
                        // A slot issued twice would let a later stamp overwrite
                        // an unconsumed one, losing or duplicating values.
                        assert!(seen.insert(stamp), "stamp {stamp:#x} seen twice");
                        assert!(consumer_alloc.deallocate(entry));
                        total += 1;
                    }
                    None if finished => break,
                    None => std::hint::spin_loop(),
                }
            }
            (seen.len(), total)
        });

        for p in producers {
            p.join().unwrap();
        }
        done.store(true, Ordering::Release);
        let (unique, total) = consumer.join().unwrap();
        assert_eq!(total, THREADS * ROUNDS);
        assert_eq!(unique, THREADS * ROUNDS);
        assert_eq!(alloc.free_slots(), SLOTS);
    }
}
