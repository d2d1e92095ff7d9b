//! Segmented node storage addressed by stable `NodeIdx` handles.
//!
//! Segment `k` holds `FIRST_SEGMENT_LEN << k` nodes and is allocated the first time an index
//! inside it is handed out. Segments are never moved or released before the arena is dropped,
//! so a `&Node` obtained from an index stays valid for the arena's whole life. Reclaimed slots
//! are recycled through a free list.
//!
use spin_lock::{SpinLock, SpinLockGuard};
use util::WrappedAlign64Type;
use std::cell::UnsafeCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::process;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Comparison key of a node.
pub type Key = i64;

/// Stable handle of a node inside a `NodeArena`.
pub type NodeIdx = usize;

/// The "no successor" handle.
pub const NIL: NodeIdx = ::std::usize::MAX;

cfg_if! {
    if #[cfg(feature = "arena_segments_32")] {
        pub const SEGMENT_COUNT: usize = 32;
    } else if #[cfg(feature = "arena_segments_16")] {
        pub const SEGMENT_COUNT: usize = 16;
    } else {
        /// Number of segments an arena may grow to
        pub const SEGMENT_COUNT: usize = 24;
    }
}

const FIRST_SEGMENT_SHIFT: usize = 6;
const FIRST_SEGMENT_LEN: usize = 1 << FIRST_SEGMENT_SHIFT;

/// Maximum number of nodes (sentinel included) one arena can hold.
pub const MAX_NODE_COUNT: usize = (FIRST_SEGMENT_LEN << SEGMENT_COUNT) - FIRST_SEGMENT_LEN;

/// Fields of a node. All of them are guarded by the owning node's lock.
pub struct NodeInner<V> {
    pub key: Key,
    pub payload: Option<V>,
    pub next: NodeIdx,
}

/// One list node: a spin lock and the fields it guards.
///
/// `inner` may only be read or written through a `NodeGuard`, i.e. while `lock` is held, or by
/// the arena while the slot is unreachable (freshly allocated or being reclaimed).
pub struct Node<V> {
    lock: SpinLock,
    inner: UnsafeCell<NodeInner<V>>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Node {
            lock: SpinLock::default(),
            inner: UnsafeCell::new(NodeInner {
                key: 0,
                payload: None,
                next: NIL,
            }),
        }
    }
}

/// A locked node. Dereferences to the node's fields and unlocks when dropped.
pub struct NodeGuard<'a, V: 'a> {
    idx: NodeIdx,
    node: &'a Node<V>,
    _guard: SpinLockGuard<'a>,
}

impl<'a, V> NodeGuard<'a, V> {
    #[inline]
    pub fn idx(&self) -> NodeIdx {
        self.idx
    }
}

impl<'a, V> Deref for NodeGuard<'a, V> {
    type Target = NodeInner<V>;

    fn deref(&self) -> &NodeInner<V> {
        unsafe { &*self.node.inner.get() }
    }
}

impl<'a, V> DerefMut for NodeGuard<'a, V> {
    fn deref_mut(&mut self) -> &mut NodeInner<V> {
        unsafe { &mut *self.node.inner.get() }
    }
}

pub struct NodeArena<V> {
    segments: Box<[AtomicPtr<Node<V>>]>,
    high_water: WrappedAlign64Type<AtomicUsize>,
    live: WrappedAlign64Type<AtomicUsize>,
    free_lock: WrappedAlign64Type<SpinLock>,
    free_list: UnsafeCell<Vec<NodeIdx>>,
}

unsafe impl<V: Send> Send for NodeArena<V> {}

unsafe impl<V: Send> Sync for NodeArena<V> {}

#[inline]
fn segment_len(seg: usize) -> usize {
    FIRST_SEGMENT_LEN << seg
}

/// Split an index into (segment, offset inside the segment).
#[inline]
fn position(idx: NodeIdx) -> (usize, usize) {
    let i = idx + FIRST_SEGMENT_LEN;
    let bit = mem::size_of::<usize>() * 8 - 1 - i.leading_zeros() as usize;
    (bit - FIRST_SEGMENT_SHIFT, i - (1 << bit))
}

impl<V> Default for NodeArena<V> {
    fn default() -> Self {
        NodeArena::new()
    }
}

impl<V> NodeArena<V> {
    pub fn new() -> NodeArena<V> {
        NodeArena {
            segments: (0..SEGMENT_COUNT)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            high_water: WrappedAlign64Type(AtomicUsize::new(0)),
            live: WrappedAlign64Type(AtomicUsize::new(0)),
            free_lock: WrappedAlign64Type(SpinLock::default()),
            free_list: UnsafeCell::new(Vec::new()),
        }
    }

    /// Number of allocated, not yet reclaimed nodes.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Number of node slots backed by memory.
    pub fn capacity(&self) -> usize {
        self.segments
            .iter()
            .enumerate()
            .filter(|&(_, s)| !s.load(Ordering::Relaxed).is_null())
            .map(|(seg, _)| segment_len(seg))
            .sum()
    }

    /// Node behind `idx`. `idx` must have been returned by `alloc`.
    #[inline]
    pub fn get(&self, idx: NodeIdx) -> &Node<V> {
        let (seg, offset) = position(idx);
        let base = self.segments[seg].load(Ordering::Acquire);
        assert!(!base.is_null(), "node {} is not backed by a segment", idx);
        unsafe { &*base.add(offset) }
    }

    /// Lock the node behind `idx`, blocking until the lock is free.
    #[inline]
    pub fn lock(&self, idx: NodeIdx) -> NodeGuard<V> {
        let node = self.get(idx);
        NodeGuard {
            idx,
            node,
            _guard: node.lock.lock_guard(),
        }
    }

    /// Take a slot and fill it. The new node is unlocked and unreachable until the caller links
    /// it. Running out of slots aborts the process, like a failed allocation.
    pub fn alloc(&self, key: Key, payload: Option<V>, next: NodeIdx) -> NodeIdx {
        let idx = match self.pop_free() {
            Some(idx) => idx,
            None => {
                let idx = self.high_water.fetch_add(1, Ordering::Relaxed);
                if idx >= MAX_NODE_COUNT {
                    error!("node arena exhausted, max_node_count={}", MAX_NODE_COUNT);
                    process::abort();
                }
                self.ensure_segment(position(idx).0);
                idx
            }
        };
        let node = self.get(idx);
        debug_assert!(!node.lock.is_locked());
        unsafe {
            *node.inner.get() = NodeInner { key, payload, next };
        }
        self.live.fetch_add(1, Ordering::Relaxed);
        idx
    }

    /// Return a slot to the free list and hand back its payload.
    ///
    /// # Safety
    ///
    /// `idx` must be unlinked from every chain, unlocked, and unreachable by any thread: no one
    /// may hold or be about to acquire its lock.
    pub unsafe fn reclaim(&self, idx: NodeIdx) -> Option<V> {
        let inner = &mut *self.get(idx).inner.get();
        let payload = inner.payload.take();
        inner.next = NIL;
        self.live.fetch_sub(1, Ordering::Relaxed);
        let _g = self.free_lock.lock_guard();
        (*self.free_list.get()).push(idx);
        payload
    }

    fn pop_free(&self) -> Option<NodeIdx> {
        let _g = self.free_lock.lock_guard();
        unsafe { (*self.free_list.get()).pop() }
    }

    fn ensure_segment(&self, seg: usize) {
        if !self.segments[seg].load(Ordering::Acquire).is_null() {
            return;
        }
        let len = segment_len(seg);
        let fresh = (0..len)
            .map(|_| Node::default())
            .collect::<Vec<Node<V>>>()
            .into_boxed_slice();
        let fresh = Box::into_raw(fresh) as *mut Node<V>;
        if self.segments[seg]
            .compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // another thread installed it first
            unsafe { drop(Box::from_raw(slice::from_raw_parts_mut(fresh, len))) };
        } else {
            debug!("node arena segment {} allocated, len={}", seg, len);
        }
    }
}

impl<V> Drop for NodeArena<V> {
    fn drop(&mut self) {
        for (seg, s) in self.segments.iter().enumerate() {
            let base = s.swap(ptr::null_mut(), Ordering::AcqRel);
            if !base.is_null() {
                unsafe {
                    drop(Box::from_raw(slice::from_raw_parts_mut(
                        base,
                        segment_len(seg),
                    )))
                };
            }
        }
    }
}
