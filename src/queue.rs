//! Intrusive multi-producer single-consumer queue.
//!
//! Producers publish a node by swapping it into `tail` and then linking the
//! previous tail to it, so `push` is wait-free and never allocates. Between
//! those two steps the list is briefly disconnected; the consumer observes
//! that window as [`Pop::Busy`], which means "a push is in flight, retry",
//! never "empty".
//!
//! Nodes come out in the order their tail swaps completed. Pushes from one
//! thread are therefore FIFO; pushes from different threads have no ordering
//! beyond that.
//!
//! A permanent stub node keeps the list non-empty so the consumer never has
//! to race producers on `tail` except when it drains the last node.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// Link embedded at the start of every node.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Hook {
    next: AtomicPtr<Hook>,
}

impl Hook {
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A value that can travel through the queue as a raw hook pointer.
///
/// # Safety
///
/// `into_hook` must hand out a pointer to a [`Hook`] that stays valid, and is
/// not touched by anything else, until the same pointer is passed to
/// `from_hook`. `from_hook` must rebuild exactly the value that was given up.
pub unsafe trait Node: Sized {
    fn into_hook(self) -> NonNull<Hook>;

    /// # Safety
    ///
    /// `hook` must come from `into_hook` of this type and be used only once.
    unsafe fn from_hook(hook: NonNull<Hook>) -> Self;
}

/// Heap node carrying an arbitrary value.
#[repr(C)]
pub struct BoxedNode<T> {
    hook: Hook,
    value: T,
}

impl<T> BoxedNode<T> {
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self {
            hook: Hook::new(),
            value,
        })
    }

    pub fn into_inner(self: Box<Self>) -> T {
        self.value
    }
}

unsafe impl<T> Node for Box<BoxedNode<T>> {
    fn into_hook(self) -> NonNull<Hook> {
        // `hook` is the first field of a `repr(C)` struct.
        NonNull::from(Box::leak(self)).cast()
    }

    unsafe fn from_hook(hook: NonNull<Hook>) -> Self {
        Box::from_raw(hook.as_ptr().cast::<BoxedNode<T>>())
    }
}

/// Result of a single poll.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    Empty,
    /// A producer has swapped the tail but not linked it yet.
    Busy,
}

pub struct MpscQueue<N: Node> {
    tail: CachePadded<AtomicPtr<Hook>>,
    // Only touched by the holder of the `Consumer`.
    head: CachePadded<UnsafeCell<*mut Hook>>,
    stub: NonNull<Hook>,
    consumer_taken: AtomicBool,
    _nodes: PhantomData<N>,
}

// Nodes are moved between threads; the raw pointers are owned by the queue.
unsafe impl<N: Node + Send> Send for MpscQueue<N> {}
unsafe impl<N: Node + Send> Sync for MpscQueue<N> {}

impl<N: Node> MpscQueue<N> {
    pub fn new() -> Self {
        let stub = NonNull::from(Box::leak(Box::new(Hook::new())));
        Self {
            tail: CachePadded::new(AtomicPtr::new(stub.as_ptr())),
            head: CachePadded::new(UnsafeCell::new(stub.as_ptr())),
            stub,
            consumer_taken: AtomicBool::new(false),
            _nodes: PhantomData,
        }
    }

    /// Publishes `node`. Callable from any number of threads.
    #[inline]
    pub fn push(&self, node: N) {
        self.push_hook(node.into_hook());
    }

    #[inline]
    fn push_hook(&self, hook: NonNull<Hook>) {
        let hook = hook.as_ptr();
        // SAFETY: the hook is exclusively ours until the swap publishes it.
        unsafe { (*hook).next.store(ptr::null_mut(), Ordering::Relaxed) };
        let prev = self.tail.swap(hook, Ordering::AcqRel);
        // SAFETY: the consumer only releases a node after observing its
        // `next` link, and only this thread writes `prev.next`, so `prev` is
        // still alive here.
        unsafe { (*prev).next.store(hook, Ordering::Release) };
    }

    /// Claims the consumer side. Returns `None` while another `Consumer` for
    /// this queue is alive.
    pub fn consumer(&self) -> Option<Consumer<'_, N>> {
        self.consumer_taken
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        Some(Consumer {
            queue: self,
            _not_sync: PhantomData,
        })
    }

    /// # Safety
    ///
    /// The caller must be the only thread popping (it holds the `Consumer`
    /// or has `&mut self`).
    unsafe fn pop_hook(&self) -> Pop<NonNull<Hook>> {
        let stub = self.stub.as_ptr();
        let head_slot = self.head.get();
        let mut head = *head_slot;
        let mut next = (*head).next.load(Ordering::Acquire);

        if head == stub {
            if next.is_null() {
                return if self.tail.load(Ordering::Acquire) == stub {
                    Pop::Empty
                } else {
                    Pop::Busy
                };
            }
            *head_slot = next;
            head = next;
            next = (*next).next.load(Ordering::Acquire);
        }

        if !next.is_null() {
            *head_slot = next;
            return Pop::Item(NonNull::new_unchecked(head));
        }

        if self.tail.load(Ordering::Acquire) != head {
            return Pop::Busy;
        }

        // `head` is the last node: put the stub behind it so it can be released.
        self.push_hook(self.stub);
        next = (*head).next.load(Ordering::Acquire);
        if !next.is_null() {
            *head_slot = next;
            return Pop::Item(NonNull::new_unchecked(head));
        }
        Pop::Busy
    }
}

impl<N: Node> Default for MpscQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Node> Drop for MpscQueue<N> {
    fn drop(&mut self) {
        loop {
            // SAFETY: `&mut self` excludes every producer and consumer.
            match unsafe { self.pop_hook() } {
                Pop::Item(hook) => drop(unsafe { N::from_hook(hook) }),
                Pop::Empty | Pop::Busy => break,
            }
        }
        // SAFETY: the stub came from `Box::leak` in `new` and is no longer linked.
        unsafe { drop(Box::from_raw(self.stub.as_ptr())) };
    }
}

/// The single consumer endpoint of an [`MpscQueue`]. Not `Sync`: exactly one
/// thread can pop through it at a time.
pub struct Consumer<'a, N: Node> {
    queue: &'a MpscQueue<N>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<N: Node> Consumer<'_, N> {
    /// Polls once.
    #[inline]
    pub fn try_pop(&mut self) -> Pop<N> {
        // SAFETY: holding the consumer grants exclusive pop access.
        match unsafe { self.queue.pop_hook() } {
            Pop::Item(hook) => Pop::Item(unsafe { N::from_hook(hook) }),
            Pop::Empty => Pop::Empty,
            Pop::Busy => Pop::Busy,
        }
    }

    /// Pops the next node, spinning through in-flight pushes. Returns `None`
    /// only when the queue is really empty.
    pub fn pop(&mut self) -> Option<N> {
        let backoff = Backoff::new();
        loop {
            match self.try_pop() {
                Pop::Item(node) => return Some(node),
                Pop::Empty => return None,
                Pop::Busy => backoff.snooze(),
            }
        }
    }
}

impl<N: Node> Drop for Consumer<'_, N> {
    fn drop(&mut self) {
        self.queue.consumer_taken.store(false, Ordering::Release);
    }
}
