//! Size-classed pool of reusable byte buffers.
//!
//! Frame serialization, compression and decompression all need scratch
//! buffers whose sizes cluster around a few values. Instead of allocating a
//! fresh `Vec<u8>` for every frame, they [`take`](MemoryPool::take) one from a
//! shared pool and it returns to the pool when dropped.
//!
//! The pool is an ordinary value. Whoever assembles a cluster constructs it
//! and hands clones to the components that need it; clones share the same
//! buffers.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

// Largest class shift whose buffers a `Vec` can still hold.
const MAX_CLASS_SHIFT: u32 = usize::BITS - 2;

/// Shape of a [`MemoryPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// The smallest class holds buffers of `1 << min_class_shift` bytes.
    pub min_class_shift: u32,
    /// Number of power-of-two classes. Requests larger than the biggest
    /// class are allocated directly and never pooled.
    pub class_count: usize,
    /// A class already holding this many idle buffers drops returned ones.
    pub max_buffers_per_class: usize,
}

impl Default for PoolLimits {
    /// Classes from 1 KiB to 2 MiB, 32 idle buffers each.
    fn default() -> Self {
        Self {
            min_class_shift: 10,
            class_count: 12,
            max_buffers_per_class: 32,
        }
    }
}

/// Number of idle buffers per size class, smallest class first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub pooled: Vec<usize>,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.pooled.iter().sum()
    }
}

/// A shared, size-classed buffer pool. Cloning is cheap and shares buffers.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    limits: PoolLimits,
    classes: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(PoolLimits::default())
    }
}

impl MemoryPool {
    /// Creates a pool with the given shape. Limits asking for classes
    /// bigger than a `Vec` can hold are clamped: the shift to
    /// `usize::BITS - 2`, and the class count so that the biggest class
    /// stays within that bound.
    pub fn new(limits: PoolLimits) -> Self {
        let min_class_shift = limits.min_class_shift.min(MAX_CLASS_SHIFT);
        let limits = PoolLimits {
            min_class_shift,
            class_count: limits
                .class_count
                .min((MAX_CLASS_SHIFT - min_class_shift + 1) as usize),
            ..limits
        };
        let classes = (0..limits.class_count)
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            inner: Arc::new(PoolInner { limits, classes }),
        }
    }

    pub fn limits(&self) -> PoolLimits {
        self.inner.limits
    }

    /// Size of the biggest class; larger requests bypass the pool.
    pub fn max_pooled_size(&self) -> usize {
        match self.inner.limits.class_count {
            0 => 0,
            n => self.class_size(n - 1),
        }
    }

    fn class_size(&self, class: usize) -> usize {
        1 << (self.inner.limits.min_class_shift as usize + class)
    }

    /// Smallest class whose buffers can hold `size` bytes.
    fn class_for_request(&self, size: usize) -> Option<usize> {
        if self.inner.limits.class_count == 0 || size > self.max_pooled_size() {
            return None;
        }
        let min_size = self.class_size(0);
        let rounded = size.max(min_size).next_power_of_two();
        Some((rounded.trailing_zeros() - self.inner.limits.min_class_shift) as usize)
    }

    /// Biggest class whose size does not exceed `capacity`.
    fn class_for_capacity(&self, capacity: usize) -> Option<usize> {
        if self.inner.limits.class_count == 0 || capacity < self.class_size(0) {
            return None;
        }
        let log2 = (usize::BITS - 1 - capacity.leading_zeros()) as usize;
        let class = log2 - self.inner.limits.min_class_shift as usize;
        (class < self.inner.limits.class_count).then_some(class)
    }

    /// Returns an empty buffer with a capacity of at least `size` bytes.
    pub fn take(&self, size: usize) -> PooledBuffer {
        let buf = match self.class_for_request(size) {
            Some(class) => {
                let reused = self.inner.classes[class]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop();
                reused.unwrap_or_else(|| Vec::with_capacity(self.class_size(class)))
            }
            None => Vec::with_capacity(size),
        };
        PooledBuffer {
            buf,
            pool: self.clone(),
        }
    }

    /// Hands a buffer over to the pool. The buffer is kept only if its size
    /// class exists and is not full.
    pub fn give_back(&self, mut buf: Vec<u8>) {
        let Some(class) = self.class_for_capacity(buf.capacity()) else {
            return;
        };
        let mut idle = self.inner.classes[class]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.inner.limits.max_buffers_per_class {
            buf.clear();
            idle.push(buf);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pooled: self
                .inner
                .classes
                .iter()
                .map(|class| class.lock().unwrap_or_else(PoisonError::into_inner).len())
                .collect(),
        }
    }
}

/// A buffer borrowed from a [`MemoryPool`], given back when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: MemoryPool,
}

impl PooledBuffer {
    /// Detaches the buffer from the pool.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Freezes the contents into [`Bytes`]. The buffer goes back to the
    /// pool once the last clone of the returned `Bytes` is dropped.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from_owner(self)
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
