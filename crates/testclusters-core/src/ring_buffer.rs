//! Fixed-capacity ring buffer holding the last N log messages of a node.
//!
//! When full, a push evicts the oldest message. The most recent entry is
//! mutable so that continuation lines can be folded into the message they
//! belong to.

// =============================================================================
// RingBuffer
// =============================================================================

/// A fixed-capacity ring buffer.
pub struct RingBuffer<T> {
    buf: Vec<Option<T>>,
    capacity: usize,
    head: usize, // next write position
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items. A zero capacity is
    /// bumped to one so the buffer can always hold the latest message.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            capacity,
            head: 0,
            len: 0,
        }
    }

    /// Push an item, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.buf[self.head].replace(item);
        self.head = (self.head + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
            None
        } else {
            evicted
        }
    }

    fn back_index(&self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        Some(if self.head == 0 {
            self.capacity - 1
        } else {
            self.head - 1
        })
    }

    /// Most recently pushed item.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.back_index().and_then(|idx| self.buf[idx].as_ref())
    }

    /// Mutable access to the most recently pushed item.
    pub fn back_mut(&mut self) -> Option<&mut T> {
        let idx = self.back_index()?;
        self.buf[idx].as_mut()
    }

    fn start(&self) -> usize {
        if self.len < self.capacity {
            0
        } else {
            self.head
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the buffer into a Vec ordered oldest to newest.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<T> {
        let start = self.start();
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(item) = self.buf[(start + i) % self.capacity].take() {
                out.push(item);
            }
        }
        out
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}
