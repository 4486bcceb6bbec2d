//! Fixed-capacity circular buffer for a dedicated producer and a dedicated consumer.
//!
//! `RingBuffer` is the single-owner form: both cursors live in the struct and every
//! operation takes `&mut self`, so exclusive access is checked by the compiler.
//! `RingBuffer::split` hands out a `RingProducer` and a `RingConsumer` for two threads.
//! Each half owns one cursor and only ever stores to it, so plain atomic loads and
//! stores are enough and no compare-and-swap is involved.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be a non-zero power of two, got {0}")]
    InvalidCapacity(usize),
}

pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    mask: u64,
    write: u64,
    read: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if !capacity.is_power_of_two() {
            return Err(RingBufferError::InvalidCapacity(capacity));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            mask: capacity as u64 - 1,
            write: 0,
            read: 0,
        })
    }

    /// Store `item`, handing it back untouched when the buffer is full
    pub fn try_write(&mut self, item: T) -> Result<(), T> {
        if self.write - self.read == self.capacity() as u64 {
            return Err(item);
        }
        let index = (self.write & self.mask) as usize;
        self.slots[index] = Some(item);
        self.write += 1;
        Ok(())
    }

    pub fn try_read(&mut self) -> Option<T> {
        if self.read == self.write {
            return None;
        }
        let index = (self.read & self.mask) as usize;
        let item = self.slots[index].take();
        self.read += 1;
        item
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        (self.write - self.read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Split into halves for one producer thread and one consumer thread
    ///
    /// Items already buffered stay in place and are read first.
    pub fn split(self) -> (RingProducer<T>, RingConsumer<T>) {
        let shared = Arc::new(Shared {
            slots: self
                .slots
                .into_vec()
                .into_iter()
                .map(UnsafeCell::new)
                .collect(),
            mask: self.mask,
            write: AtomicU64::new(self.write),
            read: AtomicU64::new(self.read),
        });
        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

struct Shared<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    mask: u64,
    write: AtomicU64,
    read: AtomicU64,
}

// Slot `i` is touched by the producer only while `write - read < capacity` and by the
// consumer only while `read < write`. The Release store of each cursor publishes the
// slot access that preceded it, so the two halves never alias a slot.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, cursor: u64) -> *mut Option<T> {
        self.slots[(cursor & self.mask) as usize].get()
    }
}

/// Writing half of a split `RingBuffer`
pub struct RingProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RingProducer<T> {
    pub fn try_write(&mut self, item: T) -> Result<(), T> {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        if write - read == self.shared.capacity() {
            return Err(item);
        }
        // SAFETY: the consumer has released this slot (read acquired above) and will
        // not touch it again until the store below publishes it.
        unsafe {
            *self.shared.slot(write) = Some(item);
        }
        self.shared.write.store(write + 1, Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        let read = self.shared.read.load(Ordering::Acquire);
        (self.shared.write.load(Ordering::Relaxed) - read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }
}

/// Reading half of a split `RingBuffer`
pub struct RingConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RingConsumer<T> {
    pub fn try_read(&mut self) -> Option<T> {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // SAFETY: the producer published this slot (write acquired above) and will not
        // reuse it until the store below releases it.
        let item = unsafe { (*self.shared.slot(read)).take() };
        self.shared.read.store(read + 1, Ordering::Release);
        item
    }

    pub fn len(&self) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        (write - self.shared.read.load(Ordering::Relaxed)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
