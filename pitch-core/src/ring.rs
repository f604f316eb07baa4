//! # Sample Ring Module
//!
//! Single-producer/single-consumer circular buffer of `f32` samples used to
//! hand audio from the delivery callback to a separate analysis context.
//!
//! ## Properties
//! - Capacity rounded up to a power of two, indexed by masking
//! - Unbounded cursors; `write - read` is the number of buffered samples
//! - No locks, no blocking, no allocation after construction
//! - Overrun drops the incoming samples, never unread ones

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Lock-free SPSC ring of audio samples.
///
/// Share it between the two contexts through an `Arc`. Exactly one context may
/// call [`write`](Self::write) and [`reset`](Self::reset), and exactly one
/// other context may call [`read`](Self::read).
#[derive(Debug)]
pub struct SampleRing {
    // Samples stored as raw bits so both sides can touch the slots safely.
    // Visibility is established through the cursor acquire/release pairs.
    slots: Box<[AtomicU32]>,
    capacity: usize,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    dropped: AtomicUsize,
}

impl SampleRing {
    /// Creates a ring holding at least `requested_capacity` samples.
    ///
    /// A request of zero yields a ring of capacity one.
    pub fn new(requested_capacity: usize) -> Self {
        let capacity = requested_capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            slots,
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Usable capacity: the requested capacity rounded up to a power of two.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copies as many of `samples` as fit. Returns the number written.
    ///
    /// Samples that do not fit are discarded and counted in [`dropped`](Self::dropped).
    pub fn write(&self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity - write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(free);

        for (offset, sample) in samples[..to_write].iter().enumerate() {
            let index = write_pos.wrapping_add(offset) & self.mask;
            self.slots[index].store(sample.to_bits(), Ordering::Relaxed);
        }

        if to_write < samples.len() {
            self.dropped.fetch_add(samples.len() - to_write, Ordering::Relaxed);
        }
        if to_write > 0 {
            self.write_pos
                .store(write_pos.wrapping_add(to_write), Ordering::Release);
        }
        to_write
    }

    /// Copies up to `dst.len()` of the oldest unread samples. Returns the number read.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let available = write_pos.wrapping_sub(read_pos);
        let to_read = dst.len().min(available);

        for (offset, sample) in dst[..to_read].iter_mut().enumerate() {
            let index = read_pos.wrapping_add(offset) & self.mask;
            *sample = f32::from_bits(self.slots[index].load(Ordering::Relaxed));
        }

        if to_read > 0 {
            self.read_pos
                .store(read_pos.wrapping_add(to_read), Ordering::Release);
        }
        to_read
    }

    /// Discards all unread samples.
    pub fn reset(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Samples waiting to be read.
    ///
    /// Safe to call from any thread. The read cursor is loaded first: it never
    /// passes the write cursor, so a later load of the write cursor is never
    /// behind it.
    pub fn available(&self) -> usize {
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let write_pos = self.write_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos).min(self.capacity)
    }

    /// Samples that can be written without dropping.
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Total samples discarded by overruns since creation.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the overrun count and restarts it from zero.
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}
