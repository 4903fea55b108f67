//! Device memory primitives.
//!
//! Kernels share state exclusively through these types. Every operation is a
//! single atomic access, so any number of invocations may hit the same memory
//! concurrently. Plain loads and stores are relaxed; visibility between
//! dispatches comes from the dispatch boundary itself.

use std::{
    fmt,
    marker::PhantomData,
    mem::{align_of, size_of},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use bytemuck::Pod;
use vizcull_types::DispatchIndirectStruct;

use crate::util::math::round_up_div;

fn zeroed_words(count: usize) -> Box<[AtomicU32]> {
    (0..count).map(|_| AtomicU32::new(0)).collect()
}

/// A counter with a fixed capacity that never counts past it.
pub struct AtomicCounter {
    value: AtomicU32,
    capacity: u32,
}

impl AtomicCounter {
    pub fn new(capacity: u32) -> Self {
        Self {
            value: AtomicU32::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// Reserves one slot. Returns the slot, or `None` once the counter reached capacity.
    pub fn saturating_increment(&self) -> Option<u32> {
        self.saturating_add(1)
    }

    /// Reserves `count` contiguous slots. Returns the first slot, or `None`
    /// if the whole range does not fit. A failed reservation changes nothing.
    pub fn saturating_add(&self, count: u32) -> Option<u32> {
        self.saturating_add_within(count, self.capacity)
    }

    /// Like [`AtomicCounter::saturating_add`] with the capacity lowered to `limit`.
    pub fn saturating_add_within(&self, count: u32, limit: u32) -> Option<u32> {
        let capacity = self.capacity.min(limit);
        self.value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(count).filter(|&end| end <= capacity)
            })
            .ok()
    }

    /// Unbounded add, used where the caller bounds the total.
    pub fn fetch_add(&self, count: u32, ordering: Ordering) -> u32 {
        self.value.fetch_add(count, ordering)
    }
}

impl fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicCounter")
            .field("value", &self.load())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Indirect dispatch arguments that kernels grow while they append work.
#[derive(Default)]
pub struct IndirectDispatchArgs {
    x: AtomicU32,
    y: AtomicU32,
    z: AtomicU32,
}

impl IndirectDispatchArgs {
    pub fn new(value: DispatchIndirectStruct) -> Self {
        let args = Self::default();
        args.reset(value);
        args
    }

    pub fn reset(&self, value: DispatchIndirectStruct) {
        self.x.store(value.x, Ordering::Relaxed);
        self.y.store(value.y, Ordering::Relaxed);
        self.z.store(value.z, Ordering::Relaxed);
    }

    pub fn load(&self) -> DispatchIndirectStruct {
        DispatchIndirectStruct {
            x: self.x.load(Ordering::Relaxed),
            y: self.y.load(Ordering::Relaxed),
            z: self.z.load(Ordering::Relaxed),
        }
    }

    pub fn add_x(&self, workgroups: u32) {
        self.x.fetch_add(workgroups, Ordering::Relaxed);
    }

    pub fn max_x(&self, workgroups: u32) {
        self.x.fetch_max(workgroups, Ordering::Relaxed);
    }
}

impl fmt::Debug for IndirectDispatchArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load().fmt(f)
    }
}

/// A fixed size set of bits.
pub struct AtomicBitfield {
    words: Box<[AtomicU32]>,
    bits: u32,
}

impl AtomicBitfield {
    pub fn new(bits: u32) -> Self {
        Self {
            words: zeroed_words(round_up_div(bits as usize, 32)),
            bits,
        }
    }

    pub fn len(&self) -> u32 {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Sets the bit. Returns true if this call flipped it from zero to one.
    /// Out of range bits are ignored and report false.
    pub fn set(&self, bit: u32) -> bool {
        if bit >= self.bits {
            return false;
        }
        let mask = 1 << (bit % 32);
        let previous = self.words[(bit / 32) as usize].fetch_or(mask, Ordering::Relaxed);
        previous & mask == 0
    }

    pub fn get(&self, bit: u32) -> bool {
        if bit >= self.bits {
            return false;
        }
        self.words[(bit / 32) as usize].load(Ordering::Relaxed) & (1 << (bit % 32)) != 0
    }

    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.load(Ordering::Relaxed).count_ones()).sum()
    }
}

/// A word addressed arena: a bump allocated array of bit words.
///
/// Callers reserve runs of words with [`AtomicWordArena::allocate`] and then
/// address bits relative to the returned offset.
pub struct AtomicWordArena {
    words: Box<[AtomicU32]>,
    allocated: AtomicCounter,
}

impl AtomicWordArena {
    pub fn new(words: u32) -> Self {
        Self {
            words: zeroed_words(words as usize),
            allocated: AtomicCounter::new(words),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.allocated.capacity()
    }

    pub fn allocated(&self) -> u32 {
        self.allocated.load()
    }

    /// Reserves `count` zeroed words, `None` if the arena is full.
    pub fn allocate(&self, count: u32) -> Option<u32> {
        self.allocated.saturating_add(count)
    }

    fn word(&self, offset: u32, bit: u32) -> Option<&AtomicU32> {
        let index = offset.checked_add(bit / 32)?;
        self.words.get(index as usize)
    }

    /// Sets bit `bit` of the run starting at `offset`. Returns true if this call flipped it.
    pub fn set(&self, offset: u32, bit: u32) -> bool {
        let mask = 1 << (bit % 32);
        match self.word(offset, bit) {
            Some(word) => word.fetch_or(mask, Ordering::Relaxed) & mask == 0,
            None => false,
        }
    }

    pub fn get(&self, offset: u32, bit: u32) -> bool {
        self.word(offset, bit).map_or(false, |word| word.load(Ordering::Relaxed) & (1 << (bit % 32)) != 0)
    }

    /// Zeroes the allocated words and releases them.
    pub fn clear(&self) {
        let used = (self.allocated() as usize).min(self.words.len());
        for word in &self.words[..used] {
            word.store(0, Ordering::Relaxed);
        }
        self.allocated.reset();
    }
}

/// A fixed length array of plain-old-data records in device memory.
///
/// Records are stored as individual words, so concurrent writers of
/// distinct slots never conflict.
pub struct AtomicArray<T> {
    words: Box<[AtomicU32]>,
    len: u32,
    _phantom: PhantomData<T>,
}

impl<T: Pod> AtomicArray<T> {
    const WORDS: usize = {
        assert!(size_of::<T>() % 4 == 0 && align_of::<T>() >= 4);
        size_of::<T>() / 4
    };

    pub fn new(len: u32) -> Self {
        Self {
            words: zeroed_words(len as usize * Self::WORDS),
            len,
            _phantom: PhantomData,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn record(&self, index: u32) -> Option<&[AtomicU32]> {
        let start = index as usize * Self::WORDS;
        self.words.get(start..start + Self::WORDS)
    }

    /// Reads a record. Out of range reads yield zeroed records.
    pub fn load(&self, index: u32) -> T {
        let mut value = T::zeroed();
        if let Some(words) = self.record(index) {
            for (bytes, word) in bytemuck::bytes_of_mut(&mut value).chunks_exact_mut(4).zip(words) {
                bytes.copy_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
            }
        }
        value
    }

    /// Writes a record. Out of range writes are dropped.
    pub fn store(&self, index: u32, value: T) {
        if let Some(words) = self.record(index) {
            for (bytes, word) in bytemuck::bytes_of(&value).chunks_exact(4).zip(words) {
                let mut raw = [0; 4];
                raw.copy_from_slice(bytes);
                word.store(u32::from_ne_bytes(raw), Ordering::Relaxed);
            }
        }
    }

    /// Copies the first `count` records out.
    pub fn read_to_vec(&self, count: u32) -> Vec<T> {
        (0..count.min(self.len)).map(|i| self.load(i)).collect()
    }

    pub fn fill(&self, value: T) {
        for index in 0..self.len {
            self.store(index, value);
        }
    }
}

/// 64-bit device words, for merged counters.
pub struct AtomicU64Cell(AtomicU64);

impl AtomicU64Cell {
    pub fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn store(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed)
    }

    pub fn fetch_add(&self, value: u64) -> u64 {
        self.0.fetch_add(value, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::{Pod, Zeroable};
    use rayon::prelude::*;

    use super::*;

    #[repr(C)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
    struct Pair {
        a: u32,
        b: u32,
    }

    #[test]
    fn counter_saturates_under_contention() {
        let counter = AtomicCounter::new(1000);
        let granted: u32 = (0..10_000)
            .into_par_iter()
            .map(|_| counter.saturating_increment().is_some() as u32)
            .sum();
        assert_eq!(granted, 1000);
        assert_eq!(counter.load(), 1000);
    }

    #[test]
    fn counter_range_reservation() {
        let counter = AtomicCounter::new(10);
        assert_eq!(counter.saturating_add(4), Some(0));
        assert_eq!(counter.saturating_add(7), None);
        assert_eq!(counter.saturating_add(6), Some(4));
        assert_eq!(counter.saturating_increment(), None);
        assert_eq!(counter.load(), 10);
    }

    #[test]
    fn bitfield_reports_first_setter() {
        let bits = AtomicBitfield::new(100);
        let winners: u32 = (0..1000)
            .into_par_iter()
            .map(|i| bits.set(i % 100) as u32)
            .sum();
        assert_eq!(winners, 100);
        assert_eq!(bits.count_ones(), 100);
        assert!(!bits.set(100));
        assert!(!bits.get(100));
        bits.clear();
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn arena_runs() {
        let arena = AtomicWordArena::new(4);
        let a = arena.allocate(2).unwrap();
        let b = arena.allocate(2).unwrap();
        assert_eq!(arena.allocate(1), None);
        assert!(arena.set(b, 33));
        assert!(!arena.set(b, 33));
        assert!(arena.get(b, 33));
        assert!(!arena.get(a, 33));
        arena.clear();
        assert_eq!(arena.allocated(), 0);
        assert!(!arena.get(b, 33));
    }

    #[test]
    fn array_records() {
        let array = AtomicArray::<Pair>::new(3);
        array.store(1, Pair { a: 7, b: u32::MAX });
        array.store(5, Pair { a: 1, b: 1 });
        assert_eq!(array.load(1), Pair { a: 7, b: u32::MAX });
        assert_eq!(array.load(5), Pair::zeroed());
        assert_eq!(array.read_to_vec(10).len(), 3);
    }

    #[test]
    fn dispatch_args() {
        let args = IndirectDispatchArgs::new(DispatchIndirectStruct::CLEAR);
        args.add_x(3);
        args.max_x(2);
        assert_eq!(args.load(), DispatchIndirectStruct::new(3, 1, 1));
        args.max_x(9);
        assert_eq!(args.load().x, 9);
    }
}
