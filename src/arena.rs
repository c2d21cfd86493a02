//! Bump-pointer arena backing the price and cash-flow matrices.
//!
//! One contiguous, pre-sized byte region with a cursor that only moves
//! forward. Typed views are handed out as `&mut [T]` for plain-old-data `T`,
//! so nothing stored here ever needs a destructor and `reset()` can simply
//! rewind the cursor.

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use bytemuck::Pod;

use crate::error::{LsmError, Result};
use crate::params::Simulation;

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct CacheLine([u8; 64]);

const LINE_BYTES: usize = size_of::<CacheLine>();

/// Single-threaded bump allocator over a fixed-capacity buffer.
///
/// Allocation goes through `&self` and returns disjoint mutable slices, so a
/// pricer can hold the price matrix, the cash-flow matrix and the working
/// vectors at the same time. `reset` takes `&mut self`, which proves that no
/// slice from a previous call is still alive.
///
/// The arena is `Send` but not `Sync`: two threads can never allocate from
/// the same instance concurrently. Slices it hands out are ordinary
/// `&mut [T]` and may be split across worker threads.
pub struct Arena {
    lines: Box<[UnsafeCell<CacheLine>]>,
    capacity: usize,
    offset: Cell<usize>,
}

impl Arena {
    /// Creates an arena able to hold `capacity` bytes. The backing memory is
    /// zeroed once here and never again.
    ///
    /// Fails with `OutOfMemory` when the backing buffer cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self> {
        let num_lines = capacity.div_ceil(LINE_BYTES);
        let mut lines = Vec::new();
        lines
            .try_reserve_exact(num_lines)
            .map_err(|_| LsmError::OutOfMemory {
                requested: capacity,
                remaining: 0,
            })?;
        lines.extend((0..num_lines).map(|_| UnsafeCell::new(CacheLine([0; LINE_BYTES]))));
        Ok(Self {
            lines: lines.into_boxed_slice(),
            capacity,
            offset: Cell::new(0),
        })
    }

    /// Creates an arena sized for one pricing call with `sim`'s dimensions.
    pub fn for_simulation(sim: &Simulation) -> Result<Self> {
        Self::new(sim.recommended_arena_bytes())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed since the last reset, alignment padding included.
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.lines.as_ptr()).cast::<u8>()
    }

    /// Reserves `size` bytes whose address is a multiple of `align`.
    ///
    /// Fails with `OutOfMemory` when the padded request does not fit, and
    /// with `InvalidArgument` when `align` is not a power of two. A failed
    /// request leaves the cursor untouched.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(LsmError::InvalidArgument(format!(
                "alignment {align} is not a power of two"
            )));
        }

        let offset = self.offset.get();
        let remaining = self.capacity - offset;
        let cursor = self.base() as usize + offset;
        let padding = cursor.wrapping_neg() & (align - 1);

        let requested = padding.checked_add(size).ok_or(LsmError::OutOfMemory {
            requested: usize::MAX,
            remaining,
        })?;
        if requested > remaining {
            return Err(LsmError::OutOfMemory {
                requested,
                remaining,
            });
        }
        self.offset.set(offset + requested);

        // SAFETY: `offset + padding + size <= capacity`, which lies inside
        // the boxed line buffer, so the pointer stays in bounds.
        let ptr = unsafe { self.base().add(offset + padding) };
        NonNull::new(ptr).ok_or(LsmError::OutOfMemory {
            requested,
            remaining,
        })
    }

    /// Allocates a typed slice of `len` elements. Its contents are whatever
    /// the region last held: zero on a fresh arena, stale data after a reset.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Pod>(&self, len: usize) -> Result<&mut [T]> {
        let size = size_of::<T>()
            .checked_mul(len)
            .ok_or(LsmError::OutOfMemory {
                requested: usize::MAX,
                remaining: self.remaining(),
            })?;
        let ptr = self.allocate(size, align_of::<T>())?;

        // SAFETY: the region is in bounds, aligned for `T`, initialized (the
        // buffer starts zeroed and only ever receives `Pod` writes) and
        // disjoint from every other live slice because the cursor only moves
        // forward until `reset(&mut self)`. Any byte pattern is a valid `T`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().cast::<T>(), len) })
    }

    /// Allocates a typed slice and overwrites every element with `value`.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_fill<T: Pod>(&self, len: usize, value: T) -> Result<&mut [T]> {
        let slice = self.alloc_slice(len)?;
        slice.fill(value);
        Ok(slice)
    }

    /// Rewinds the cursor to the start of the buffer. Memory is not cleared.
    pub fn reset(&mut self) {
        *self.offset.get_mut() = 0;
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .finish()
    }
}

#[test]
fn allocations_are_aligned() {
    let arena = Arena::new(1024).unwrap();
    arena.allocate(3, 1).unwrap();

    let words = arena.alloc_slice::<f64>(4).unwrap();
    assert_eq!(words.as_ptr() as usize % align_of::<f64>(), 0);

    let ptr = arena.allocate(8, 64).unwrap();
    assert_eq!(ptr.as_ptr() as usize % 64, 0);
}

#[test]
fn slices_are_disjoint() {
    let arena = Arena::new(1024).unwrap();
    let prices = arena.alloc_slice_fill::<f64>(8, 1.0).unwrap();
    let indices = arena.alloc_slice_fill::<u32>(8, 7).unwrap();
    let flows = arena.alloc_slice_fill::<f64>(8, 2.0).unwrap();

    prices[7] = 3.0;
    assert!(indices.iter().all(|&i| i == 7));
    assert!(flows.iter().all(|&c| c == 2.0));
    assert_eq!(prices[0], 1.0);
}

#[test]
fn exhaustion_reports_sizes_and_keeps_cursor() {
    let arena = Arena::new(64).unwrap();
    arena.alloc_slice::<u8>(40).unwrap();
    let used = arena.used();

    let err = arena.alloc_slice::<u8>(32).unwrap_err();
    assert_eq!(
        err,
        LsmError::OutOfMemory {
            requested: 32,
            remaining: 24
        }
    );
    assert_eq!(arena.used(), used);
}

#[test]
fn rejects_non_power_of_two_alignment() {
    let arena = Arena::new(64).unwrap();
    assert!(matches!(
        arena.allocate(8, 12),
        Err(LsmError::InvalidArgument(_))
    ));
}

#[test]
fn reset_reclaims_without_clearing() {
    let mut arena = Arena::new(256).unwrap();
    arena.alloc_slice_fill::<u64>(16, 0xABCD).unwrap();
    assert_eq!(arena.remaining(), 128);

    arena.reset();
    assert_eq!(arena.used(), 0);

    let stale = arena.alloc_slice::<u64>(16).unwrap();
    assert!(stale.iter().all(|&w| w == 0xABCD));
}

#[test]
fn zero_capacity_arena_only_serves_empty_requests() {
    let arena = Arena::new(0).unwrap();
    assert!(arena.alloc_slice::<f64>(0).unwrap().is_empty());
    assert!(arena.alloc_slice::<f64>(1).is_err());
}

#[test]
fn unreservable_capacity_is_out_of_memory() {
    let err = Arena::new(usize::MAX).unwrap_err();
    assert_eq!(
        err,
        LsmError::OutOfMemory {
            requested: usize::MAX,
            remaining: 0
        }
    );
}
