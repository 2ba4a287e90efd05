use crate::config::VmConfig;

/// Byte accounting for the garbage-collected heap.
///
/// Memory itself comes from the global allocator through the owning types
/// of each heap object; this type only tracks how much of it the heap holds,
/// and decides when a collection is due. Running out of memory aborts the
/// process through the global allocator, there is no recovery path.
#[derive(Debug, Clone)]
pub struct GcAllocator {
    /// Total memory currently held by heap objects.
    bytes_allocated: usize,

    /// The threshold for triggering a GC. Recalculated as
    /// `growth_factor * bytes_allocated` after each GC, but never below
    /// `min_threshold`.
    next_gc: usize,

    min_threshold: usize,
    growth_factor: usize,

    /// Collect before every allocation.
    stress: bool,
}

impl GcAllocator {
    pub fn new(initial_threshold: usize, growth_factor: usize, stress: bool) -> GcAllocator {
        GcAllocator {
            bytes_allocated: 0,
            next_gc: initial_threshold,
            min_threshold: initial_threshold,
            growth_factor: growth_factor.max(1),
            stress,
        }
    }

    pub fn from_config(config: &VmConfig) -> GcAllocator {
        Self::new(
            config.initial_gc_threshold,
            config.gc_growth_factor,
            config.stress_gc,
        )
    }

    /// Count a fresh block of `size` bytes.
    pub fn allocate(&mut self, size: usize) {
        self.bytes_allocated += size;
    }

    /// Count a block changing from `old_size` to `new_size` bytes. Resizing
    /// to zero is a release.
    pub fn resize(&mut self, old_size: usize, new_size: usize) {
        if new_size == 0 {
            self.release(old_size);
        } else {
            self.bytes_allocated = self.bytes_allocated.saturating_sub(old_size) + new_size;
        }
    }

    /// Count a block of `size` bytes going away.
    pub fn release(&mut self, size: usize) {
        debug_assert!(size <= self.bytes_allocated, "released more than allocated");
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
    }

    /// Whether allocating `incoming` more bytes should be preceded by a
    /// collection.
    pub fn should_collect(&self, incoming: usize) -> bool {
        self.stress || self.bytes_allocated + incoming > self.next_gc
    }

    /// Recompute the threshold once a collection has finished.
    pub fn finish_cycle(&mut self) {
        self.next_gc = (self.bytes_allocated * self.growth_factor).max(self.min_threshold);
    }

    /// Amount of memory currently allocated by this allocator
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }
}
