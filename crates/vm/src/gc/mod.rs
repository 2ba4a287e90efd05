//! The garbage-collected heap.
//!
//! Objects live in a generational slot arena and are addressed by [`ObjRef`]
//! handles. Reachability alone decides lifetime: [`Heap::collect`] marks
//! everything reachable from the roots handed to it and frees the rest.

pub mod alloc;
mod intern;
#[cfg(test)]
mod test;

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use slotmap::SlotMap;

use self::alloc::GcAllocator;
use self::intern::Interner;
use crate::config::VmConfig;
use crate::value::{HeapKind, LoxString, Obj, Value};

pub use self::intern::hash_str;

slotmap::new_key_type! {
    /// An untyped handle to a heap object.
    pub struct ObjRef;
}

/// A typed handle to a heap object of type `T`.
///
/// Handles are plain indices: copying one does not keep the object alive,
/// only being reachable from a root does.
#[repr(transparent)]
pub struct Gc<T> {
    key: ObjRef,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Gc<T> {
    /// Type a raw handle. The caller must have checked the object's kind.
    pub(crate) fn from_ref(key: ObjRef) -> Self {
        Gc {
            key,
            _ty: PhantomData,
        }
    }

    pub fn obj_ref(self) -> ObjRef {
        self.key
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Gc<T> {}

impl<T> Hash for Gc<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl<T> Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gc({:?})", self.key)
    }
}

impl<T> From<Gc<T>> for ObjRef {
    fn from(gc: Gc<T>) -> Self {
        gc.key
    }
}

/// Trait for types that hold references to heap objects.
pub trait Trace {
    /// Report every heap object directly referenced by `self`.
    fn trace(&self, tracer: &mut Tracer);
}

/// Collects the handles reported by [`Trace`] implementations. Handed to
/// [`Heap::collect`] holding the roots, then reused as the gray list.
#[derive(Debug, Default)]
pub struct Tracer {
    found: Vec<ObjRef>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, obj: impl Into<ObjRef>) {
        self.found.push(obj.into());
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Obj(obj) = value {
            self.found.push(*obj);
        }
    }
}

struct HeapObject {
    marked: bool,
    /// Bytes charged to the allocator for this object
    size: usize,
    obj: Obj,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Number of completed collection cycles
    pub collections: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

/// Outcome of a single collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub objects_freed: usize,
    pub bytes_freed: usize,
    pub bytes_after: usize,
}

pub struct Heap {
    objects: SlotMap<ObjRef, HeapObject>,
    strings: Interner,
    alloc: GcAllocator,
    stats: GcStats,
}

impl Heap {
    pub fn new(config: &VmConfig) -> Heap {
        Self::with_allocator(GcAllocator::from_config(config))
    }

    pub fn with_allocator(alloc: GcAllocator) -> Heap {
        Heap {
            objects: SlotMap::with_key(),
            strings: Interner::default(),
            alloc,
            stats: GcStats::default(),
        }
    }

    /// Whether allocating roughly `incoming` bytes should first run a
    /// collection.
    pub fn should_collect(&self, incoming: usize) -> bool {
        self.alloc.should_collect(incoming)
    }

    /// Move `value` into the heap. Never collects, so everything `value`
    /// references must already be reachable or otherwise protected by the
    /// caller.
    pub fn insert<T: HeapKind>(&mut self, value: T) -> Gc<T> {
        let obj = value.into_obj();
        let size = std::mem::size_of::<HeapObject>() + obj.extra_size();
        self.alloc.allocate(size);
        let key = self.objects.insert(HeapObject {
            marked: false,
            size,
            obj,
        });
        Gc::from_ref(key)
    }

    /// Charge `extra` more bytes to a live object whose tables grew.
    pub fn grow(&mut self, obj: impl Into<ObjRef>, extra: usize) {
        if let Some(o) = self.objects.get_mut(obj.into()) {
            self.alloc.resize(o.size, o.size + extra);
            o.size += extra;
        }
    }

    /// Get the object behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the object has been freed. A live handle to a freed object
    /// means a root was missed, which is a collector bug.
    pub fn get<T: HeapKind>(&self, gc: Gc<T>) -> &T {
        match self.try_get(gc) {
            Some(v) => v,
            None => invalid_handle(gc.key),
        }
    }

    /// Mutable counterpart of [`Self::get`].
    pub fn get_mut<T: HeapKind>(&mut self, gc: Gc<T>) -> &mut T {
        match self
            .objects
            .get_mut(gc.key)
            .and_then(|o| T::from_obj_mut(&mut o.obj))
        {
            Some(v) => v,
            None => invalid_handle(gc.key),
        }
    }

    pub fn try_get<T: HeapKind>(&self, gc: Gc<T>) -> Option<&T> {
        self.objects.get(gc.key).and_then(|o| T::from_obj(&o.obj))
    }

    /// The object behind an untyped handle, if it is still alive.
    pub fn obj(&self, obj: ObjRef) -> Option<&Obj> {
        self.objects.get(obj).map(|o| &o.obj)
    }

    /// Type a handle if it points at a live object of kind `T`.
    pub fn downcast<T: HeapKind>(&self, obj: ObjRef) -> Option<Gc<T>> {
        let o = self.objects.get(obj)?;
        T::from_obj(&o.obj).map(|_| Gc::from_ref(obj))
    }

    /// Whether the handle still points at a live object.
    pub fn contains(&self, obj: impl Into<ObjRef>) -> bool {
        self.objects.contains_key(obj.into())
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.alloc.bytes_allocated()
    }

    pub fn next_gc(&self) -> usize {
        self.alloc.next_gc()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn allocator_mut(&mut self) -> &mut GcAllocator {
        &mut self.alloc
    }

    /// Number of strings registered in the interner
    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    /// Look up the canonical string with this content, without allocating.
    pub fn find_string(&self, s: &str) -> Option<Gc<LoxString>> {
        let hash = hash_str(s);
        self.strings
            .candidates(hash)
            .iter()
            .copied()
            .find(|c| self.try_get(*c).map_or(false, |c| c.as_str() == s))
    }

    /// Return the canonical string with this content, allocating and
    /// registering it if there is none. Never collects.
    pub fn intern(&mut self, s: &str) -> Gc<LoxString> {
        if let Some(existing) = self.find_string(s) {
            return existing;
        }
        let string = LoxString::new(s);
        let hash = string.hash();
        let gc = self.insert(string);
        self.strings.insert(hash, gc);
        gc
    }

    /// Run a full mark-and-sweep cycle. `roots` must hold every root; all
    /// objects not reachable from them are freed.
    pub fn collect(&mut self, roots: Tracer) -> CycleStats {
        self.mark(roots);
        let stats = self.sweep();

        self.alloc.finish_cycle();
        self.stats.collections += 1;
        self.stats.objects_freed += stats.objects_freed;
        self.stats.bytes_freed += stats.bytes_freed;
        stats
    }

    fn mark(&mut self, mut tracer: Tracer) {
        let mut gray = Vec::new();
        loop {
            for obj in tracer.found.drain(..) {
                if let Some(o) = self.objects.get_mut(obj) {
                    if !o.marked {
                        o.marked = true;
                        gray.push(obj);
                    }
                }
            }
            // blacken
            match gray.pop() {
                Some(obj) => {
                    if let Some(o) = self.objects.get(obj) {
                        o.obj.trace(&mut tracer);
                    }
                }
                None => break,
            }
        }
    }

    fn sweep(&mut self) -> CycleStats {
        let strings = &mut self.strings;
        let alloc = &mut self.alloc;
        let mut stats = CycleStats::default();

        self.objects.retain(|key, o| {
            if o.marked {
                o.marked = false;
                return true;
            }
            if let Obj::String(s) = &o.obj {
                strings.remove(s.hash(), Gc::from_ref(key));
            }
            tracing::trace!(?key, kind = o.obj.kind_name(), size = o.size, "free");
            alloc.release(o.size);
            stats.objects_freed += 1;
            stats.bytes_freed += o.size;
            false
        });

        stats.bytes_after = alloc.bytes_allocated();
        stats
    }
}

impl Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("objects", &self.objects.len())
            .field("bytes_allocated", &self.alloc.bytes_allocated())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cold]
fn invalid_handle(obj: ObjRef) -> ! {
    panic!("dangling or mistyped heap handle {:?}", obj)
}
