use pretty_assertions::assert_eq;
use test_env_log::test;

use super::alloc::GcAllocator;
use super::{Heap, ObjRef, Tracer};
use crate::config::VmConfig;
use crate::value::{field_entry_size, Class, Closure, Function, Instance, Upvalue, Value};

fn heap() -> Heap {
    Heap::new(&VmConfig::default())
}

fn function(heap: &mut Heap, name: &str) -> super::Gc<Function> {
    let name = heap.intern(name);
    heap.insert(Function {
        name: Some(name),
        arity: 0,
        captures: Box::new([]),
        code: Box::new([]),
        lines: Box::new([]),
        constants: Box::new([]),
    })
}

#[test]
fn test_intern_identity() {
    let mut heap = heap();
    let a = heap.intern("hello");
    let b = heap.intern("hello");
    let c = heap.intern("world");

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(heap.len(), 2);
    assert_eq!(heap.interned_count(), 2);
    assert_eq!(heap.find_string("hello"), Some(a));
    assert_eq!(heap.find_string("nope"), None);
    assert_eq!(heap.get(c).as_str(), "world");
}

#[test]
fn test_unreachable_string_is_unregistered() {
    let mut heap = heap();
    let kept = heap.intern("kept");
    let dropped = heap.intern("dropped");

    let mut roots = Tracer::new();
    roots.mark(kept);
    let stats = heap.collect(roots);

    assert_eq!(stats.objects_freed, 1);
    assert!(heap.contains(kept));
    assert!(!heap.contains(dropped));
    assert!(heap.try_get(dropped).is_none());
    assert_eq!(heap.find_string("dropped"), None);
    assert_eq!(heap.interned_count(), 1);

    // a new string with the same content is a new object
    let again = heap.intern("dropped");
    assert_ne!(ObjRef::from(again), ObjRef::from(dropped));
    assert!(!heap.contains(dropped));
    assert_eq!(heap.find_string("dropped"), Some(again));
}

#[test]
fn test_reachable_graph_survives() {
    let mut heap = heap();
    let function = function(&mut heap, "m");
    let captured = heap.intern("captured");
    let upvalue = heap.insert(Upvalue::Closed(captured.into()));
    let closure = heap.insert(Closure {
        function,
        upvalues: vec![upvalue].into(),
    });

    let class_name = heap.intern("Point");
    let method_name = heap.intern("m");
    let mut class = Class::new(class_name);
    class.methods.insert(method_name, closure);
    let class = heap.insert(class);

    let field = heap.intern("x");
    let field_value = heap.intern("field value");
    let mut instance = Instance::new(class);
    instance.fields.insert(field, field_value.into());
    let instance = heap.insert(instance);

    let garbage = heap.intern("garbage");
    let total = heap.len();

    let mut roots = Tracer::new();
    roots.mark(instance);
    let stats = heap.collect(roots);

    assert_eq!(stats.objects_freed, 1);
    assert_eq!(heap.len(), total - 1);
    assert!(!heap.contains(garbage));
    let alive: [ObjRef; 9] = [
        function.into(),
        captured.into(),
        upvalue.into(),
        closure.into(),
        class_name.into(),
        class.into(),
        field.into(),
        field_value.into(),
        instance.into(),
    ];
    for obj in alive {
        assert!(heap.contains(obj), "{:?} was freed", obj);
    }
    // the function name "m" doubles as the method name
    assert_eq!(heap.get(function).name, Some(method_name));
}

#[test]
fn test_cycles_are_collected() {
    let mut heap = heap();
    let class_name = heap.intern("Node");
    let class = heap.insert(Class::new(class_name));
    let next = heap.intern("next");

    let a = heap.insert(Instance::new(class));
    let b = heap.insert(Instance::new(class));
    heap.get_mut(a).fields.insert(next, b.into());
    heap.get_mut(b).fields.insert(next, a.into());

    let mut roots = Tracer::new();
    roots.mark(class);
    roots.mark(next);
    let stats = heap.collect(roots);

    assert_eq!(stats.objects_freed, 2);
    assert!(!heap.contains(a));
    assert!(!heap.contains(b));
    assert!(heap.contains(class));
}

#[test]
fn test_open_upvalue_holds_nothing() {
    let mut heap = heap();
    let upvalue = heap.insert(Upvalue::Open(3));
    let s = heap.intern("unrelated");

    let mut roots = Tracer::new();
    roots.mark(upvalue);
    heap.collect(roots);

    assert!(heap.contains(upvalue));
    assert!(!heap.contains(s));
}

#[test]
fn test_value_roots() {
    let mut heap = heap();
    let s = heap.intern("value");

    let mut roots = Tracer::new();
    roots.mark_value(&Value::Number(1.0));
    roots.mark_value(&Value::Nil);
    roots.mark_value(&s.into());
    heap.collect(roots);

    assert!(heap.contains(s));
}

#[test]
fn test_accounting_returns_to_zero() {
    let mut heap = heap();
    let class_name = heap.intern("C");
    let class = heap.insert(Class::new(class_name));
    let instance = heap.insert(Instance::new(class));

    let before = heap.bytes_allocated();
    heap.grow(instance, field_entry_size());
    assert_eq!(heap.bytes_allocated(), before + field_entry_size());

    let stats = heap.collect(Tracer::new());
    assert_eq!(stats.objects_freed, 3);
    assert_eq!(stats.bytes_freed, before + field_entry_size());
    assert_eq!(heap.bytes_allocated(), 0);
    assert_eq!(stats.bytes_after, 0);
    assert!(heap.is_empty());

    let totals = heap.stats();
    assert_eq!(totals.collections, 1);
    assert_eq!(totals.objects_freed, 3);
}

#[test]
fn test_threshold_schedule() {
    let mut alloc = GcAllocator::new(100, 2, false);
    alloc.allocate(80);
    assert!(!alloc.should_collect(10));
    assert!(alloc.should_collect(30));

    alloc.finish_cycle();
    assert_eq!(alloc.next_gc(), 160);

    alloc.resize(80, 20);
    assert_eq!(alloc.bytes_allocated(), 20);
    alloc.finish_cycle();
    // never drops below the initial threshold
    assert_eq!(alloc.next_gc(), 100);

    alloc.resize(20, 0);
    assert_eq!(alloc.bytes_allocated(), 0);
}

#[test]
fn test_stress_always_collects() {
    let config = VmConfig::default().with_stress_gc(true);
    let mut heap = Heap::new(&config);
    assert!(heap.should_collect(0));

    heap.allocator_mut().set_stress(false);
    assert!(!heap.should_collect(0));
}
