//! Tri-color mark-sweep collector.
//!
//! Kept close to the teacher's `gc.rs`: a `GarbageCollector` holding
//! white/gray/black `HashSet<*mut Object>` sets, the same
//! `mark_object`/`mark_value`/`trace_references`/`blacken_object`/`sweep`
//! shape, the `GCStats` struct, and the `gc_trace!` feature-gated macro.
//! `blacken_object` and `mark_roots` are rewritten against this crate's ten
//! object kinds and `CallFrame`/`Table` shapes instead of the teacher's
//! struct-based variant.

use std::collections::HashSet;

use crate::call_frame::CallFrame;
use crate::objects::object::{Object, ObjType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_list::ObjectList;
use crate::objects::object_map::ObjectMap;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::object_manager::ObjectManager;
use crate::table::Table;
use crate::value::Value;

pub struct GarbageCollector {
    white_set: HashSet<*mut Object>,
    gray_set: HashSet<*mut Object>,
    black_set: HashSet<*mut Object>,
    stats: GCStats,
}

/// Aggregated GC statistics; live byte totals are tracked by the VM itself
/// since they outlive any single cycle.
#[derive(Default, Debug, Clone)]
pub struct GCStats {
    pub cycles: u64,
    pub total_freed_bytes: usize,
    pub last_freed_bytes: usize,
    pub last_before_bytes: usize,
    pub last_after_bytes: usize,
    pub last_next_trigger_bytes: usize,
}

impl GCStats {
    fn record(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.cycles += 1;
        self.total_freed_bytes += freed;
        self.last_freed_bytes = freed;
        self.last_before_bytes = before;
        self.last_after_bytes = after;
        self.last_next_trigger_bytes = next_trigger;
    }
}

#[cfg(feature = "gc_debug")]
macro_rules! gc_trace { ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); } }
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace { ($($arg:tt)*) => {}; }
pub(crate) use gc_trace;

impl GarbageCollector {
    pub fn new() -> Self {
        Self {
            white_set: HashSet::new(),
            gray_set: HashSet::new(),
            black_set: HashSet::new(),
            stats: GCStats::default(),
        }
    }

    pub fn prepare_collection(&mut self, object_manager: &ObjectManager) {
        self.reset();
        for obj_ptr in object_manager.iter() {
            self.white_set.insert(obj_ptr);
        }
    }

    pub fn mark_object(&mut self, obj: *mut Object) {
        if obj.is_null() || self.black_set.contains(&obj) || self.gray_set.contains(&obj) {
            return;
        }
        if self.white_set.remove(&obj) {
            self.gray_set.insert(obj);
            gc_trace!("mark_object enqueue gray ptr={:p}", obj);
        } else {
            // Not in white_set (e.g. marked before prepare_collection ran
            // in this cycle); still worth queuing so sweep never frees it.
            self.gray_set.insert(obj);
        }
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Obj(ptr) = value {
            self.mark_object(*ptr);
        }
    }

    pub fn trace_references(&mut self) {
        while let Some(&obj) = self.gray_set.iter().next() {
            self.gray_set.remove(&obj);
            self.black_set.insert(obj);
            unsafe {
                gc_trace!("trace gray -> black ptr={:p}", obj);
                self.blacken_object(obj);
            }
        }
    }

    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjType::Closure => {
                let closure = &*(object as *const ObjectClosure);
                self.mark_object(closure.function as *mut Object);
                for &upvalue in &closure.upvalues {
                    self.mark_object(upvalue as *mut Object);
                }
            }
            ObjType::Function => {
                let function = &*(object as *const ObjectFunction);
                for constant in &function.chunk.constants {
                    self.mark_value(constant);
                }
            }
            ObjType::Upvalue => {
                let upvalue = &*(object as *const ObjectUpvalue);
                self.mark_value(&*upvalue.location);
            }
            ObjType::Class => {
                let class = &*(object as *const ObjectClass);
                for (key, value) in class.methods.iter() {
                    self.mark_object(key as *mut Object);
                    self.mark_value(&value);
                }
            }
            ObjType::Instance => {
                let instance = &*(object as *const ObjectInstance);
                self.mark_object(instance.class as *mut Object);
                for (key, value) in instance.fields.iter() {
                    self.mark_object(key as *mut Object);
                    self.mark_value(&value);
                }
            }
            ObjType::BoundMethod => {
                let bound = &*(object as *const ObjectBoundMethod);
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
            ObjType::List => {
                let list = &*(object as *const ObjectList);
                for value in &list.elements {
                    self.mark_value(value);
                }
            }
            ObjType::Map => {
                let map = &*(object as *const ObjectMap);
                for (key, value) in map.table.iter() {
                    self.mark_object(key as *mut Object);
                    self.mark_value(&value);
                }
            }
            // Strings and natives own no further GC references.
            ObjType::String | ObjType::Native => {}
        }
    }

    /// Frees every object still white after tracing, returning freed bytes.
    /// Callers must first evict dead entries from the string intern table
    /// (see `Table::remove_unmarked_keys`) so a freed string is never left
    /// reachable through interning.
    pub fn sweep(&mut self, object_manager: &mut ObjectManager) -> usize {
        let mut freed_bytes = 0;
        for &obj_ptr in &self.white_set {
            unsafe {
                freed_bytes += object_manager.remove_object(obj_ptr);
            }
        }
        self.white_set.clear();
        gc_trace!("sweep freed_bytes={}", freed_bytes);
        freed_bytes
    }

    pub fn reset(&mut self) {
        self.white_set.clear();
        self.gray_set.clear();
        self.black_set.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mark_roots(
        &mut self,
        stack: &[Value],
        stack_top: usize,
        globals: &Table,
        frames: &[CallFrame],
        open_upvalues: &[*mut ObjectUpvalue],
        compiler_roots: &[*mut ObjectFunction],
    ) {
        for value in &stack[0..stack_top] {
            self.mark_value(value);
        }

        for (key, value) in globals.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(&value);
        }

        for frame in frames {
            self.mark_object(frame.closure as *mut Object);
        }

        for &upvalue in open_upvalues {
            self.mark_object(upvalue as *mut Object);
        }

        for &function in compiler_roots {
            self.mark_object(function as *mut Object);
        }
    }

    pub fn record_cycle(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.stats.record(before, freed, after, next_trigger);
        gc_trace!(
            "cycle summary cycles={} freed={} before={} after={} next_trigger={}",
            self.stats.cycles,
            freed,
            before,
            after,
            next_trigger
        );
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_manager::ObjectManager;

    #[test]
    fn gc_collects_unreachable_objects() {
        let mut manager = ObjectManager::new();
        let keep = manager.alloc_string("keep");
        manager.alloc_string("drop1");
        manager.alloc_string("drop2");

        let mut gc = GarbageCollector::new();
        let stack = [Value::Obj(keep as *mut Object), Value::Nil];
        let globals = Table::new();
        let frames: Vec<CallFrame> = vec![];
        let open_upvalues: Vec<*mut ObjectUpvalue> = vec![];

        gc.prepare_collection(&manager);
        gc.mark_roots(&stack, 1, &globals, &frames, &open_upvalues, &[]);
        gc.trace_references();
        manager.strings_mut().remove_unmarked_keys();
        let freed = gc.sweep(&mut manager);
        assert!(freed > 0);
        assert_eq!(manager.iter().count(), 1);
    }

    #[test]
    fn gc_preserves_reachable_closure_and_function() {
        let mut manager = ObjectManager::new();
        let func_root = manager.alloc_function(0, "f1".to_string());
        let closure_root = manager.alloc_closure(func_root);
        manager.alloc_function(0, "f2".to_string());

        let mut gc = GarbageCollector::new();
        let stack = [Value::Obj(closure_root as *mut Object)];
        let globals = Table::new();
        let frames: Vec<CallFrame> = vec![];
        let open_upvalues: Vec<*mut ObjectUpvalue> = vec![];

        gc.prepare_collection(&manager);
        gc.mark_roots(&stack, 1, &globals, &frames, &open_upvalues, &[]);
        gc.trace_references();
        gc.sweep(&mut manager);
        assert_eq!(manager.iter().count(), 2);
    }

    #[test]
    fn gc_marks_via_upvalue() {
        let mut manager = ObjectManager::new();
        let string_ptr = manager.alloc_string("captured");
        let mut stack = [Value::Obj(string_ptr as *mut Object)];
        let upvalue_ptr = manager.alloc_upvalue(&mut stack[0] as *mut Value);

        let mut gc = GarbageCollector::new();
        let globals = Table::new();
        let frames: Vec<CallFrame> = vec![];
        let open_upvalues = vec![upvalue_ptr];

        gc.prepare_collection(&manager);
        gc.mark_roots(&stack, 1, &globals, &frames, &open_upvalues, &[]);
        gc.trace_references();
        gc.sweep(&mut manager);
        assert_eq!(manager.iter().count(), 2);
    }

    #[test]
    fn gc_stats_record_cycle() {
        let mut gc = GarbageCollector::new();
        assert_eq!(gc.stats().cycles, 0);
        gc.record_cycle(1000, 400, 600, 1200);
        assert_eq!(gc.stats().cycles, 1);
        assert_eq!(gc.stats().last_before_bytes, 1000);
        assert_eq!(gc.stats().total_freed_bytes, 400);
    }
}
