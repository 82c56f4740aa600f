//! Owns every heap object's allocation, interning, and lifetime bookkeeping.
//!
//! Replaces the teacher crate's side `Vec<*mut Object>`-backed
//! `ObjectManager` (`objects/object_manager.rs`) with the intrusive
//! singly-linked allocation list spec.md requires: every `Object` header
//! already carries a `next` field, so the manager only needs to remember
//! the list head, mirroring the shape of `Muyunaaaa-Myula`'s `GCObject<T>`
//! heap (`src/backend/vm/heap.rs`) adapted to this crate's object kinds.

use crate::objects::object::{GcSize, Object, ObjType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_list::ObjectList;
use crate::objects::object_map::ObjectMap;
use crate::objects::object_native::{NativeFn, ObjectNative};
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::value::Value;

pub struct ObjectManager {
    head: *mut Object,
    bytes_allocated: usize,
    /// Weak string-interning set: every live `ObjectString` is also
    /// reachable here by content, so `alloc_string` can return the
    /// existing pointer instead of allocating a duplicate. The GC sweep
    /// is responsible for evicting entries whose string died
    /// (`Table::remove_unmarked_keys`) so this never keeps a dead string
    /// artificially alive.
    strings: crate::table::Table,
}

impl ObjectManager {
    pub fn new() -> Self {
        ObjectManager {
            head: std::ptr::null_mut(),
            bytes_allocated: 0,
            strings: crate::table::Table::new(),
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn strings(&self) -> &crate::table::Table {
        &self.strings
    }

    pub fn strings_mut(&mut self) -> &mut crate::table::Table {
        &mut self.strings
    }

    fn link<T: GcSize>(&mut self, boxed: Box<T>, header: *mut Object) -> *mut T {
        let size = boxed.shallow_size();
        let ptr = Box::into_raw(boxed);
        unsafe {
            (*header).next = self.head;
        }
        self.head = header;
        self.bytes_allocated += size;
        ptr
    }

    pub fn alloc_string(&mut self, content: &str) -> *mut ObjectString {
        let hash = crate::objects::object_string::fnv1a_hash(content.as_bytes());
        if let Some(existing) = self.strings.find_string(content, hash) {
            return existing;
        }
        let boxed = ObjectString::new(content);
        let header = &boxed.object as *const Object as *mut Object;
        let ptr = self.link(boxed, header);
        self.strings.set(ptr, Value::Nil);
        ptr
    }

    pub fn alloc_function(&mut self, arity: u8, name: String) -> *mut ObjectFunction {
        let boxed = Box::new(ObjectFunction::new(arity, name));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    /// Links a `Function` the compiler already built (chunk populated,
    /// arity and upvalue count known) into the allocation list, instead of
    /// constructing an empty one. Used for both the top-level script
    /// function and every nested `fun`/method body `end_compiler` hands
    /// back, so every compiled function is GC-tracked, not just the ones
    /// the VM allocates directly.
    pub fn adopt_function(&mut self, function: Box<ObjectFunction>) -> *mut ObjectFunction {
        let header = &function.object as *const Object as *mut Object;
        self.link(function, header)
    }

    pub fn alloc_native(
        &mut self,
        name: String,
        arity: Option<u8>,
        function: NativeFn,
    ) -> *mut ObjectNative {
        let boxed = Box::new(ObjectNative::new(name, arity, function));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> *mut ObjectClosure {
        let boxed = Box::new(ObjectClosure::new(function));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_upvalue(&mut self, slot: *mut Value) -> *mut ObjectUpvalue {
        let boxed = Box::new(ObjectUpvalue::new(slot));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_class(&mut self, name: String) -> *mut ObjectClass {
        let boxed = Box::new(ObjectClass::new(name));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> *mut ObjectInstance {
        let boxed = Box::new(ObjectInstance::new(class));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> *mut ObjectBoundMethod {
        let boxed = Box::new(ObjectBoundMethod::new(receiver, method));
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_list(&mut self) -> *mut ObjectList {
        let boxed = Box::<ObjectList>::default();
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    pub fn alloc_map(&mut self) -> *mut ObjectMap {
        let boxed = Box::<ObjectMap>::default();
        let header = &boxed.object as *const Object as *mut Object;
        self.link(boxed, header)
    }

    /// Walks the allocation list. Used by the collector to seed the white
    /// set before each cycle.
    pub fn iter(&self) -> ObjectIter {
        ObjectIter { next: self.head }
    }

    /// Unlinks `target` from the allocation list and frees it, returning
    /// its deep size for the collector's byte accounting.
    ///
    /// # Safety
    /// `target` must currently be on this manager's allocation list and
    /// must not be referenced again afterward.
    pub unsafe fn remove_object(&mut self, target: *mut Object) -> usize {
        let freed = (*target).deep_size();
        crate::objects::object::trace_free(target);
        if self.head == target {
            self.head = (*target).next;
        } else {
            let mut cursor = self.head;
            while !cursor.is_null() {
                if (*cursor).next == target {
                    (*cursor).next = (*target).next;
                    break;
                }
                cursor = (*cursor).next;
            }
        }
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        // Each arm reconstructs the concrete `Box<T>` the object was
        // originally allocated as, so the drop glue runs against the
        // right layout (owned `chars`/`Table`/`Vec` fields included)
        // instead of truncating to the bare `Object` header.
        match (*target).obj_type {
            ObjType::String => drop(Box::from_raw(target as *mut ObjectString)),
            ObjType::Function => drop(Box::from_raw(target as *mut ObjectFunction)),
            ObjType::Native => drop(Box::from_raw(target as *mut ObjectNative)),
            ObjType::Closure => drop(Box::from_raw(target as *mut ObjectClosure)),
            ObjType::Upvalue => drop(Box::from_raw(target as *mut ObjectUpvalue)),
            ObjType::Class => drop(Box::from_raw(target as *mut ObjectClass)),
            ObjType::Instance => drop(Box::from_raw(target as *mut ObjectInstance)),
            ObjType::BoundMethod => drop(Box::from_raw(target as *mut ObjectBoundMethod)),
            ObjType::List => drop(Box::from_raw(target as *mut ObjectList)),
            ObjType::Map => drop(Box::from_raw(target as *mut ObjectMap)),
        }
        freed
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ObjectIter {
    next: *mut Object,
}

impl Iterator for ObjectIter {
    type Item = *mut Object;

    fn next(&mut self) -> Option<*mut Object> {
        if self.next.is_null() {
            return None;
        }
        let current = self.next;
        self.next = unsafe { (*current).next };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_same_pointer() {
        let mut manager = ObjectManager::new();
        let a = manager.alloc_string("hello");
        let b = manager.alloc_string("hello");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn allocation_list_tracks_every_object() {
        let mut manager = ObjectManager::new();
        manager.alloc_string("a");
        manager.alloc_string("b");
        manager.alloc_function(0, "f".to_string());
        assert_eq!(manager.iter().count(), 3);
    }

    #[test]
    fn remove_object_unlinks_and_frees() {
        let mut manager = ObjectManager::new();
        let keep = manager.alloc_string("keep") as *mut Object;
        let drop_me = manager.alloc_string("drop") as *mut Object;
        unsafe {
            manager.remove_object(drop_me);
        }
        let remaining: Vec<_> = manager.iter().collect();
        assert_eq!(remaining, vec![keep]);
    }
}
