use std::mem::size_of;

use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_list::ObjectList;
use crate::objects::object_map::ObjectMap;
use crate::objects::object_native::ObjectNative;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;

#[repr(u8)]
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum ObjType {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
    List,
    Map,
}

/// Heap object header. Every concrete object (`ObjectString`, `ObjectClosure`,
/// ...) embeds this as its first field so a `*mut Object` can be reinterpreted
/// as the concrete type once `obj_type` has been checked. `next` is the
/// intrusive singly-linked allocation list the spec requires (rooted at the
/// VM's `ObjectManager`), replacing the teacher crate's side `Vec<*mut
/// Object>` bookkeeping — see DESIGN.md.
#[repr(C)]
pub struct Object {
    pub obj_type: ObjType,
    pub is_marked: bool,
    pub next: *mut Object,
}

impl Object {
    pub fn new(obj_type: ObjType) -> Self {
        Object {
            obj_type,
            is_marked: false,
            next: std::ptr::null_mut(),
        }
    }

    pub fn shallow_size(&self) -> usize {
        size_of::<Object>()
    }

    /// Computes the deep size (struct + owned heap bytes, not traversing to
    /// other GC objects) of the concrete object this header belongs to.
    ///
    /// # Safety
    /// `self` must actually be the header of the object kind named by
    /// `self.obj_type`.
    pub unsafe fn deep_size(&self) -> usize {
        let ptr = self as *const Object;
        match self.obj_type {
            ObjType::String => (*(ptr as *const ObjectString)).deep_size(),
            ObjType::Function => (*(ptr as *const ObjectFunction)).deep_size(),
            ObjType::Native => (*(ptr as *const ObjectNative)).deep_size(),
            ObjType::Closure => (*(ptr as *const ObjectClosure)).deep_size(),
            ObjType::Upvalue => (*(ptr as *const ObjectUpvalue)).deep_size(),
            ObjType::Class => (*(ptr as *const ObjectClass)).deep_size(),
            ObjType::Instance => (*(ptr as *const ObjectInstance)).deep_size(),
            ObjType::BoundMethod => (*(ptr as *const ObjectBoundMethod)).deep_size(),
            ObjType::List => (*(ptr as *const ObjectList)).deep_size(),
            ObjType::Map => (*(ptr as *const ObjectMap)).deep_size(),
        }
    }

    /// # Safety
    /// `ptr` must be non-null and point at an object of kind `T::KIND`.
    pub unsafe fn cast<T>(ptr: *mut Object) -> *mut T {
        ptr as *mut T
    }
}

/// Bytes of heap owned by a GC object, for the allocation-triggered GC
/// heuristic. Referenced GC objects (by raw pointer) are *not* counted here;
/// only the struct itself and any non-GC heap it directly owns (`String`
/// capacity, `Vec` capacity) — mirrors the teacher crate's `GcSize` trait in
/// its root-level `objects/object.rs`.
pub trait GcSize {
    fn shallow_size(&self) -> usize;
    fn deep_size(&self) -> usize;
}

#[cfg(feature = "debug_trace_object")]
pub(crate) fn trace_free(ptr: *mut Object) {
    use crate::value::format_value;
    unsafe {
        match (*ptr).obj_type {
            ObjType::String => {
                eprintln!("drop ObjectString '{}'", (*(ptr as *const ObjectString)).chars)
            }
            ObjType::Function => {
                eprintln!("drop ObjectFunction '{}'", (*(ptr as *const ObjectFunction)).name)
            }
            ObjType::Closure => eprintln!("drop ObjectClosure"),
            ObjType::Native => {
                eprintln!("drop ObjectNative '{}'", (*(ptr as *const ObjectNative)).name)
            }
            ObjType::Upvalue => eprintln!("drop ObjectUpvalue"),
            ObjType::Class => eprintln!("drop ObjectClass '{}'", (*(ptr as *const ObjectClass)).name),
            ObjType::Instance => eprintln!("drop ObjectInstance"),
            ObjType::BoundMethod => eprintln!("drop ObjectBoundMethod"),
            ObjType::List => eprintln!(
                "drop ObjectList '{}'",
                format_value(&crate::value::Value::Obj(ptr))
            ),
            ObjType::Map => eprintln!("drop ObjectMap"),
        }
    }
}

#[cfg(not(feature = "debug_trace_object"))]
pub(crate) fn trace_free(_ptr: *mut Object) {}
