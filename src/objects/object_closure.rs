use crate::objects::object::{GcSize, Object, ObjType};
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_upvalue::ObjectUpvalue;

/// A `Function` paired with the upvalues it closed over at the point its
/// `CLOSURE` opcode ran. The only way a `Function` becomes callable.
#[repr(C)]
pub struct ObjectClosure {
    pub object: Object,
    pub function: *mut ObjectFunction,
    pub upvalues: Vec<*mut ObjectUpvalue>,
}

impl ObjectClosure {
    pub fn new(function: *mut ObjectFunction) -> Self {
        let upvalue_count = unsafe { (*function).upvalue_count };
        ObjectClosure {
            object: Object::new(ObjType::Closure),
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }
    }
}

impl GcSize for ObjectClosure {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectClosure>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.upvalues.capacity() * std::mem::size_of::<*mut ObjectUpvalue>()
    }
}
