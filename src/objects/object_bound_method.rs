use crate::objects::object::{GcSize, Object, ObjType};
use crate::objects::object_closure::ObjectClosure;
use crate::value::Value;

/// A method closure paired with the receiver it was looked up on. Created
/// by plain `GET_PROPERTY` on a method name; `INVOKE`/`SUPER_INVOKE` avoid
/// allocating one of these by calling the closure directly when the
/// receiver's class is known at the call site.
#[repr(C)]
pub struct ObjectBoundMethod {
    pub object: Object,
    pub receiver: Value,
    pub method: *mut ObjectClosure,
}

impl ObjectBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjectClosure) -> Self {
        ObjectBoundMethod {
            object: Object::new(ObjType::BoundMethod),
            receiver,
            method,
        }
    }
}

impl GcSize for ObjectBoundMethod {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectBoundMethod>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}
