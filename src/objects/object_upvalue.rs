use crate::objects::object::{GcSize, Object, ObjType};
use crate::value::Value;

/// Indirection through which a closure accesses a captured variable.
///
/// While "open", `location` points into a live VM stack slot. `close`
/// copies that value into `closed` and retargets `location` at `closed`
/// itself — from then on the upvalue owns the value outright, independent of
/// the stack slot's lifetime. The VM tracks open upvalues itself in a flat
/// `Vec<*mut ObjectUpvalue>` rather than threading them through an intrusive
/// list on this struct.
#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: *mut Value,
    pub closed: Value,
}

impl ObjectUpvalue {
    pub fn new(slot: *mut Value) -> Self {
        ObjectUpvalue {
            object: Object::new(ObjType::Upvalue),
            location: slot,
            closed: Value::Nil,
        }
    }

    /// # Safety
    /// `location` must currently point at a live stack slot.
    pub unsafe fn close(&mut self) {
        self.closed = *self.location;
        self.location = &mut self.closed as *mut Value;
    }
}

impl GcSize for ObjectUpvalue {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectUpvalue>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}
