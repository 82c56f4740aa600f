use crate::objects::object::{GcSize, Object, ObjType};
use crate::value::{Value, ValueArray};

#[repr(C)]
pub struct ObjectList {
    pub object: Object,
    pub elements: ValueArray,
}

impl ObjectList {
    pub fn new() -> Self {
        ObjectList {
            object: Object::new(ObjType::List),
            elements: Vec::new(),
        }
    }
}

impl Default for ObjectList {
    fn default() -> Self {
        Self::new()
    }
}

impl GcSize for ObjectList {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectList>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.elements.capacity() * std::mem::size_of::<Value>()
    }
}
