use crate::objects::object::{GcSize, Object, ObjType};
use crate::objects::object_class::ObjectClass;
use crate::table::Table;

#[repr(C)]
pub struct ObjectInstance {
    pub object: Object,
    pub class: *mut ObjectClass,
    pub fields: Table,
}

impl ObjectInstance {
    pub fn new(class: *mut ObjectClass) -> Self {
        ObjectInstance {
            object: Object::new(ObjType::Instance),
            class,
            fields: Table::new(),
        }
    }
}

impl GcSize for ObjectInstance {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectInstance>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.fields.deep_size()
    }
}
