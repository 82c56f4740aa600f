use crate::objects::object::{GcSize, Object, ObjType};
use crate::table::Table;

#[repr(C)]
pub struct ObjectMap {
    pub object: Object,
    pub table: Table,
}

impl ObjectMap {
    pub fn new() -> Self {
        ObjectMap {
            object: Object::new(ObjType::Map),
            table: Table::new(),
        }
    }
}

impl Default for ObjectMap {
    fn default() -> Self {
        Self::new()
    }
}

impl GcSize for ObjectMap {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectMap>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.table.deep_size()
    }
}
