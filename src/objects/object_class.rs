use crate::objects::object::{GcSize, Object, ObjType};
use crate::table::Table;

/// A class value: just a name and a method table (`String` -> `Closure`).
/// There is no superclass pointer — `OP_INHERIT` copies the superclass's
/// methods into the subclass's table at class-definition time, so lookup
/// never needs to walk an inheritance chain. Grounded in
/// `original_source/src/object.h`'s `ObjClass`, adapted from the teacher
/// crate's struct/trait split (`objects/object_struct.rs`,
/// `objects/object_trait.rs`) which models records without method dispatch.
#[repr(C)]
pub struct ObjectClass {
    pub object: Object,
    pub name: String,
    pub methods: Table,
}

impl ObjectClass {
    pub fn new(name: String) -> Self {
        ObjectClass {
            object: Object::new(ObjType::Class),
            name,
            methods: Table::new(),
        }
    }
}

impl GcSize for ObjectClass {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectClass>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.methods.deep_size()
    }
}
