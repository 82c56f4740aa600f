use crate::chunk::Chunk;
use crate::objects::object::{GcSize, Object, ObjType};

/// The compile target for a Lox `fun` declaration (or the implicit top-level
/// script function). Not directly callable: the VM only ever calls a
/// `Closure` wrapping one of these, so that every call site shares the same
/// upvalue-binding machinery.
#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Box<Chunk>,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(arity: u8, name: String) -> Self {
        ObjectFunction {
            object: Object::new(ObjType::Function),
            arity,
            upvalue_count: 0,
            chunk: Box::new(Chunk::new()),
            name,
        }
    }
}

impl GcSize for ObjectFunction {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectFunction>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.chunk.deep_size()
    }
}
