use crate::objects::object::{GcSize, Object, ObjType};
use crate::value::Value;

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A native function exposed to Lox code. Built-ins (`clock`, `wallClock`,
/// `printf`, `error`) are plain `fn` pointers taking the raw argument slice,
/// matching spec.md's `(argc, args[])` calling convention. `arity` of `None`
/// means "variadic" (`printf` accepts any number of values).
#[repr(C)]
pub struct ObjectNative {
    pub object: Object,
    pub name: String,
    pub arity: Option<u8>,
    pub function: NativeFn,
}

impl ObjectNative {
    pub fn new(name: String, arity: Option<u8>, function: NativeFn) -> Self {
        ObjectNative {
            object: Object::new(ObjType::Native),
            name,
            arity,
            function,
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        if let Some(arity) = self.arity {
            if args.len() != arity as usize {
                return Err(format!(
                    "Expected {} arguments but got {}.",
                    arity,
                    args.len()
                ));
            }
        }
        (self.function)(args)
    }
}

impl GcSize for ObjectNative {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectNative>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity()
    }
}
