//! The `Value` representation: a tag + payload enum rather than NaN-boxing.
//!
//! spec.md allows either encoding; this crate picks the tagged enum because
//! it is the idiomatic Rust shape (no `unsafe` needed to even construct a
//! `Value`) and keeps the object-identity equality rule enforceable without
//! bit-twiddling. Heap payloads are raw pointers into GC-owned memory: the
//! GC, not Rust's ownership system, decides when the pointee dies, so a
//! smart pointer here would either lie about ownership or force `Rc`-style
//! reference counting the spec explicitly rules out (cycles).

use std::fmt;

use crate::objects::object::{Object, ObjType};
use crate::objects::object_string::ObjectString;

#[derive(Clone, Copy)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(*mut Object),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            _ => panic!("Value is not a bool."),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            _ => panic!("Value is not a number."),
        }
    }

    pub fn as_obj(&self) -> *mut Object {
        match self {
            Value::Obj(ptr) => *ptr,
            _ => panic!("Value is not an object."),
        }
    }

    /// Lox truthiness: only `nil` and `false` are falsey.
    pub fn is_falsey(&self) -> bool {
        self.is_nil() || (self.is_bool() && !self.as_bool())
    }

    pub fn obj_type(&self) -> Option<ObjType> {
        match self {
            Value::Obj(ptr) => Some(unsafe { (**ptr).obj_type }),
            _ => None,
        }
    }

    pub fn is_obj_type(&self, kind: ObjType) -> bool {
        self.obj_type() == Some(kind)
    }

    pub fn is_string(&self) -> bool {
        self.is_obj_type(ObjType::String)
    }

    /// # Safety
    /// Caller guarantees this value actually holds an `ObjectString`.
    pub unsafe fn as_string(&self) -> &ObjectString {
        &*(self.as_obj() as *const ObjectString)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Obj(ptr) => write!(f, "obj({ptr:p})"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            // Interning guarantees pointer equality coincides with content
            // equality for strings; for every other heap kind, identity is
            // the only notion of equality the language defines.
            (Value::Obj(a), Value::Obj(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

pub type ValueArray = Vec<Value>;

/// Prints integer-valued doubles without a trailing `.0`, otherwise uses
/// Rust's shortest-round-trip `f64` formatting. Resolves the distilled
/// spec's Open Question (a) in favor of the behavior its test fixtures
/// require.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Value::Obj(ptr) => unsafe { format_object(*ptr) },
    }
}

unsafe fn format_object(ptr: *mut Object) -> String {
    use crate::objects::object_bound_method::ObjectBoundMethod;
    use crate::objects::object_class::ObjectClass;
    use crate::objects::object_closure::ObjectClosure;
    use crate::objects::object_function::ObjectFunction;
    use crate::objects::object_instance::ObjectInstance;
    use crate::objects::object_list::ObjectList;
    use crate::objects::object_map::ObjectMap;
    use crate::objects::object_native::ObjectNative;
    use crate::objects::object_upvalue::ObjectUpvalue;

    match (*ptr).obj_type {
        ObjType::String => (*(ptr as *const ObjectString)).chars.to_string(),
        ObjType::Function => {
            let function = &*(ptr as *const ObjectFunction);
            if function.name.is_empty() {
                "<script>".to_string()
            } else {
                format!("<fn {}>", function.name)
            }
        }
        ObjType::Native => "<native fn>".to_string(),
        ObjType::Closure => {
            let closure = &*(ptr as *const ObjectClosure);
            let function = &*closure.function;
            if function.name.is_empty() {
                "<script>".to_string()
            } else {
                format!("<fn {}>", function.name)
            }
        }
        ObjType::Upvalue => {
            let _ = &*(ptr as *const ObjectUpvalue);
            "upvalue".to_string()
        }
        ObjType::Class => (*(ptr as *const ObjectClass)).name.clone(),
        ObjType::Instance => {
            let instance = &*(ptr as *const ObjectInstance);
            format!("{} instance", (*instance.class).name)
        }
        ObjType::BoundMethod => {
            let bound = &*(ptr as *const ObjectBoundMethod);
            let function = &*(*bound.method).function;
            format!("<fn {}>", function.name)
        }
        ObjType::List => {
            let list = &*(ptr as *const ObjectList);
            let items: Vec<String> = list.elements.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        ObjType::Map => {
            let map = &*(ptr as *const ObjectMap);
            let items: Vec<String> = map
                .table
                .iter()
                .map(|(key, value)| format!("{}: {}", (*key).chars, format_value(&value)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
    }
}
