use crate::objects::object::{GcSize, Object, ObjType};

#[repr(C)]
pub struct ObjectString {
    pub object: Object,
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjectString {
    pub fn new(content: &str) -> Box<ObjectString> {
        let hash = fnv1a_hash(content.as_bytes());
        Box::new(ObjectString {
            object: Object::new(ObjType::String),
            chars: content.into(),
            hash,
        })
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

impl GcSize for ObjectString {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<ObjectString>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.chars.len()
    }
}

/// 32-bit FNV-1a, matching spec.md's choice for hash-table key hashing.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 2166136261;
    const FNV_PRIME: u32 = 16777619;
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
