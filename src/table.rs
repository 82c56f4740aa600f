//! Open-addressing hash table keyed by interned strings.
//!
//! This replaces the teacher crate's `HashMap`-backed `table.rs` (both the
//! `dynac/` and root copies use a plain `std::collections::HashMap`): the
//! distilled spec is explicit about linear probing, power-of-two capacity, a
//! 0.75 load factor, and tombstone deletes, used uniformly for globals,
//! instance fields, class method tables, the string intern set, and map
//! objects. Keys are always interned `ObjectString` pointers, so key
//! equality during probing is pointer equality — the one exception is
//! `find_string`, used only by the interner to locate the canonical
//! instance from raw source bytes before any `ObjectString` for them
//! exists yet.

use crate::objects::object::GcSize;
use crate::objects::object_string::ObjectString;
use crate::value::Value;

const LOAD_FACTOR_MAX: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<*mut ObjectString>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: None, value: Value::Nil }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones — matches the growth trigger used by
    /// the reference table, so repeated delete/insert churn still grows
    /// the table rather than looping forever over tombstones.
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.key.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Finds the slot `key` belongs in, or the first free/tombstone slot on
    /// the probe chain if `key` is absent.
    fn find_entry(entries: &[Entry], capacity: usize, key: *mut ObjectString) -> usize {
        let hash = unsafe { (*key).hash };
        let mut index = (hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                Some(k) if std::ptr::eq(k, key) => return index,
                None if entry.is_tombstone() => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                None => return first_tombstone.unwrap_or(index),
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut new_entries = vec![Entry::empty(); capacity];
        let mut live_count = 0;
        for entry in &self.entries {
            let Some(key) = entry.key else { continue };
            let index = Self::find_entry(&new_entries, capacity, key);
            new_entries[index] = Entry { key: Some(key), value: entry.value };
            live_count += 1;
        }
        self.entries = new_entries;
        self.count = live_count;
    }

    fn ensure_capacity(&mut self) {
        if self.capacity() == 0 {
            self.adjust_capacity(8);
            return;
        }
        if (self.count + 1) as f64 > self.capacity() as f64 * LOAD_FACTOR_MAX {
            self.adjust_capacity(self.capacity() * 2);
        }
    }

    /// Inserts or overwrites `key`. Returns `true` if `key` was not
    /// already present.
    pub fn set(&mut self, key: *mut ObjectString, value: Value) -> bool {
        self.ensure_capacity();
        let capacity = self.capacity();
        let index = Self::find_entry(&self.entries, capacity, key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        if is_new_key && !entry.is_tombstone() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        self.entries[index].key.map(|_| self.entries[index].value)
    }

    pub fn delete(&mut self, key: *mut ObjectString) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry { key: None, value: Value::Bool(true) };
        true
    }

    /// Copies every live entry of `from` into `self`, used by `OP_INHERIT`
    /// to seed a subclass's method table from its superclass.
    pub fn add_all(&mut self, from: &Table) {
        for entry in &from.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Finds the canonical interned `ObjectString` matching `chars`/`hash`
    /// by content, not pointer — the one place this table compares by
    /// value instead of identity, because it is how identity gets
    /// established in the first place.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if !entry.is_tombstone() => return None,
                Some(key) => {
                    let candidate = unsafe { &*key };
                    if candidate.hash == hash && candidate.chars.as_ref() == chars {
                        return Some(key);
                    }
                }
                None => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Removes every entry whose key is not currently marked. Used during
    /// GC sweep on the string intern table so a about-to-be-freed string
    /// can never stay reachable through interning (spec.md §3, §9).
    pub fn remove_unmarked_keys(&mut self) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if unsafe { !(*key).object.is_marked } {
                    *entry = Entry { key: None, value: Value::Bool(true) };
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl GcSize for Table {
    fn shallow_size(&self) -> usize {
        std::mem::size_of::<Table>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.entries.capacity() * std::mem::size_of::<Entry>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_string(s: &str) -> *mut ObjectString {
        Box::into_raw(ObjectString::new(s))
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut table = Table::new();
        let key = leak_string("answer");
        assert!(table.set(key, Value::Number(42.0)));
        assert_eq!(table.get(key).unwrap().as_number(), 42.0);
    }

    #[test]
    fn re_set_same_key_returns_false_and_overwrites() {
        let mut table = Table::new();
        let key = leak_string("x");
        assert!(table.set(key, Value::Number(1.0)));
        assert!(!table.set(key, Value::Number(2.0)));
        assert_eq!(table.get(key).unwrap().as_number(), 2.0);
    }

    #[test]
    fn delete_then_insert_over_tombstone_works() {
        let mut table = Table::new();
        let key = leak_string("gone");
        table.set(key, Value::Number(1.0));
        assert!(table.delete(key));
        assert!(table.get(key).is_none());
        assert!(table.set(key, Value::Number(5.0)));
        assert_eq!(table.get(key).unwrap().as_number(), 5.0);
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..40).map(|i| leak_string(&format!("k{i}"))).collect();
        for (i, &key) in keys.iter().enumerate() {
            table.set(key, Value::Number(i as f64));
        }
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(table.get(key).unwrap().as_number(), i as f64);
        }
        assert_eq!(table.len(), 40);
    }

    #[test]
    fn find_string_matches_by_content_not_identity() {
        let mut table = Table::new();
        let key = leak_string("shared");
        table.set(key, Value::Nil);
        let hash = crate::objects::object_string::fnv1a_hash(b"shared");
        let found = table.find_string("shared", hash).unwrap();
        assert!(std::ptr::eq(found, key));
    }
}
