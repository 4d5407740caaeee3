//! Open-addressed string intern table (spec §4.1).
//!
//! Grounded on the teacher's `gc::string_interner::StringInterner`, but
//! where the teacher reaches for `ahash` plus a tri-color mark/sweep GC
//! (out of scope here, §2 of `SPEC_FULL.md`), we pin the exact FNV-1a-32
//! hash spec.md names — the hash algorithm here is a tested invariant
//! (property 2), not an implementation detail we're free to swap.

use super::StrHandle;
use crate::limits::{INTERN_INITIAL_CAPACITY, MAX_LOAD_DEN, MAX_LOAD_NUM};
use crate::lua_value::LuaString;

fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// One bucket chain: every interned string whose hash collides at this
/// bucket index, in insertion order.
struct Bucket {
    entries: Vec<u32>,
}

/// Deduplicates all strings the VM ever sees. Strings are never individually
/// freed (spec §4.1) — `strings` only grows until the VM is torn down.
pub struct StringInterner {
    strings: Vec<LuaString>,
    buckets: Vec<Bucket>,
    count: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(INTERN_INITIAL_CAPACITY);
        buckets.resize_with(INTERN_INITIAL_CAPACITY, || Bucket { entries: Vec::new() });
        Self { strings: Vec::new(), buckets, count: 0 }
    }

    pub fn get(&self, handle: StrHandle) -> &LuaString {
        &self.strings[handle.0 as usize]
    }

    fn bucket_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Locate via `hash & (cap - 1)`, walk the chain; on miss allocate a new
    /// `LuaString`, link it in, and rehash if the load factor exceeds 3/4.
    pub fn intern(&mut self, bytes: &str) -> StrHandle {
        let hash = fnv1a_32(bytes.as_bytes());
        let idx = self.bucket_index(hash);
        for &sid in &self.buckets[idx].entries {
            if self.strings[sid as usize].as_str() == bytes {
                return StrHandle(sid);
            }
        }

        let sid = self.strings.len() as u32;
        self.strings.push(LuaString::new(bytes.to_string(), hash));
        self.buckets[idx].entries.push(sid);
        self.count += 1;

        if self.count * MAX_LOAD_DEN > self.buckets.len() * MAX_LOAD_NUM {
            self.grow();
        }

        StrHandle(sid)
    }

    fn grow(&mut self) {
        let new_cap = self.buckets.len() * 2;
        let mut buckets = Vec::with_capacity(new_cap);
        buckets.resize_with(new_cap, || Bucket { entries: Vec::new() });
        for (sid, s) in self.strings.iter().enumerate() {
            let idx = (s.hash() as usize) & (new_cap - 1);
            buckets[idx].entries.push(sid as u32);
        }
        self.buckets = buckets;
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_intern_to_same_handle() {
        let mut interner = StringInterner::new();
        let a = interner.intern("hello");
        let b = interner.intern("he".to_string() + "llo");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_bytes_intern_to_distinct_handles() {
        let mut interner = StringInterner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn grows_past_initial_capacity_without_losing_dedup() {
        let mut interner = StringInterner::new();
        let mut handles = Vec::new();
        for i in 0..500 {
            handles.push(interner.intern(&format!("sym_{i}")));
        }
        for i in 0..500 {
            assert_eq!(interner.intern(&format!("sym_{i}")), handles[i]);
        }
    }
}
