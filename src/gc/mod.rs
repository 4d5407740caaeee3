//! The object store.
//!
//! Spec §9 calls for "a sum type with variants holding indices into an
//! arena-per-object-kind" in place of the original's singly-linked list of
//! raw heap objects freed at VM teardown. Each arena below is exactly that:
//! a `Vec<T>` owned by the [`crate::lua_vm::LuaVM`] that is dropped as one
//! unit when the VM goes away, which is the safe-Rust rendering of "free
//! the whole list at once" — no generational indices, no reuse of freed
//! slots, no reference counting. Objects are never individually freed
//! before teardown (spec §5: "no garbage collection beyond a singly-linked
//! object list freed at teardown").

mod string_interner;

pub use string_interner::StringInterner;

use crate::lua_value::{Chunk, Closure, LuaString, LuaTable};
use std::cell::RefCell;
use std::rc::Rc;

/// A handle into the string arena. Strings are interned (§4.1), so two
/// handles compare equal iff they name the same interned string — this is
/// the pointer-identity equality spec.md's Value section requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureHandle(pub(crate) u32);

/// Object arenas plus the string interner. Owned by the VM; nothing here
/// outlives it.
pub struct ObjectStore {
    pub interner: StringInterner,
    tables: Vec<RefCell<LuaTable>>,
    chunks: Vec<Rc<Chunk>>,
    closures: Vec<Closure>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
            tables: Vec::new(),
            chunks: Vec::new(),
            closures: Vec::new(),
        }
    }

    pub fn intern(&mut self, bytes: &str) -> StrHandle {
        self.interner.intern(bytes)
    }

    pub fn string_at(&self, handle: StrHandle) -> &LuaString {
        self.interner.get(handle)
    }

    pub fn new_table(&mut self) -> TableHandle {
        let id = self.tables.len() as u32;
        self.tables.push(RefCell::new(LuaTable::new()));
        TableHandle(id)
    }

    pub fn table(&self, handle: TableHandle) -> &RefCell<LuaTable> {
        &self.tables[handle.0 as usize]
    }

    pub fn new_chunk(&mut self, chunk: Chunk) -> ChunkHandle {
        let id = self.chunks.len() as u32;
        self.chunks.push(Rc::new(chunk));
        ChunkHandle(id)
    }

    pub fn chunk(&self, handle: ChunkHandle) -> &Rc<Chunk> {
        &self.chunks[handle.0 as usize]
    }

    pub fn new_closure(&mut self, closure: Closure) -> ClosureHandle {
        let id = self.closures.len() as u32;
        self.closures.push(closure);
        ClosureHandle(id)
    }

    pub fn closure(&self, handle: ClosureHandle) -> &Closure {
        &self.closures[handle.0 as usize]
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}
