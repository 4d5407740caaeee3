//! `lulu` — a from-scratch Lua 5.1 core: lexer, single-pass expression
//! compiler and register-based bytecode VM.
//!
//! Out of scope by design: standard libraries, REPL, file I/O, bytecode
//! disassembler, metatables, coroutines, a tracing garbage collector,
//! upvalues/closures and `goto`. See `SPEC_FULL.md` in the repository root.

pub mod compiler;
pub mod gc;
pub mod limits;
pub mod lua_value;
pub mod lua_vm;

#[cfg(test)]
mod test;

pub use compiler::CompileError;
pub use lua_value::{Chunk, LuaString, LuaTable, Value};
pub use lua_vm::{LuaError, LuaVM, Status};

/// Compile and run `source` in a fresh VM, returning all values the chunk
/// returned via its top-level `return`.
pub fn execute(source: &str) -> Result<Vec<Value>, LuaError> {
    let mut vm = LuaVM::new();
    vm.load(source, "=(load)")?;
    vm.call(0, lua_vm::MULTRET)
}
