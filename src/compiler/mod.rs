//! The single-pass expression compiler: lexer, parser, code emission, and
//! the public `compile` entry point (spec §4).
//!
//! Grounded on the teacher crate's `compiler` module split — lexer/parser/
//! codegen kept as separate files rather than one monolithic pass — with
//! `code.rs` standing in for the teacher's `luaK_*` emission layer.

mod code;
mod error;
mod expdesc;
mod expr;
mod func_state;
mod lexer;
mod parser;
mod reader;
mod stmt;
mod token;

pub use error::CompileError;

use crate::gc::ObjectStore;
use crate::lua_value::Chunk;
use crate::lua_vm::opcode::OpCode;
use parser::Parser;
use token::Token;

/// Compile a whole source unit into its top-level [`Chunk`] (spec §4.4:
/// "a source unit compiles to one top-level chunk plus one nested chunk
/// per function literal, each an independent `Chunk`"). Identifiers the
/// unit itself doesn't declare as locals resolve as globals, exactly as
/// inside a function body — there's no enclosing scope to fall back to.
pub fn compile(source: &str, source_name: &str, store: &mut ObjectStore) -> Result<Chunk, CompileError> {
    let mut parser = Parser::new(source, source_name, store)?;
    parser.block()?;
    parser.expect(Token::Eof, "<eof>")?;
    let mut chunk = parser.pop_func_state();
    code::code_abc_on(&mut chunk, OpCode::Return, 0, 1, 0);
    Ok(chunk)
}
