use crate::lua_vm::LuaError;

/// A syntax error, carrying source/line/lexeme (spec §4.4, §7).
#[derive(Debug, Clone)]
pub struct CompileError {
    pub source: String,
    pub line: u32,
    pub what: String,
    pub lexeme: String,
}

impl CompileError {
    pub fn new(source: String, line: u32, what: String, lexeme: String) -> Self {
        Self { source, line, what, lexeme }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {} near '{}'", self.source, self.line, self.what, self.lexeme)
    }
}

impl std::error::Error for CompileError {}

/// §7: compile errors unwind through the same handler chain as runtime
/// ones, distinguished only by the `Status` the enclosing `pcall`/`load`
/// reports.
impl From<CompileError> for LuaError {
    fn from(e: CompileError) -> Self {
        LuaError::syntax(e.to_string())
    }
}
