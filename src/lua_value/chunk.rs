use crate::gc::StrHandle;
use crate::lua_value::Value;

/// One `pc`-range sharing a source line, compressing the per-instruction
/// line table spec §3 calls for ("a line-info table mapping each pc to a
/// source line via compressed ranges").
#[derive(Debug, Clone, Copy)]
pub struct LineInfo {
    pub start_pc: u32,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct LocalInfo {
    pub name: StrHandle,
    pub start_pc: u32,
    pub end_pc: u32,
    pub register: u32,
}

/// The compiled form of a source unit or function body (spec §3 "Chunk").
#[derive(Debug, Clone)]
pub struct Chunk {
    pub code: Vec<u32>,
    pub constants: Vec<Value>,
    pub lines: Vec<LineInfo>,
    pub locals: Vec<LocalInfo>,
    pub stack_used: u32,
    pub num_params: u32,
    pub source_name: String,
}

impl Chunk {
    pub fn new(source_name: String) -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            lines: Vec::new(),
            locals: Vec::new(),
            stack_used: 0,
            num_params: 0,
            source_name,
        }
    }

    /// Source line for `pc`, via the compressed range table.
    pub fn line_for_pc(&self, pc: usize) -> u32 {
        let pc = pc as u32;
        match self.lines.iter().rposition(|entry| entry.start_pc <= pc) {
            Some(idx) => self.lines[idx].line,
            None => 0,
        }
    }
}
