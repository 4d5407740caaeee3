//! The register-based bytecode virtual machine: stack, call frames,
//! dispatch loop, and the public call/pcall/stack-manipulation surface
//! (spec §4.8, §6, §7).
//!
//! Grounded on the teacher crate's `lua_vm` split: `opcode`/`lua_error` as
//! their own modules, and the `run`/`op_*` dispatch shape of the top-level
//! `vm.rs`, generalized to this subset's 29 opcodes and to the flat,
//! absolute-indexed stack spec §4.8 "Stack" calls for (the teacher's
//! per-frame register vectors don't give the single-stack window API §6
//! needs). `call_init`'s Lua-vs-C branch and `pcall`'s save/restore/re-push
//! sequence follow `crates/luars`' `lua_state.rs`/`execute/call.rs`, pared
//! down to this VM's no-metamethods, no-upvalues, no-tailcalls scope.

mod call_frame;
pub mod opcode;

mod lua_error;

pub use call_frame::CallFrame;
pub use lua_error::{LuaError, LuaResult, Status};

use std::rc::Rc;

use crate::compiler;
use crate::gc::{ObjectStore, TableHandle};
use crate::limits::LimitsConfig;
use crate::lua_value::{CFunction, Chunk, Closure, LuaClosure, Value};
use opcode::{Instruction, OpCode};

/// Sentinel meaning "all results" / "as many as are available" (GLOSSARY
/// "VARARG"), used for `call`/`pcall`'s `n_rets` and `CALL`/`RETURN`'s B/C
/// fields once decoded.
pub const MULTRET: i32 = -1;

pub struct LuaVM {
    stack: Vec<Value>,
    /// Logical top: index of the first free slot. The physical `stack`
    /// Vec only grows, matching the teacher's "only grows, never shrinks"
    /// stack discipline; `top` is the part that's actually live.
    top: usize,
    frames: Vec<CallFrame>,
    globals: TableHandle,
    pub store: ObjectStore,
    limits: LimitsConfig,
}

impl LuaVM {
    pub fn new() -> Self {
        let mut store = ObjectStore::new();
        let globals = store.new_table();
        let limits = LimitsConfig::default();
        let stack = vec![Value::Nil; limits.max_stack_size];
        Self { stack, top: 0, frames: Vec::new(), globals, store, limits }
    }

    fn ensure_capacity(&mut self, needed: usize) {
        if needed > self.stack.len() {
            self.stack.resize(needed, Value::Nil);
        }
    }

    fn frame_base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    /// Convert a 1-based/negative API index (spec §6 "positive 1-based
    /// absolute from base of the current frame's window, negative relative
    /// from top") into an absolute stack index.
    fn abs_index(&self, idx: i32) -> usize {
        if idx > 0 {
            self.frame_base() + (idx as usize - 1)
        } else {
            (self.top as i64 + idx as i64) as usize
        }
    }

    // ---- compiling / loading --------------------------------------------

    /// Compile-but-do-not-run: pushes the resulting function (spec §6
    /// `load`).
    pub fn load(&mut self, source: &str, source_name: &str) -> LuaResult<()> {
        let chunk = compiler::compile(source, source_name, &mut self.store)?;
        let chunk_handle = self.store.new_chunk(chunk);
        let closure_handle = self.store.new_closure(Closure::Lua(LuaClosure { chunk: chunk_handle }));
        self.push(Value::Function(closure_handle));
        Ok(())
    }

    // ---- stack-manipulation API (spec §6) -------------------------------

    pub fn push(&mut self, value: Value) {
        self.ensure_capacity(self.top + 1);
        self.stack[self.top] = value;
        self.top += 1;
    }

    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.push(Value::Number(n));
    }

    pub fn push_string(&mut self, s: &str) {
        let handle = self.store.intern(s);
        self.push(Value::Str(handle));
    }

    pub fn push_cfunction(&mut self, callback: CFunction) {
        let handle = self.store.new_closure(Closure::C { callback, userdata: 0 });
        self.push(Value::Function(handle));
    }

    pub fn pop(&mut self, n: usize) {
        self.top = self.top.saturating_sub(n);
    }

    pub fn get_top(&self) -> i32 {
        (self.top - self.frame_base()) as i32
    }

    pub fn set_top(&mut self, new_top: i32) {
        let base = self.frame_base();
        let new_abs = base + new_top.max(0) as usize;
        self.ensure_capacity(new_abs);
        for i in self.top.min(new_abs)..new_abs {
            self.stack[i] = Value::Nil;
        }
        self.top = new_abs;
    }

    pub fn value_at(&self, idx: i32) -> Value {
        self.stack.get(self.abs_index(idx)).copied().unwrap_or(Value::Nil)
    }

    pub fn type_name_at(&self, idx: i32) -> &'static str {
        self.value_at(idx).type_name()
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value_at(idx).as_number()
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    pub fn get_global(&mut self, name: &str) -> Value {
        let key = self.store.intern(name);
        self.store.table(self.globals).borrow().get(&Value::Str(key))
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> LuaResult<()> {
        let key = self.store.intern(name);
        self.store
            .table(self.globals)
            .borrow_mut()
            .set(Value::Str(key), value)
            .map_err(|e| LuaError::runtime(e.to_string()))
    }

    /// Concatenate the top `n` stack values in place (spec §6 `concat(n)`).
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        if n == 0 {
            self.push(Value::Str(self.store.intern("")));
            return Ok(());
        }
        let start = self.top - n;
        let mut out = String::new();
        for i in start..self.top {
            match self.stack[i] {
                Value::Str(s) => out.push_str(self.store.string_at(s).as_str()),
                Value::Number(num) => out.push_str(&format_number(num)),
                other => {
                    return Err(LuaError::runtime(format!(
                        "attempt to concatenate a {} value",
                        other.type_name()
                    )));
                }
            }
        }
        let handle = self.store.intern(&out);
        self.top = start;
        self.push(Value::Str(handle));
        Ok(())
    }

    // ---- call / pcall (spec §6, §7) --------------------------------------

    /// Invoke the function at `top - n_args - 1`. `n_rets = MULTRET` keeps
    /// all returns.
    pub fn call(&mut self, n_args: i32, n_rets: i32) -> LuaResult<Vec<Value>> {
        let n_args = n_args.max(0) as usize;
        let func_idx = self.top - n_args - 1;
        let stop_depth = self.frames.len();
        self.call_init(func_idx, n_args, n_rets)?;
        self.run(stop_depth)?;
        Ok(self.stack[func_idx..self.top].to_vec())
    }

    /// Protected call (spec §7): on success leaves the returns on the stack
    /// and returns `Ok`; on throw, unwinds frames back to the saved depth,
    /// restores the window, pushes exactly the error message, and returns
    /// the thrown kind.
    pub fn pcall(&mut self, n_args: i32, n_rets: i32) -> Status {
        let n_args_u = n_args.max(0) as usize;
        let func_idx = self.top - n_args_u - 1;
        let stop_depth = self.frames.len();
        match self.call_init(func_idx, n_args_u, n_rets).and_then(|_| self.run(stop_depth)) {
            Ok(()) => Status::Ok,
            Err(e) => {
                while self.frames.len() > stop_depth {
                    self.frames.pop();
                }
                let handle = self.store.intern(&e.message);
                self.ensure_capacity(func_idx + 1);
                self.stack[func_idx] = Value::Str(handle);
                self.top = func_idx + 1;
                e.kind
            }
        }
    }

    /// Begin a call at `func_idx` (absolute): push a Lua frame and return
    /// to dispatch, or synchronously invoke a C callback and land its
    /// results (spec §4.8 "`call_init`/`call_fini`").
    fn call_init(&mut self, func_idx: usize, n_args: usize, n_rets: i32) -> LuaResult<()> {
        let func = self.stack[func_idx];
        let handle = match func {
            Value::Function(h) => h,
            other => return Err(self.call_error(format!("attempt to call a {} value", other.type_name()))),
        };
        let closure = *self.store.closure(handle);
        match closure {
            Closure::Lua(lua_closure) => {
                let chunk = Rc::clone(self.store.chunk(lua_closure.chunk));
                let base = func_idx + 1;
                let nparams = chunk.num_params as usize;
                let stack_used = chunk.stack_used as usize;
                let top = base + stack_used.max(nparams);
                self.ensure_capacity(top.max(base + n_args));
                if n_args < nparams {
                    for i in n_args..nparams {
                        self.stack[base + i] = Value::Nil;
                    }
                }
                for i in (base + n_args.max(nparams))..top {
                    self.stack[i] = Value::Nil;
                }
                self.top = top;
                self.frames.push(CallFrame::new(chunk, base, func_idx, n_rets));
                if self.frames.len() > self.limits.max_call_depth {
                    return Err(self.call_error("stack overflow".to_string()));
                }
                Ok(())
            }
            Closure::C { callback, .. } => {
                let base = func_idx + 1;
                self.ensure_capacity(base + n_args);
                self.top = base + n_args;
                // A placeholder frame, popped right after the callback
                // returns, exists only so `abs_index` resolves the
                // callback's own stack-API calls against its argument
                // window rather than whatever Lua frame called it.
                let placeholder = Rc::new(Chunk::new(String::new()));
                self.frames.push(CallFrame::new(placeholder, base, func_idx, n_rets));
                let result = callback(self);
                self.frames.pop();
                let produced = result?.max(0) as usize;
                let result_start = self.top - produced;
                self.land_results(func_idx, result_start, produced, n_rets);
                Ok(())
            }
        }
    }

    /// Copy `count` values from `src` to `dest`, truncated/padded to
    /// `n_rets` (negative means "keep them all"), and set `top` just past
    /// the landed results.
    fn land_results(&mut self, dest: usize, src: usize, count: usize, n_rets: i32) {
        let wanted = if n_rets < 0 { count } else { n_rets as usize };
        self.ensure_capacity(dest + wanted);
        for i in 0..wanted.min(count) {
            self.stack[dest + i] = self.stack[src + i];
        }
        for i in count.min(wanted)..wanted {
            self.stack[dest + i] = Value::Nil;
        }
        self.top = dest + wanted;
    }

    fn call_error(&self, msg: String) -> LuaError {
        match self.frames.last() {
            Some(frame) => self.error_at(&frame.chunk, frame.pc.saturating_sub(1), msg),
            None => LuaError::runtime(msg),
        }
    }

    // ---- dispatch loop (spec §4.8) ---------------------------------------

    fn run(&mut self, stop_depth: usize) -> LuaResult<()> {
        while self.frames.len() > stop_depth {
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> LuaResult<()> {
        let frame_idx = self.frames.len() - 1;
        let pc = self.frames[frame_idx].pc;
        let chunk = Rc::clone(&self.frames[frame_idx].chunk);
        let base = self.frames[frame_idx].base;

        if pc >= chunk.code.len() {
            // The compiler always emits a trailing RETURN, so this is
            // unreachable for well-formed chunks; treat it as "return
            // nothing" rather than panicking on a malformed one.
            self.frames.pop();
            return Ok(());
        }

        let instr = chunk.code[pc];
        self.frames[frame_idx].pc = pc + 1;
        let a = Instruction::get_a(instr);
        let b = Instruction::get_b(instr);
        let c = Instruction::get_c(instr);
        let op = Instruction::get_opcode(instr);

        match op {
            OpCode::Constant => {
                let bx = Instruction::get_bx(instr) as usize;
                self.stack[base + a as usize] = chunk.constants[bx];
            }
            OpCode::LoadNil => {
                for r in a..=b {
                    self.stack[base + r as usize] = Value::Nil;
                }
            }
            OpCode::LoadBool => {
                self.stack[base + a as usize] = Value::Boolean(b != 0);
                if c != 0 {
                    self.frames[frame_idx].pc += 1;
                }
            }
            OpCode::GetGlobal => {
                let bx = Instruction::get_bx(instr) as usize;
                let key = chunk.constants[bx];
                let value = self.store.table(self.globals).borrow().get(&key);
                self.stack[base + a as usize] = value;
            }
            OpCode::SetGlobal => {
                let bx = Instruction::get_bx(instr) as usize;
                let key = chunk.constants[bx];
                let value = self.stack[base + a as usize];
                self.store
                    .table(self.globals)
                    .borrow_mut()
                    .set(key, value)
                    .map_err(|e| self.error_at(&chunk, pc, e.to_string()))?;
            }
            OpCode::NewTable => {
                let handle = self.store.new_table();
                self.stack[base + a as usize] = Value::Table(handle);
            }
            OpCode::GetTable => {
                let table_val = self.stack[base + b as usize];
                let table = match table_val {
                    Value::Table(t) => t,
                    _ => return Err(self.type_error(&chunk, pc, b, "index", table_val)),
                };
                let key = self.rk(base, &chunk, c);
                let value = self.store.table(table).borrow().get(&key);
                self.stack[base + a as usize] = value;
            }
            OpCode::SetTable => {
                let table_val = self.stack[base + a as usize];
                let table = match table_val {
                    Value::Table(t) => t,
                    _ => return Err(self.type_error(&chunk, pc, a, "index", table_val)),
                };
                let key = self.rk(base, &chunk, b);
                let value = self.rk(base, &chunk, c);
                self.store
                    .table(table)
                    .borrow_mut()
                    .set(key, value)
                    .map_err(|e| self.error_at(&chunk, pc, e.to_string()))?;
            }
            OpCode::Move => {
                self.stack[base + a as usize] = self.stack[base + b as usize];
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                let bn = self.to_number_or_err(&chunk, pc, base, b)?;
                let cn = self.to_number_or_err(&chunk, pc, base, c)?;
                let result = match op {
                    OpCode::Add => bn + cn,
                    OpCode::Sub => bn - cn,
                    OpCode::Mul => bn * cn,
                    OpCode::Div => bn / cn,
                    OpCode::Mod => bn - (bn / cn).floor() * cn,
                    OpCode::Pow => bn.powf(cn),
                    _ => unreachable!(),
                };
                self.stack[base + a as usize] = Value::Number(result);
            }
            OpCode::Unm => {
                let bn = self.to_number_or_err(&chunk, pc, base, b)?;
                self.stack[base + a as usize] = Value::Number(-bn);
            }
            OpCode::Not => {
                let v = self.stack[base + b as usize];
                self.stack[base + a as usize] = Value::Boolean(!v.is_truthy());
            }
            OpCode::Len => {
                let v = self.stack[base + b as usize];
                let len = match v {
                    Value::Str(s) => self.store.string_at(s).len() as f64,
                    Value::Table(t) => self.store.table(t).borrow().len() as f64,
                    _ => return Err(self.type_error(&chunk, pc, b, "get length of", v)),
                };
                self.stack[base + a as usize] = Value::Number(len);
            }
            OpCode::Concat => {
                let mut out = String::new();
                for r in b..=c {
                    let v = self.stack[base + r as usize];
                    match v {
                        Value::Str(s) => out.push_str(self.store.string_at(s).as_str()),
                        Value::Number(n) => out.push_str(&format_number(n)),
                        _ => return Err(self.type_error(&chunk, pc, r, "concatenate", v)),
                    }
                }
                let handle = self.store.intern(&out);
                self.stack[base + a as usize] = Value::Str(handle);
            }
            OpCode::Eq | OpCode::Lt | OpCode::Leq => {
                let bv = self.rk(base, &chunk, b);
                let cv = self.rk(base, &chunk, c);
                let cond = match op {
                    OpCode::Eq => bv.raw_eq(&cv),
                    OpCode::Lt => self.values_less(&chunk, pc, bv, cv, b, c, false)?,
                    OpCode::Leq => self.values_less(&chunk, pc, bv, cv, b, c, true)?,
                    _ => unreachable!(),
                };
                if cond != (a != 0) {
                    self.frames[frame_idx].pc += 1;
                }
            }
            OpCode::Test => {
                let cond = self.stack[base + a as usize].is_truthy();
                if cond != (c != 0) {
                    self.frames[frame_idx].pc += 1;
                }
            }
            OpCode::TestSet => {
                let bv = self.stack[base + b as usize];
                if bv.is_truthy() == (c != 0) {
                    self.stack[base + a as usize] = bv;
                } else {
                    self.frames[frame_idx].pc += 1;
                }
            }
            OpCode::Jump => {
                let sbx = Instruction::get_sbx(instr);
                let cur = self.frames[frame_idx].pc;
                self.frames[frame_idx].pc = (cur as i32 + sbx) as usize;
            }
            OpCode::Call => {
                let func_reg = base + a as usize;
                let n_args = if b == 0 {
                    self.top.saturating_sub(func_reg + 1)
                } else {
                    self.top = func_reg + b as usize;
                    (b - 1) as usize
                };
                let n_rets = if c == 0 { MULTRET } else { c as i32 - 1 };
                self.call_init(func_reg, n_args, n_rets)?;
            }
            OpCode::Return => {
                let src = base + a as usize;
                let num_rets = if b == 0 { self.top.saturating_sub(src) } else { (b - 1) as usize };
                let frame = self.frames.pop().expect("frame stack underflow on RETURN");
                self.land_results(frame.func_idx, src, num_rets, frame.nresults);
            }
            OpCode::ForPrep => {
                let sbx = Instruction::get_sbx(instr);
                let reg = base + a as usize;
                let start = self.to_number_or_err(&chunk, pc, base, a)?;
                let limit = self.to_number_or_err(&chunk, pc, base, a + 1)?;
                let step = self.to_number_or_err(&chunk, pc, base, a + 2)?;
                if step == 0.0 {
                    return Err(self.error_at(&chunk, pc, "'for' step is zero"));
                }
                self.stack[reg] = Value::Number(start - step);
                self.stack[reg + 1] = Value::Number(limit);
                self.stack[reg + 2] = Value::Number(step);
                let cur = self.frames[frame_idx].pc;
                self.frames[frame_idx].pc = (cur as i32 + sbx) as usize;
            }
            OpCode::ForLoop => {
                let sbx = Instruction::get_sbx(instr);
                let reg = base + a as usize;
                let step = self.stack[reg + 2].as_number().expect("FOR_LOOP step corrupted");
                let limit = self.stack[reg + 1].as_number().expect("FOR_LOOP limit corrupted");
                let idx = self.stack[reg].as_number().expect("FOR_LOOP index corrupted") + step;
                let still_running = if step > 0.0 { idx <= limit } else { idx >= limit };
                self.stack[reg] = Value::Number(idx);
                if still_running {
                    self.stack[reg + 3] = Value::Number(idx);
                    let cur = self.frames[frame_idx].pc;
                    self.frames[frame_idx].pc = (cur as i32 + sbx) as usize;
                }
            }
        }
        Ok(())
    }

    fn rk(&self, base: usize, chunk: &Chunk, operand: u32) -> Value {
        if Instruction::is_rk_const(operand) {
            chunk.constants[Instruction::rk_const_index(operand) as usize]
        } else {
            self.stack[base + operand as usize]
        }
    }

    fn to_number_or_err(&self, chunk: &Chunk, pc: usize, base: usize, operand: u32) -> LuaResult<f64> {
        let v = self.rk(base, chunk, operand);
        v.as_number().ok_or_else(|| self.type_error(chunk, pc, operand, "perform arithmetic on", v))
    }

    fn values_less(
        &self,
        chunk: &Chunk,
        pc: usize,
        bv: Value,
        cv: Value,
        b_reg: u32,
        c_reg: u32,
        inclusive: bool,
    ) -> LuaResult<bool> {
        match (bv, cv) {
            (Value::Number(x), Value::Number(y)) => Ok(if inclusive { x <= y } else { x < y }),
            (Value::Str(x), Value::Str(y)) => {
                let xs = self.store.string_at(x).as_str();
                let ys = self.store.string_at(y).as_str();
                Ok(if inclusive { xs <= ys } else { xs < ys })
            }
            _ => {
                let (reg, val) = if !matches!(bv, Value::Number(_) | Value::Str(_)) { (b_reg, bv) } else { (c_reg, cv) };
                Err(self.type_error(chunk, pc, reg, "compare", val))
            }
        }
    }

    // ---- runtime error attribution (spec §4.9) ---------------------------

    fn error_at(&self, chunk: &Chunk, pc: usize, msg: impl Into<String>) -> LuaError {
        let line = chunk.line_for_pc(pc);
        LuaError::runtime(format!("{}:{}: {}", chunk.source_name, line, msg.into()))
    }

    /// Attributes a type error on `reg` to its source (a named local, a
    /// global, or a table field) when the symbolic replay up to `pc` can
    /// tell, else falls back to the generic "a `<type>` value" message.
    fn type_error(&self, chunk: &Chunk, pc: usize, reg: u32, op_desc: &str, value: Value) -> LuaError {
        let type_name = value.type_name();
        let msg = match self.describe_register(chunk, pc, reg) {
            Some((scope, name)) => format!("attempt to {op_desc} {scope} '{name}' (a {type_name} value)"),
            None => format!("attempt to {op_desc} a {type_name} value"),
        };
        self.error_at(chunk, pc, msg)
    }

    fn describe_register(&self, chunk: &Chunk, pc: usize, reg: u32) -> Option<(&'static str, String)> {
        if let Some(local) = chunk
            .locals
            .iter()
            .rev()
            .find(|l| l.register == reg && l.start_pc <= pc as u32 && (l.end_pc == 0 || (pc as u32) < l.end_pc))
        {
            let name = self.store.string_at(local.name).as_str().to_string();
            return Some(("local", name));
        }

        let mut last_writer: Option<(OpCode, u32)> = None;
        for &instr in &chunk.code[..pc.min(chunk.code.len())] {
            let op = Instruction::get_opcode(instr);
            let a = Instruction::get_a(instr);
            let writes = match op {
                OpCode::GetGlobal
                | OpCode::GetTable
                | OpCode::Constant
                | OpCode::Move
                | OpCode::NewTable
                | OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Pow
                | OpCode::Unm
                | OpCode::Not
                | OpCode::Len
                | OpCode::Concat
                | OpCode::LoadBool
                | OpCode::Call => a == reg,
                OpCode::LoadNil => a <= reg && reg <= Instruction::get_b(instr),
                _ => false,
            };
            if writes {
                last_writer = Some((op, instr));
            }
        }

        match last_writer {
            Some((OpCode::GetGlobal, instr)) => {
                let bx = Instruction::get_bx(instr) as usize;
                match chunk.constants.get(bx) {
                    Some(Value::Str(s)) => Some(("global", self.store.string_at(*s).as_str().to_string())),
                    _ => None,
                }
            }
            Some((OpCode::GetTable, instr)) => {
                let c = Instruction::get_c(instr);
                if Instruction::is_rk_const(c) {
                    let idx = Instruction::rk_const_index(c) as usize;
                    if let Some(Value::Str(s)) = chunk.constants.get(idx) {
                        return Some(("field", self.store.string_at(*s).as_str().to_string()));
                    }
                }
                None
            }
            _ => None,
        }
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        Self::new()
    }
}

/// Lua 5.1's number-to-string rule for `CONCAT`/`concat`: integral values
/// print without a trailing `.0`.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        buf.format(n as i64).to_string()
    } else {
        format!("{n}")
    }
}
