//! Code emission: raw instruction emission, jump-list patching, and the
//! discharge/materialize operations that turn an [`ExpDesc`] into real
//! bytecode (spec §4.5, §4.6).
//!
//! Grounded on the teacher's (and the root `src/compiler/code.rs`
//! reference implementation's) `luaK_*` port: `code_abc`/`code_abx`,
//! `exp2nextreg`/`exp2anyreg`/`exp2reg`, `dischargevars`/`discharge2reg`,
//! and the jump-list `concat`/`patchlist`/`get_jump`/`fix_jump` family.

use crate::compiler::expdesc::{ExpDesc, ExpKind};
use crate::compiler::func_state::FuncState;
use crate::limits::{MAX_RK_INDEX, NO_JUMP};
use crate::lua_value::Chunk;
use crate::lua_vm::opcode::{Instruction, OpCode};

/// Append a bare `ABC`-form instruction directly to a [`Chunk`] that is no
/// longer behind a live `FuncState` (used for the implicit trailing
/// `RETURN` appended once a function body has already been popped off the
/// parser's function-state stack).
pub fn code_abc_on(chunk: &mut Chunk, op: OpCode, a: u32, b: u32, c: u32) {
    chunk.code.push(Instruction::make_abc(op, a, b, c));
}

pub fn code_abc(fs: &mut FuncState, op: OpCode, a: u32, b: u32, c: u32) -> usize {
    let pc = fs.pc();
    fs.chunk.code.push(Instruction::make_abc(op, a, b, c));
    fs.last_emit_was_jump_target = false;
    pc
}

pub fn code_abx(fs: &mut FuncState, op: OpCode, a: u32, bx: u32) -> usize {
    let pc = fs.pc();
    fs.chunk.code.push(Instruction::make_abx(op, a, bx));
    fs.last_emit_was_jump_target = false;
    pc
}

pub fn code_asbx(fs: &mut FuncState, op: OpCode, a: u32, sbx: i32) -> usize {
    let pc = fs.pc();
    fs.chunk.code.push(Instruction::make_asbx(op, a, sbx));
    fs.last_emit_was_jump_target = false;
    pc
}

/// Emit `LOAD_NIL A (n-1)`, coalescing with an immediately preceding
/// `LOAD_NIL` over adjacent registers (spec §4.5 peephole) unless the
/// current pc is a jump target (coalescing across a label would change
/// what a jump into the middle of the range sees).
pub fn emit_load_nil(fs: &mut FuncState, from: u32, n: u32) {
    if n == 0 {
        return;
    }
    if !fs.last_emit_was_jump_target {
        if let Some(&prev) = fs.chunk.code.last() {
            if Instruction::get_opcode(prev) == OpCode::LoadNil {
                let prev_a = Instruction::get_a(prev);
                let prev_b = Instruction::get_b(prev);
                let prev_last = prev_a + prev_b;
                if from <= prev_last + 1 && from + n - 1 >= prev_a {
                    let new_a = prev_a.min(from);
                    let new_last = prev_last.max(from + n - 1);
                    let idx = fs.chunk.code.len() - 1;
                    fs.chunk.code[idx] = Instruction::make_abc(OpCode::LoadNil, new_a, new_last - new_a, 0);
                    return;
                }
            }
        }
    }
    code_abc(fs, OpCode::LoadNil, from, n - 1, 0);
}

/// Emit `CONCAT A B C`, extending a directly preceding `CONCAT` whose
/// range ends where this one begins (spec §4.5 peephole: "a rising run
/// reuses the prior instruction by extending B").
pub fn emit_concat(fs: &mut FuncState, dest: u32, first: u32, last: u32) -> usize {
    if !fs.last_emit_was_jump_target {
        if let Some(&prev) = fs.chunk.code.last() {
            if Instruction::get_opcode(prev) == OpCode::Concat {
                let prev_b = Instruction::get_b(prev);
                let prev_c = Instruction::get_c(prev);
                if prev_c + 1 == first {
                    let idx = fs.chunk.code.len() - 1;
                    fs.chunk.code[idx] = Instruction::make_abc(OpCode::Concat, dest, prev_b, last);
                    return idx;
                }
            }
        }
    }
    code_abc(fs, OpCode::Concat, dest, first, last)
}

pub fn reserve_regs(fs: &mut FuncState, n: u32) -> Result<(), String> {
    fs.reserve_regs(n)
}

pub fn get_label(fs: &FuncState) -> usize {
    fs.pc()
}

pub fn emit_jump(fs: &mut FuncState) -> usize {
    code_asbx(fs, OpCode::Jump, 0, NO_JUMP)
}

/// Read the jump list link at `pc`: the absolute pc of the next jump in
/// the list, or `NO_JUMP` if this is the list's tail.
fn get_jump(fs: &FuncState, pc: usize) -> i32 {
    let instr = fs.chunk.code[pc];
    let offset = Instruction::get_sbx(instr);
    if offset == NO_JUMP {
        NO_JUMP
    } else {
        (pc as i32) + 1 + offset
    }
}

/// Write `target` (an absolute pc) as `pc`'s sBx: a relative displacement,
/// per the `target = pc + 1 + sBx` convention used for both resolved jump
/// targets and list-internal links alike.
pub fn fix_jump(fs: &mut FuncState, pc: usize, target: usize) {
    let offset = target as i64 - pc as i64 - 1;
    let instr = &mut fs.chunk.code[pc];
    Instruction::set_bx(instr, (offset + Instruction::OFFSET_SBX as i64) as u32);
}

/// Link `pc` as a list-internal pointer to `next` (an absolute pc, or
/// `NO_JUMP` to terminate the list) using the same relative encoding as
/// [`fix_jump`].
fn set_jump_link(fs: &mut FuncState, pc: usize, next: i32) {
    if next == NO_JUMP {
        let instr = &mut fs.chunk.code[pc];
        Instruction::set_bx(instr, (NO_JUMP + Instruction::OFFSET_SBX) as u32);
        return;
    }
    fix_jump(fs, pc, next as usize);
}

/// `add(list, pc)`: append `pc` to the jump list headed by `*list`.
pub fn add_to_jump_list(fs: &mut FuncState, list: &mut i32, pc: usize) {
    if *list == NO_JUMP {
        *list = pc as i32;
        return;
    }
    let mut cur = *list as usize;
    loop {
        let next = get_jump(fs, cur);
        if next == NO_JUMP {
            break;
        }
        cur = next as usize;
    }
    set_jump_link(fs, cur, pc as i32);
}

/// `concat(l1, l2)`: merge jump list `l2` onto the end of `l1`.
pub fn concat_jump_lists(fs: &mut FuncState, l1: &mut i32, l2: i32) {
    if l2 == NO_JUMP {
        return;
    }
    if *l1 == NO_JUMP {
        *l1 = l2;
        return;
    }
    add_to_jump_list(fs, l1, l2 as usize);
}

/// If the instruction just before `pc` is a `TEST_SET`, either retarget its
/// destination to `reg` or, if no register is wanted, demote it to a plain
/// `TEST` (spec §4.6 "patch").
fn patch_test_reg(fs: &mut FuncState, pc: usize, reg: Option<u32>) {
    if pc == 0 {
        return;
    }
    let prev_pc = pc - 1;
    let prev = fs.chunk.code[prev_pc];
    if Instruction::get_opcode(prev) != OpCode::TestSet {
        return;
    }
    match reg {
        Some(r) => Instruction::set_a(&mut fs.chunk.code[prev_pc], r),
        None => {
            let tested = Instruction::get_b(prev);
            let c = Instruction::get_c(prev);
            fs.chunk.code[prev_pc] = Instruction::make_abc(OpCode::Test, tested, 0, c);
        }
    }
}

/// `patchlist(list, target)`, optionally retargeting trailing `TEST_SET`s
/// to `reg` as it goes (used when the list is being patched to flow into a
/// specific register rather than just "here").
pub fn patch_list_to_reg(fs: &mut FuncState, list: i32, target: usize, reg: Option<u32>) {
    let mut pc = list;
    while pc != NO_JUMP {
        let cur = pc as usize;
        let next = get_jump(fs, cur);
        patch_test_reg(fs, cur, reg);
        fix_jump(fs, cur, target);
        pc = next;
    }
}

pub fn patch_list(fs: &mut FuncState, list: i32, target: usize) {
    patch_list_to_reg(fs, list, target, None);
}

pub fn patch_to_here(fs: &mut FuncState, list: i32) {
    let here = fs.pc();
    mark_jump_target(fs);
    patch_list(fs, list, here);
}

/// Record that the current pc is a jump target, inhibiting the `LOAD_NIL`
/// coalescing peephole across it (spec §4.6 "patch_to_here... also marks
/// the current pc as a jump target so later LOAD_NIL peephole is
/// inhibited").
pub fn mark_jump_target(fs: &mut FuncState) {
    fs.last_emit_was_jump_target = true;
}

// ---- discharge / materialize --------------------------------------------

/// `dischargevars`: lowers `Global`/`Local`/`Indexed`/`Call` into a form
/// with a known pc or register.
pub fn discharge_vars(fs: &mut FuncState, e: &mut ExpDesc) {
    match e.kind {
        ExpKind::Local(reg) => {
            e.kind = ExpKind::Discharged(reg);
        }
        ExpKind::Global(k) => {
            let pc = code_abx(fs, OpCode::GetGlobal, crate::limits::NO_REG, k);
            e.kind = ExpKind::Relocable(pc);
        }
        ExpKind::Indexed { table_reg, key_rk } => {
            free_rk(fs, key_rk);
            fs.free_reg(table_reg);
            let pc = code_abc(fs, OpCode::GetTable, crate::limits::NO_REG, table_reg, key_rk);
            e.kind = ExpKind::Relocable(pc);
        }
        ExpKind::Call(pc) => {
            // A call already occupies its result register (A); after the
            // call returns exactly one value here (multi-result call
            // sites adjust C explicitly at the call site instead).
            let a = Instruction::get_a(fs.chunk.code[pc]);
            e.kind = ExpKind::Discharged(a);
        }
        _ => {}
    }
}

fn free_rk(fs: &mut FuncState, rk: u32) {
    if !Instruction::is_rk_const(rk) {
        fs.free_reg(rk);
    }
}

/// `discharge2reg`: materialize `e` directly into `reg`.
fn discharge2reg(fs: &mut FuncState, e: &mut ExpDesc, reg: u32) {
    discharge_vars(fs, e);
    match e.kind {
        ExpKind::Nil => {
            emit_load_nil(fs, reg, 1);
        }
        ExpKind::True => {
            code_abc(fs, OpCode::LoadBool, reg, 1, 0);
        }
        ExpKind::False => {
            code_abc(fs, OpCode::LoadBool, reg, 0, 0);
        }
        ExpKind::Number(n) => {
            let k = fs.number_constant(n);
            code_abx(fs, OpCode::Constant, reg, k);
        }
        ExpKind::Constant(k) => {
            code_abx(fs, OpCode::Constant, reg, k);
        }
        ExpKind::Discharged(src) => {
            if src != reg {
                code_abc(fs, OpCode::Move, reg, src, 0);
            }
        }
        ExpKind::Relocable(pc) => {
            Instruction::set_a(&mut fs.chunk.code[pc], reg);
        }
        ExpKind::Jump(_) => {
            // handled in exp2reg via the t/f lists; nothing to discharge here.
        }
        ExpKind::None | ExpKind::Global(_) | ExpKind::Indexed { .. } | ExpKind::Local(_) | ExpKind::Call(_) => {
            unreachable!("discharge_vars should have lowered this kind first")
        }
    }
    e.kind = ExpKind::Discharged(reg);
}

/// Does any node in jump list `list` still need `reg` loaded explicitly,
/// i.e. is preceded by something other than a `TEST_SET` (which already
/// leaves the right value in `reg` on its own)?
fn list_needs_value(fs: &FuncState, list: i32) -> bool {
    let mut pc = list;
    while pc != NO_JUMP {
        let cur = pc as usize;
        if cur == 0 || Instruction::get_opcode(fs.chunk.code[cur - 1]) != OpCode::TestSet {
            return true;
        }
        pc = get_jump(fs, cur);
    }
    false
}

/// `exp2reg`: discharge into `reg`, then resolve any pending true/false
/// jump lists so that, however control arrived at `reg`, it holds the
/// right boolean/value (the classic `LOAD_BOOL ... skip-next` pattern for
/// conditions used as values).
pub fn exp2reg(fs: &mut FuncState, e: &mut ExpDesc, reg: u32) {
    discharge2reg(fs, e, reg);
    if let ExpKind::Jump(pc) = e.kind {
        add_to_jump_list(fs, &mut e.patch_true, pc);
    }
    if e.has_jumps() {
        let mut load_false_pc = NO_JUMP;
        let mut load_true_pc = NO_JUMP;
        if list_needs_value(fs, e.patch_true) || list_needs_value(fs, e.patch_false) {
            let skip = if matches!(e.kind, ExpKind::Jump(_)) { NO_JUMP } else { emit_jump(fs) as i32 };
            load_false_pc = code_abc(fs, OpCode::LoadBool, reg, 0, 1) as i32;
            load_true_pc = code_abc(fs, OpCode::LoadBool, reg, 1, 0) as i32;
            patch_to_here(fs, skip);
        }
        let final_pc = fs.pc();
        mark_jump_target(fs);
        patch_list_to_reg_at(fs, e.patch_false, final_pc, reg, load_false_pc);
        patch_list_to_reg_at(fs, e.patch_true, final_pc, reg, load_true_pc);
    }
    e.patch_true = NO_JUMP;
    e.patch_false = NO_JUMP;
    e.kind = ExpKind::Discharged(reg);
}

/// Patch every node of `list`: a node whose preceding instruction is
/// `TEST_SET` gets retargeted to `reg` directly and jumps to `final`; any
/// other node jumps to `fallback` (one of the `LOAD_BOOL` instructions)
/// instead, so it picks up the concrete boolean before falling through.
fn patch_list_to_reg_at(fs: &mut FuncState, list: i32, final_pc: usize, reg: u32, fallback: i32) {
    let mut pc = list;
    while pc != NO_JUMP {
        let cur = pc as usize;
        let next = get_jump(fs, cur);
        if cur > 0 && Instruction::get_opcode(fs.chunk.code[cur - 1]) == OpCode::TestSet {
            patch_test_reg(fs, cur, Some(reg));
            fix_jump(fs, cur, final_pc);
        } else {
            fix_jump(fs, cur, fallback as usize);
        }
        pc = next;
    }
}

pub fn free_exp(fs: &mut FuncState, e: &ExpDesc) {
    if let ExpKind::Discharged(reg) = e.kind {
        fs.free_reg(reg);
    }
}

pub fn exp2nextreg(fs: &mut FuncState, e: &mut ExpDesc) -> Result<u32, String> {
    discharge_vars(fs, e);
    free_exp(fs, e);
    reserve_regs(fs, 1)?;
    let reg = fs.free_reg - 1;
    exp2reg(fs, e, reg);
    Ok(reg)
}

pub fn exp2anyreg(fs: &mut FuncState, e: &mut ExpDesc) -> Result<u32, String> {
    discharge_vars(fs, e);
    if let ExpKind::Discharged(reg) = e.kind {
        if !e.has_jumps() {
            return Ok(reg);
        }
        if reg >= fs.nactvar() {
            exp2reg(fs, e, reg);
            return Ok(reg);
        }
    }
    exp2nextreg(fs, e)
}

/// `expr_rk`: for constant-like descriptors, return an RK-encoded operand
/// directly from the constant pool when it fits 8 bits; otherwise fall
/// through to a real register.
pub fn exp2rk(fs: &mut FuncState, e: &mut ExpDesc) -> Result<u32, String> {
    discharge_vars(fs, e);
    let k = match e.kind {
        ExpKind::Nil => Some(fs.nil_constant()),
        ExpKind::True => Some(fs.bool_constant(true)),
        ExpKind::False => Some(fs.bool_constant(false)),
        ExpKind::Number(n) => Some(fs.number_constant(n)),
        ExpKind::Constant(k) => Some(k),
        _ => None,
    };
    if let Some(k) = k {
        if k <= MAX_RK_INDEX && !e.has_jumps() {
            e.kind = ExpKind::Constant(k);
            return Ok(Instruction::rk_as_const(k));
        }
    }
    exp2anyreg(fs, e)
}

pub fn exp2val(fs: &mut FuncState, e: &mut ExpDesc) {
    if e.has_jumps() {
        let _ = exp2anyreg(fs, e);
    } else {
        discharge_vars(fs, e);
    }
}

pub fn reserve_next_free(fs: &mut FuncState) -> Result<u32, String> {
    reserve_regs(fs, 1)?;
    Ok(fs.free_reg - 1)
}

/// Set a just-emitted `CALL`'s result count to "all of them" (`C = 0`,
/// spec §4.7's "through top"), for a call in tail position of an argument
/// or return list.
pub fn set_multret(fs: &mut FuncState, e: &mut ExpDesc) {
    if let ExpKind::Call(pc) = e.kind {
        Instruction::set_c(&mut fs.chunk.code[pc], 0);
    }
}

/// The register a `CALL` descriptor's first (or only) result lands in.
pub fn call_base_reg(fs: &FuncState, e: &ExpDesc) -> u32 {
    match e.kind {
        ExpKind::Call(pc) => Instruction::get_a(fs.chunk.code[pc]),
        _ => panic!("call_base_reg on a non-Call expression"),
    }
}

/// Fix a `CALL`'s result count to exactly `n` (its `C` field is `n + 1`),
/// used for call-statements (`n = 0`, every result discarded) and for
/// adjusting a call that supplies the last value(s) of a multi-assignment.
pub fn set_call_result_count(fs: &mut FuncState, e: &ExpDesc, n: u32) {
    if let ExpKind::Call(pc) = e.kind {
        Instruction::set_c(&mut fs.chunk.code[pc], n + 1);
    }
}

/// Flip the condition bit of the comparison/test instruction immediately
/// before `jump_pc` (spec §4.6 "negate"), used when `not` wraps an
/// already-conditional expression instead of emitting a fresh test.
fn negate_condition(fs: &mut FuncState, jump_pc: usize) {
    if jump_pc == 0 {
        return;
    }
    let prev_pc = jump_pc - 1;
    let prev = fs.chunk.code[prev_pc];
    match Instruction::get_opcode(prev) {
        OpCode::Eq | OpCode::Lt | OpCode::Leq => {
            let a = Instruction::get_a(prev);
            Instruction::set_a(&mut fs.chunk.code[prev_pc], if a == 0 { 1 } else { 0 });
        }
        OpCode::Test | OpCode::TestSet => {
            let c = Instruction::get_c(prev);
            Instruction::set_c(&mut fs.chunk.code[prev_pc], if c == 0 { 1 } else { 0 });
        }
        _ => {}
    }
}

/// `jumponcond`: produce a jump taken exactly when `e`'s truthiness equals
/// `cond` (so control falls through to the next instruction exactly when
/// `e` is *not* `cond`). Callers that want a jump routed into a false-list
/// (e.g. `go_if_true`, an `if`/`while`/`repeat` test) pass `cond=false`;
/// callers wanting a jump into a true-list (`go_if_false`, `or`'s left
/// operand) pass `cond=true`. Reuses an already-conditional `e` (a
/// relational comparison's trailing `JMP`) by negating it in place rather
/// than emitting a redundant `TEST_SET`.
pub fn jump_on_cond(fs: &mut FuncState, e: &mut ExpDesc, cond: bool) -> Result<usize, String> {
    discharge_vars(fs, e);
    if let ExpKind::Jump(pc) = e.kind {
        if !cond {
            negate_condition(fs, pc);
        }
        return Ok(pc);
    }
    let reg = exp2anyreg(fs, e)?;
    free_exp(fs, e);
    code_abc(fs, OpCode::TestSet, crate::limits::NO_REG, reg, if cond { 1 } else { 0 });
    Ok(emit_jump(fs))
}

/// Emit the store half of an assignment: `local`/parameter targets get a
/// `MOVE`, globals a `SET_GLOBAL`, indexed targets a `SET_TABLE` (spec
/// §4.5 "Assignment").
pub fn store_var(fs: &mut FuncState, target: &ExpDesc, value: &mut ExpDesc) -> Result<(), String> {
    match target.kind {
        ExpKind::Local(reg) => {
            exp2reg(fs, value, reg);
        }
        ExpKind::Global(k) => {
            let reg = exp2anyreg(fs, value)?;
            code_abx(fs, OpCode::SetGlobal, reg, k);
            free_exp(fs, value);
        }
        ExpKind::Indexed { table_reg, key_rk } => {
            let value_rk = exp2rk(fs, value)?;
            code_abc(fs, OpCode::SetTable, table_reg, key_rk, value_rk);
            if !Instruction::is_rk_const(value_rk) {
                fs.free_reg(value_rk);
            }
            free_rk(fs, key_rk);
            fs.free_reg(table_reg);
        }
        _ => unreachable!("not an assignable expression"),
    }
    Ok(())
}
