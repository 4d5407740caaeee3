//! Statement parsing: blocks, control flow, declarations, assignment, and
//! call-statements (spec §4.4, §4.7).
//!
//! Grounded on the teacher crate's statement-driver shape (`block`/`statement`
//! dispatch on the current token) generalized to this subset's grammar: no
//! generic `for ... in`, since the opcode set has no iterator-protocol
//! instruction (`FOR_PREP`/`FOR_LOOP` only cover the numeric form).

use crate::compiler::code;
use crate::compiler::error::CompileError;
use crate::compiler::expdesc::{ExpDesc, ExpKind};
use crate::compiler::parser::Parser;
use crate::compiler::token::Token;
use crate::gc::StrHandle;
use crate::limits::NO_JUMP;
use crate::lua_vm::opcode::OpCode;

impl<'s> Parser<'s> {
    pub fn block(&mut self) -> Result<(), CompileError> {
        while !self.block_follows() {
            if matches!(self.current, Token::Return) {
                self.return_stat()?;
                break;
            }
            self.statement()?;
        }
        Ok(())
    }

    fn block_follows(&self) -> bool {
        matches!(self.current, Token::Eof | Token::End | Token::Else | Token::Elseif | Token::Until)
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let line = self.current_line;
        self.fs().mark_line(line);
        match self.current {
            Token::Semi => self.advance(),
            Token::If => self.if_stat(),
            Token::While => self.while_stat(),
            Token::Do => {
                self.advance()?;
                self.fs().enter_scope(false);
                self.block()?;
                self.fs().leave_scope();
                self.expect(Token::End, "end")
            }
            Token::For => self.for_stat(),
            Token::Repeat => self.repeat_stat(),
            Token::Function => self.function_stat(),
            Token::Local => self.local_stat(),
            Token::Break => self.break_stat(),
            _ => self.expr_stat(),
        }
    }

    // ---- if / while / repeat --------------------------------------------

    /// `expr 'then'`, leaving the condition's false-jump list (to patch once
    /// the next branch or the `if`'s end is known) and patching its
    /// true-jump list to fall through into the block that follows.
    fn test_then(&mut self) -> Result<i32, CompileError> {
        let mut cond = self.expr()?;
        self.expect(Token::Then, "then")?;
        let pc = self.discharge_result(code::jump_on_cond(self.fs(), &mut cond, false))?;
        code::add_to_jump_list(self.fs(), &mut cond.patch_false, pc);
        code::patch_to_here(self.fs(), cond.patch_true);
        Ok(cond.patch_false)
    }

    fn if_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'if'
        let mut escape = NO_JUMP;
        let mut false_list = self.test_then()?;
        self.fs().enter_scope(false);
        self.block()?;
        self.fs().leave_scope();
        loop {
            match self.current {
                Token::Elseif => {
                    let jmp = code::emit_jump(self.fs()) as i32;
                    code::concat_jump_lists(self.fs(), &mut escape, jmp);
                    code::patch_to_here(self.fs(), false_list);
                    self.advance()?;
                    false_list = self.test_then()?;
                    self.fs().enter_scope(false);
                    self.block()?;
                    self.fs().leave_scope();
                }
                Token::Else => {
                    let jmp = code::emit_jump(self.fs()) as i32;
                    code::concat_jump_lists(self.fs(), &mut escape, jmp);
                    code::patch_to_here(self.fs(), false_list);
                    false_list = NO_JUMP;
                    self.advance()?;
                    self.fs().enter_scope(false);
                    self.block()?;
                    self.fs().leave_scope();
                    break;
                }
                _ => {
                    code::patch_to_here(self.fs(), false_list);
                    false_list = NO_JUMP;
                    break;
                }
            }
        }
        let _ = false_list;
        self.expect(Token::End, "end")?;
        code::patch_to_here(self.fs(), escape);
        Ok(())
    }

    fn while_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'while'
        let loop_start = code::get_label(self.fs());
        let mut cond = self.expr()?;
        self.expect(Token::Do, "do")?;
        let pc = self.discharge_result(code::jump_on_cond(self.fs(), &mut cond, false))?;
        code::add_to_jump_list(self.fs(), &mut cond.patch_false, pc);
        code::patch_to_here(self.fs(), cond.patch_true);
        let false_list = cond.patch_false;
        self.fs().enter_scope(true);
        self.block()?;
        let break_list = self.fs().leave_scope();
        self.expect(Token::End, "end")?;
        let back = code::emit_jump(self.fs());
        code::fix_jump(self.fs(), back, loop_start);
        code::patch_to_here(self.fs(), false_list);
        code::patch_to_here(self.fs(), break_list);
        Ok(())
    }

    fn repeat_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'repeat'
        let loop_start = code::get_label(self.fs());
        self.fs().enter_scope(true);
        self.block()?;
        self.expect(Token::Until, "until")?;
        // `until`'s condition is compiled with the body's locals still in
        // scope (a local declared in the body is visible to the test).
        let mut cond = self.expr()?;
        let pc = self.discharge_result(code::jump_on_cond(self.fs(), &mut cond, false))?;
        code::add_to_jump_list(self.fs(), &mut cond.patch_false, pc);
        code::patch_list(self.fs(), cond.patch_false, loop_start);
        let break_list = self.fs().leave_scope();
        code::patch_to_here(self.fs(), cond.patch_true);
        code::patch_to_here(self.fs(), break_list);
        Ok(())
    }

    /// Numeric `for` only: `for Name '=' expr ',' expr [',' expr] 'do'
    /// block 'end'`. No generic `for ... in ...` — this opcode set has no
    /// iterator-protocol instruction to drive it.
    fn for_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'for'
        let name = self.expect_name()?;
        if !matches!(self.current, Token::Assign) {
            return Err(self.error_here("'=' expected (generic 'for ... in' is not supported)"));
        }
        self.advance()?; // '='
        self.fs().enter_scope(true);

        let mut start = self.expr()?;
        let base = self.discharge_result(code::exp2nextreg(self.fs(), &mut start))?;
        let hidden_start = self.hidden_name("(for start)");
        self.fs().declare_local(hidden_start, base);

        self.expect(Token::Comma, ",")?;
        let mut limit = self.expr()?;
        let limit_reg = self.discharge_result(code::exp2nextreg(self.fs(), &mut limit))?;
        let hidden_limit = self.hidden_name("(for limit)");
        self.fs().declare_local(hidden_limit, limit_reg);

        let step_reg = if matches!(self.current, Token::Comma) {
            self.advance()?;
            let mut step = self.expr()?;
            self.discharge_result(code::exp2nextreg(self.fs(), &mut step))?
        } else {
            let k = self.fs().number_constant(1.0);
            let mut step = ExpDesc::constant(k);
            self.discharge_result(code::exp2nextreg(self.fs(), &mut step))?
        };
        let hidden_step = self.hidden_name("(for step)");
        self.fs().declare_local(hidden_step, step_reg);

        self.discharge_result(code::reserve_regs(self.fs(), 1))?;
        let loop_var_reg = base + 3;
        self.fs().declare_local(name, loop_var_reg);

        self.expect(Token::Do, "do")?;
        let prep_pc = code::code_asbx(self.fs(), OpCode::ForPrep, base, 0);
        self.fs().enter_scope(false);
        self.block()?;
        self.fs().leave_scope();
        let loop_label = code::get_label(self.fs());
        code::fix_jump(self.fs(), prep_pc, loop_label);
        let loop_pc = code::code_asbx(self.fs(), OpCode::ForLoop, base, 0);
        code::fix_jump(self.fs(), loop_pc, prep_pc + 1);
        self.expect(Token::End, "end")?;
        let break_list = self.fs().leave_scope();
        code::patch_to_here(self.fs(), break_list);
        Ok(())
    }

    fn hidden_name(&mut self, text: &str) -> StrHandle {
        self.store.intern(text)
    }

    // ---- function / local -------------------------------------------------

    fn function_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'function'
        let first = self.expect_name()?;
        let mut target = self.resolve_name(first);
        let mut is_method = false;
        loop {
            match self.current {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    target = self.index_field(target, name)?;
                }
                Token::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    target = self.index_field(target, name)?;
                    is_method = true;
                    break;
                }
                _ => break,
            }
        }
        let mut body = self.function_body(is_method)?;
        self.discharge_result(code::store_var(self.fs(), &target, &mut body))?;
        Ok(())
    }

    fn local_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'local'
        if matches!(self.current, Token::Function) {
            self.advance()?;
            let name = self.expect_name()?;
            // Declared before the body is compiled so the function can
            // recurse by its own name.
            let reg = self.discharge_result(code::reserve_next_free(self.fs()))?;
            self.fs().declare_local(name, reg);
            let mut body = self.function_body(false)?;
            code::exp2reg(self.fs(), &mut body, reg);
            return Ok(());
        }

        let mut names = vec![self.expect_name()?];
        while matches!(self.current, Token::Comma) {
            self.advance()?;
            names.push(self.expect_name()?);
        }
        if matches!(self.current, Token::Assign) {
            self.advance()?;
            self.adjust_assign(names.len() as u32)?;
        } else {
            let base = self.fs().free_reg;
            code::emit_load_nil(self.fs(), base, names.len() as u32);
            self.discharge_result(code::reserve_regs(self.fs(), names.len() as u32))?;
        }
        let start = self.fs().free_reg - names.len() as u32;
        for (i, name) in names.into_iter().enumerate() {
            self.fs().declare_local(name, start + i as u32);
        }
        Ok(())
    }

    fn break_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'break'
        let jmp = code::emit_jump(self.fs());
        let mut list = match self.fs().innermost_break_list() {
            Some(l) => *l,
            None => return Err(self.error_here("'break' outside a loop")),
        };
        code::add_to_jump_list(self.fs(), &mut list, jmp);
        if let Some(l) = self.fs().innermost_break_list() {
            *l = list;
        }
        Ok(())
    }

    fn return_stat(&mut self) -> Result<(), CompileError> {
        self.advance()?; // 'return'
        if self.block_follows() || matches!(self.current, Token::Semi) {
            code::code_abc(self.fs(), OpCode::Return, 0, 1, 0);
        } else {
            let first_reg = self.fs().free_reg;
            let mut count = 0u32;
            let mut multret = false;
            loop {
                let mut e = self.expr()?;
                let is_last = !matches!(self.current, Token::Comma);
                if is_last && matches!(e.kind, ExpKind::Call(_)) {
                    code::set_multret(self.fs(), &mut e);
                    multret = true;
                } else {
                    self.discharge_result(code::exp2nextreg(self.fs(), &mut e))?;
                }
                count += 1;
                if matches!(self.current, Token::Comma) {
                    self.advance()?;
                    continue;
                }
                break;
            }
            let b = if multret { 0 } else { count + 1 };
            code::code_abc(self.fs(), OpCode::Return, first_reg, b, 0);
        }
        if matches!(self.current, Token::Semi) {
            self.advance()?;
        }
        Ok(())
    }

    // ---- assignment / call-statement --------------------------------------

    fn expr_stat(&mut self) -> Result<(), CompileError> {
        let first = self.suffixed_expr()?;
        if matches!(self.current, Token::Assign | Token::Comma) {
            let mut targets = vec![first];
            while matches!(self.current, Token::Comma) {
                self.advance()?;
                targets.push(self.suffixed_expr()?);
            }
            for t in &targets {
                if !matches!(t.kind, ExpKind::Local(_) | ExpKind::Global(_) | ExpKind::Indexed { .. }) {
                    return Err(self.error_here("syntax error (cannot assign to this expression)"));
                }
            }
            self.expect(Token::Assign, "=")?;
            self.adjust_assign(targets.len() as u32)?;
            let n = targets.len() as u32;
            let start = self.fs().free_reg - n;
            for (i, target) in targets.iter().enumerate().rev() {
                let reg = start + i as u32;
                let mut value = ExpDesc::discharged(reg);
                self.discharge_result(code::store_var(self.fs(), target, &mut value))?;
            }
            self.fs().free_reg -= n;
            Ok(())
        } else {
            if !matches!(first.kind, ExpKind::Call(_)) {
                return Err(self.error_here("syntax error"));
            }
            code::set_call_result_count(self.fs(), &first, 0);
            let base = code::call_base_reg(self.fs(), &first);
            self.fs().free_reg(base);
            Ok(())
        }
    }

    /// Parse a right-hand-side expression list, leaving exactly `nvars`
    /// materialized values in `nvars` consecutive fresh registers. A
    /// trailing call is given exactly as many results as still needed
    /// (`set_call_result_count`) instead of being forced to one; a
    /// shorter list is padded with `nil`, a longer one has its extra
    /// (already side-effecting) values' registers dropped.
    fn adjust_assign(&mut self, nvars: u32) -> Result<(), CompileError> {
        let mut count = 0u32;
        loop {
            let mut e = self.expr()?;
            let is_last = !matches!(self.current, Token::Comma);
            if is_last {
                if let ExpKind::Call(_) = e.kind {
                    let needed = nvars.saturating_sub(count);
                    if needed == 0 {
                        code::set_call_result_count(self.fs(), &e, 0);
                        let base = code::call_base_reg(self.fs(), &e);
                        self.fs().free_reg(base);
                    } else if needed == 1 {
                        self.discharge_result(code::exp2nextreg(self.fs(), &mut e))?;
                        count += 1;
                    } else {
                        code::set_call_result_count(self.fs(), &e, needed);
                        let base = code::call_base_reg(self.fs(), &e);
                        self.fs().free_reg = base + needed;
                        count += needed;
                    }
                } else {
                    self.discharge_result(code::exp2nextreg(self.fs(), &mut e))?;
                    count += 1;
                }
                break;
            } else {
                self.discharge_result(code::exp2nextreg(self.fs(), &mut e))?;
                count += 1;
                self.advance()?; // consume comma
            }
        }
        if count < nvars {
            let from = self.fs().free_reg;
            let need = nvars - count;
            code::emit_load_nil(self.fs(), from, need);
            self.discharge_result(code::reserve_regs(self.fs(), need))?;
        } else if count > nvars {
            self.fs().free_reg -= count - nvars;
        }
        Ok(())
    }

    fn discharge_result<T>(&self, r: Result<T, String>) -> Result<T, CompileError> {
        r.map_err(|e| self.make_error(e))
    }

    fn error_here(&self, what: &str) -> CompileError {
        self.make_error(what.to_string())
    }
}
