//! Expression parsing: literals, table constructors, function literals,
//! and the binary/unary operator precedence climb with constant folding
//! and short-circuit `and`/`or` (spec §4.5, §4.6).

use crate::compiler::code;
use crate::compiler::error::CompileError;
use crate::compiler::expdesc::{ExpDesc, ExpKind};
use crate::compiler::parser::Parser;
use crate::compiler::token::Token;
use crate::gc::StrHandle;
use crate::limits::{NO_JUMP, NO_REG};
use crate::lua_value::{Closure, LuaClosure, Value};
use crate::lua_vm::opcode::{Instruction, OpCode};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Priority(u8);

/// Left/right binding power for a binary operator token (spec §4.5:
/// `unary > pow > factor > term > concat > compare > equality > and >
/// or`; `..` and `^` bind to the right).
fn binop_priority(tok: &Token) -> Option<(Priority, Priority)> {
    Some(match tok {
        Token::Or => (Priority(1), Priority(1)),
        Token::And => (Priority(2), Priority(2)),
        Token::Lt | Token::Gt | Token::Le | Token::Ge | Token::Ne | Token::Eq => {
            (Priority(3), Priority(3))
        }
        Token::Concat => (Priority(5), Priority(4)),
        Token::Plus | Token::Minus => (Priority(6), Priority(6)),
        Token::Star | Token::Slash | Token::Percent => (Priority(7), Priority(7)),
        Token::Caret => (Priority(10), Priority(9)),
        _ => return None,
    })
}

const UNARY_PRIORITY: Priority = Priority(8);

#[derive(Clone, Copy)]
enum UnOp {
    Not,
    Neg,
    Len,
}

fn unary_op(tok: &Token) -> Option<UnOp> {
    Some(match tok {
        Token::Not => UnOp::Not,
        Token::Minus => UnOp::Neg,
        Token::Hash => UnOp::Len,
        _ => return None,
    })
}

fn is_compare(op: Token) -> bool {
    matches!(op, Token::Eq | Token::Ne | Token::Lt | Token::Gt | Token::Le | Token::Ge)
}

impl<'s> Parser<'s> {
    /// Entry point: the lowest-precedence expression (`or`-level and up).
    pub fn expr(&mut self) -> Result<ExpDesc, CompileError> {
        self.subexpr(Priority(0))
    }

    fn subexpr(&mut self, limit: Priority) -> Result<ExpDesc, CompileError> {
        let mut left = if let Some(op) = unary_op(&self.current) {
            self.advance()?;
            let mut operand = self.subexpr(UNARY_PRIORITY)?;
            self.emit_unary(op, &mut operand)?
        } else {
            self.simple_expr()?
        };

        while let Some((left_pri, right_pri)) = binop_priority(&self.current) {
            if left_pri <= limit {
                break;
            }
            let op = self.current;
            self.advance()?;

            match op {
                Token::And => {
                    self.go_if_true(&mut left)?;
                    let right = self.subexpr(right_pri)?;
                    left = self.finish_and(left, right)?;
                }
                Token::Or => {
                    self.go_if_false(&mut left)?;
                    let right = self.subexpr(right_pri)?;
                    left = self.finish_or(left, right)?;
                }
                Token::Concat => {
                    let left_reg = self.discharge_result(code::exp2nextreg(self.fs(), &mut left))?;
                    let right = self.subexpr(right_pri)?;
                    left = self.finish_concat(left_reg, right)?;
                }
                _ => {
                    // Real operands pin their side before the right side is
                    // parsed; a bare numeral (any op) or a string literal
                    // (comparison ops only) stays un-pinned so two literals
                    // either side can still fold (spec §4.5).
                    let left_foldable = matches!(left.kind, ExpKind::Number(_))
                        || (is_compare(op) && self.is_string_constant(left.kind));
                    if !left_foldable {
                        self.discharge_result(code::exp2rk(self.fs(), &mut left))?;
                    }
                    let right = self.subexpr(right_pri)?;
                    left = self.emit_binop(op, left, right)?;
                }
            }
        }
        Ok(left)
    }

    fn discharge_result<T>(&self, r: Result<T, String>) -> Result<T, CompileError> {
        r.map_err(|e| self.make_error(e))
    }

    // ---- literals / primary ---------------------------------------------

    fn simple_expr(&mut self) -> Result<ExpDesc, CompileError> {
        match self.current {
            Token::Nil => {
                self.advance()?;
                Ok(ExpDesc::nil())
            }
            Token::True => {
                self.advance()?;
                Ok(ExpDesc::boolean(true))
            }
            Token::False => {
                self.advance()?;
                Ok(ExpDesc::boolean(false))
            }
            Token::Number(n) => {
                self.advance()?;
                Ok(ExpDesc::number(n))
            }
            Token::Str(s) => {
                self.advance()?;
                let k = self.fs().string_constant(s);
                Ok(ExpDesc::constant(k))
            }
            Token::LBrace => self.table_constructor(),
            Token::Function => {
                self.advance()?;
                self.function_body(false)
            }
            Token::Ellipsis => Err(self.error_here("cannot use '...' outside a vararg function")),
            _ => self.suffixed_expr(),
        }
    }

    pub fn primary_expr(&mut self) -> Result<ExpDesc, CompileError> {
        match self.current {
            Token::LParen => {
                self.advance()?;
                let mut e = self.expr()?;
                self.expect(Token::RParen, ")")?;
                // A parenthesized expression always yields exactly one
                // value, even if it wraps a multi-result call.
                if let ExpKind::Call(_) = e.kind {
                    let reg = self.discharge_result(code::exp2nextreg(self.fs(), &mut e))?;
                    e = ExpDesc::discharged(reg);
                } else {
                    code::exp2val(self.fs(), &mut e);
                }
                Ok(e)
            }
            Token::Name(name) => {
                self.advance()?;
                Ok(self.resolve_name(name))
            }
            _ => Err(self.error_here("unexpected symbol")),
        }
    }

    pub fn resolve_name(&mut self, name: StrHandle) -> ExpDesc {
        if let Some(reg) = self.fs().resolve_local(name) {
            ExpDesc::local(reg)
        } else {
            let k = self.fs().string_constant(name);
            ExpDesc { kind: ExpKind::Global(k), patch_true: NO_JUMP, patch_false: NO_JUMP }
        }
    }

    /// `primaryexp { '.' Name | '[' expr ']' | ':' Name args | args }`.
    pub(crate) fn suffixed_expr(&mut self) -> Result<ExpDesc, CompileError> {
        let mut e = self.primary_expr()?;
        loop {
            match self.current {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    e = self.index_field(e, name)?;
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expr()?;
                    self.expect(Token::RBracket, "]")?;
                    e = self.index_expr(e, key)?;
                }
                Token::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let method = self.index_field(e, name)?;
                    e = self.call_expr(method, true)?;
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    e = self.call_expr(e, false)?;
                }
                _ => break,
            }
        }
        Ok(e)
    }

    pub(crate) fn expect_name(&mut self) -> Result<StrHandle, CompileError> {
        match self.current {
            Token::Name(n) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.error_here("<name> expected")),
        }
    }

    pub(crate) fn index_field(&mut self, table: ExpDesc, name: StrHandle) -> Result<ExpDesc, CompileError> {
        let k = self.fs().string_constant(name);
        self.index_with_rk(table, Instruction::rk_as_const(k))
    }

    fn index_expr(&mut self, table: ExpDesc, mut key: ExpDesc) -> Result<ExpDesc, CompileError> {
        let rk = self.discharge_result(code::exp2rk(self.fs(), &mut key))?;
        self.index_with_rk(table, rk)
    }

    fn index_with_rk(&mut self, mut table: ExpDesc, key_rk: u32) -> Result<ExpDesc, CompileError> {
        let table_reg = self.discharge_result(code::exp2anyreg(self.fs(), &mut table))?;
        Ok(ExpDesc { kind: ExpKind::Indexed { table_reg, key_rk }, patch_true: NO_JUMP, patch_false: NO_JUMP })
    }

    /// `'(' [explist] ')' | String | TableConstructor`, given the
    /// already-parsed callee/method-receiver `f`. `is_method` means `f` is
    /// already `obj.name` with `obj` sitting in the register right before
    /// where the call base lands, so it's passed as an implicit first
    /// argument (the desugared `obj:name(args)` call).
    fn call_expr(&mut self, mut f: ExpDesc, is_method: bool) -> Result<ExpDesc, CompileError> {
        let base = self.discharge_result(code::exp2nextreg(self.fs(), &mut f))?;
        let mut nargs: u32 = if is_method { 1 } else { 0 };
        let mut multret = false;

        match self.current {
            Token::LParen => {
                self.advance()?;
                if !matches!(self.current, Token::RParen) {
                    loop {
                        let mut arg = self.expr()?;
                        let is_last = !matches!(self.current, Token::Comma);
                        if is_last && matches!(arg.kind, ExpKind::Call(_)) {
                            code::set_multret(self.fs(), &mut arg);
                            multret = true;
                        } else {
                            self.discharge_result(code::exp2nextreg(self.fs(), &mut arg))?;
                        }
                        nargs += 1;
                        if matches!(self.current, Token::Comma) {
                            self.advance()?;
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Token::RParen, ")")?;
            }
            Token::Str(s) => {
                self.advance()?;
                let k = self.fs().string_constant(s);
                let mut arg = ExpDesc::constant(k);
                self.discharge_result(code::exp2nextreg(self.fs(), &mut arg))?;
                nargs += 1;
            }
            Token::LBrace => {
                let mut arg = self.table_constructor()?;
                self.discharge_result(code::exp2nextreg(self.fs(), &mut arg))?;
                nargs += 1;
            }
            _ => return Err(self.error_here("function arguments expected")),
        }

        let b = if multret { 0 } else { nargs + 1 };
        let pc = code::code_abc(self.fs(), OpCode::Call, base, b, 2);
        self.fs().free_reg = base + 1;
        Ok(ExpDesc { kind: ExpKind::Call(pc), patch_true: NO_JUMP, patch_false: NO_JUMP })
    }

    /// `'{' [fieldlist] '}'`. Array-style fields (`expr` with no `=`) are
    /// written one at a time with `SET_TABLE` against a running integer
    /// key — this opcode set has no bulk "set list" instruction, so a
    /// literal `{1, 2, 3}` costs one `SET_TABLE` per element, same as any
    /// other keyed assignment (spec §4.2, §4.3).
    fn table_constructor(&mut self) -> Result<ExpDesc, CompileError> {
        self.expect(Token::LBrace, "{")?;
        let table_reg = self.discharge_result(code::reserve_next_free(self.fs()))?;
        code::code_abc(self.fs(), OpCode::NewTable, table_reg, 0, 0);
        let mut array_index: u32 = 1;

        while !matches!(self.current, Token::RBrace) {
            if matches!(self.current, Token::LBracket) {
                self.advance()?;
                let key = self.expr()?;
                self.expect(Token::RBracket, "]")?;
                self.expect(Token::Assign, "=")?;
                let value = self.expr()?;
                self.set_table_field(table_reg, key, value)?;
            } else if matches!(self.current, Token::Name(_)) && self.peek_next_is_assign() {
                let name = self.expect_name()?;
                self.expect(Token::Assign, "=")?;
                let k = self.fs().string_constant(name);
                let value = self.expr()?;
                self.set_table_field(table_reg, ExpDesc::constant(k), value)?;
            } else {
                let mut value = self.expr()?;
                let value_reg = self.discharge_result(code::exp2nextreg(self.fs(), &mut value))?;
                let key_const = self.fs().number_constant(array_index as f64);
                code::code_abc(self.fs(), OpCode::SetTable, table_reg, Instruction::rk_as_const(key_const), value_reg);
                self.fs().free_reg(value_reg);
                array_index += 1;
            }
            if matches!(self.current, Token::Comma | Token::Semi) {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(Token::RBrace, "}")?;
        Ok(ExpDesc::discharged(table_reg))
    }

    fn set_table_field(&mut self, table_reg: u32, mut key: ExpDesc, mut value: ExpDesc) -> Result<(), CompileError> {
        let key_rk = self.discharge_result(code::exp2rk(self.fs(), &mut key))?;
        let value_rk = self.discharge_result(code::exp2rk(self.fs(), &mut value))?;
        code::code_abc(self.fs(), OpCode::SetTable, table_reg, key_rk, value_rk);
        if !Instruction::is_rk_const(value_rk) {
            self.fs().free_reg(value_rk);
        }
        if !Instruction::is_rk_const(key_rk) {
            self.fs().free_reg(key_rk);
        }
        Ok(())
    }

    /// Parse a function literal's parameter list and body, returning a
    /// descriptor that names a freshly-pooled `Value::Function` constant.
    /// No upvalues: any identifier the body doesn't declare locally
    /// compiles as a global access, exactly as at top level (Non-goal:
    /// closures capturing an enclosing scope are out of bounds for this
    /// subset).
    pub(crate) fn function_body(&mut self, is_method: bool) -> Result<ExpDesc, CompileError> {
        self.push_func_state();
        if is_method {
            let self_name = self.store.intern("self");
            self.declare_param(self_name);
        }
        self.expect(Token::LParen, "(")?;
        if !matches!(self.current, Token::RParen) {
            loop {
                let name = self.expect_name()?;
                self.declare_param(name);
                if matches!(self.current, Token::Comma) {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, ")")?;
        self.block()?;
        self.expect(Token::End, "end")?;
        let mut chunk = self.pop_func_state();
        code::code_abc_on(&mut chunk, OpCode::Return, 0, 1, 0);
        let closure = Closure::Lua(LuaClosure { chunk: self.store.new_chunk(chunk) });
        let handle = self.store.new_closure(closure);
        let k = self.fs().add_constant(Value::Function(handle), None);
        Ok(ExpDesc::constant(k))
    }

    fn declare_param(&mut self, name: StrHandle) {
        let reg = self.fs().nactvar();
        self.fs().declare_local(name, reg);
        let _ = self.fs().reserve_regs(1);
        self.fs().chunk.num_params += 1;
    }

    // ---- unary / binary emission ------------------------------------------

    fn emit_unary(&mut self, op: UnOp, e: &mut ExpDesc) -> Result<ExpDesc, CompileError> {
        if let (UnOp::Neg, ExpKind::Number(n)) = (op, e.kind) {
            return Ok(ExpDesc::number(-n));
        }
        if matches!(op, UnOp::Not) {
            match e.kind {
                ExpKind::Nil | ExpKind::False => return Ok(ExpDesc::boolean(true)),
                ExpKind::True | ExpKind::Number(_) | ExpKind::Constant(_) => {
                    return Ok(ExpDesc::boolean(false))
                }
                _ => {}
            }
        }
        let opcode = match op {
            UnOp::Not => OpCode::Not,
            UnOp::Neg => OpCode::Unm,
            UnOp::Len => OpCode::Len,
        };
        let reg = self.discharge_result(code::exp2anyreg(self.fs(), e))?;
        code::free_exp(self.fs(), e);
        let pc = code::code_abc(self.fs(), opcode, NO_REG, reg, 0);
        Ok(ExpDesc::relocable(pc))
    }

    fn emit_binop(&mut self, op: Token, left: ExpDesc, right: ExpDesc) -> Result<ExpDesc, CompileError> {
        if let (ExpKind::Number(a), ExpKind::Number(b)) = (left.kind, right.kind) {
            if let Some(folded) = fold_arith(op, a, b) {
                return Ok(folded);
            }
            if is_compare(op) {
                return Ok(ExpDesc::boolean(fold_number_compare(op, a, b)));
            }
        }
        if is_compare(op) {
            if let Some(folded) = self.fold_string_compare(op, left.kind, right.kind) {
                return Ok(folded);
            }
        }
        let mut left = left;
        let mut right = right;
        match op {
            Token::Plus | Token::Minus | Token::Star | Token::Slash | Token::Percent | Token::Caret => {
                let lhs_rk = self.discharge_result(code::exp2rk(self.fs(), &mut left))?;
                let rhs_rk = self.discharge_result(code::exp2rk(self.fs(), &mut right))?;
                free_rk_operand(self.fs(), lhs_rk);
                free_rk_operand(self.fs(), rhs_rk);
                let opcode = match op {
                    Token::Plus => OpCode::Add,
                    Token::Minus => OpCode::Sub,
                    Token::Star => OpCode::Mul,
                    Token::Slash => OpCode::Div,
                    Token::Percent => OpCode::Mod,
                    Token::Caret => OpCode::Pow,
                    _ => unreachable!(),
                };
                let pc = code::code_abc(self.fs(), opcode, NO_REG, lhs_rk, rhs_rk);
                Ok(ExpDesc::relocable(pc))
            }
            Token::Eq | Token::Ne | Token::Lt | Token::Gt | Token::Le | Token::Ge => {
                let lhs_rk = self.discharge_result(code::exp2rk(self.fs(), &mut left))?;
                let rhs_rk = self.discharge_result(code::exp2rk(self.fs(), &mut right))?;
                free_rk_operand(self.fs(), lhs_rk);
                free_rk_operand(self.fs(), rhs_rk);
                let (opcode, cond, a_rk, b_rk) = match op {
                    Token::Eq => (OpCode::Eq, 1u32, lhs_rk, rhs_rk),
                    Token::Ne => (OpCode::Eq, 0u32, lhs_rk, rhs_rk),
                    Token::Lt => (OpCode::Lt, 1u32, lhs_rk, rhs_rk),
                    Token::Gt => (OpCode::Lt, 1u32, rhs_rk, lhs_rk),
                    Token::Le => (OpCode::Leq, 1u32, lhs_rk, rhs_rk),
                    Token::Ge => (OpCode::Leq, 1u32, rhs_rk, lhs_rk),
                    _ => unreachable!(),
                };
                code::code_abc(self.fs(), opcode, cond, a_rk, b_rk);
                let jmp = code::emit_jump(self.fs());
                Ok(ExpDesc::jump(jmp))
            }
            _ => unreachable!("not a binary operator token"),
        }
    }

    fn finish_concat(&mut self, left_reg: u32, right: ExpDesc) -> Result<ExpDesc, CompileError> {
        let mut right = right;
        let right_reg = self.discharge_result(code::exp2nextreg(self.fs(), &mut right))?;
        let pc = code::emit_concat(self.fs(), left_reg, left_reg, right_reg);
        self.fs().free_reg = left_reg + 1;
        Ok(ExpDesc::relocable(pc))
    }

    fn go_if_true(&mut self, e: &mut ExpDesc) -> Result<(), CompileError> {
        // The jump appended to `patch_false` must fire when `e` is false
        // (that's the whole point of a false-list) — so the test asks for
        // `cond=false`, not `true`.
        let pc = self.discharge_result(code::jump_on_cond(self.fs(), e, false))?;
        code::add_to_jump_list(self.fs(), &mut e.patch_false, pc);
        code::patch_to_here(self.fs(), e.patch_true);
        e.patch_true = NO_JUMP;
        Ok(())
    }

    fn is_string_constant(&mut self, kind: ExpKind) -> bool {
        match kind {
            ExpKind::Constant(k) => matches!(self.fs().chunk.constants[k as usize], Value::Str(_)),
            _ => false,
        }
    }

    /// Fold `left OP right` when both sides are pooled string constants
    /// (spec §4.5 "Comparisons of two literals of compatible types fold to
    /// `True`/`False`"). Ordering matches the VM's own string comparison
    /// (`values_less`): lexicographic by byte.
    fn fold_string_compare(&mut self, op: Token, left: ExpKind, right: ExpKind) -> Option<ExpDesc> {
        let (ExpKind::Constant(lk), ExpKind::Constant(rk)) = (left, right) else {
            return None;
        };
        let (lh, rh) = match (self.fs().chunk.constants[lk as usize], self.fs().chunk.constants[rk as usize]) {
            (Value::Str(lh), Value::Str(rh)) => (lh, rh),
            _ => return None,
        };
        let result = match op {
            Token::Eq => lh == rh,
            Token::Ne => lh != rh,
            Token::Lt | Token::Gt | Token::Le | Token::Ge => {
                let ls = self.store.string_at(lh).as_str();
                let rs = self.store.string_at(rh).as_str();
                match op {
                    Token::Lt => ls < rs,
                    Token::Gt => ls > rs,
                    Token::Le => ls <= rs,
                    Token::Ge => ls >= rs,
                    _ => unreachable!(),
                }
            }
            _ => unreachable!("not a comparison operator"),
        };
        Some(ExpDesc::boolean(result))
    }

    fn go_if_false(&mut self, e: &mut ExpDesc) -> Result<(), CompileError> {
        let pc = self.discharge_result(code::jump_on_cond(self.fs(), e, true))?;
        code::add_to_jump_list(self.fs(), &mut e.patch_true, pc);
        code::patch_to_here(self.fs(), e.patch_false);
        e.patch_false = NO_JUMP;
        Ok(())
    }

    fn finish_and(&mut self, left: ExpDesc, mut right: ExpDesc) -> Result<ExpDesc, CompileError> {
        code::discharge_vars(self.fs(), &mut right);
        code::concat_jump_lists(self.fs(), &mut right.patch_false, left.patch_false);
        Ok(right)
    }

    fn finish_or(&mut self, left: ExpDesc, mut right: ExpDesc) -> Result<ExpDesc, CompileError> {
        code::discharge_vars(self.fs(), &mut right);
        code::concat_jump_lists(self.fs(), &mut right.patch_true, left.patch_true);
        Ok(right)
    }

    fn error_here(&self, what: &str) -> CompileError {
        self.make_error(what.to_string())
    }
}

fn free_rk_operand(fs: &mut crate::compiler::func_state::FuncState, rk: u32) {
    if !Instruction::is_rk_const(rk) {
        fs.free_reg(rk);
    }
}

/// Fold `a OP b` for two number literals (spec §4.5). Division and modulo
/// are deliberately left unfolded so those always run through the VM's own
/// arithmetic path rather than a separate host-side implementation.
fn fold_arith(op: Token, a: f64, b: f64) -> Option<ExpDesc> {
    let n = match op {
        Token::Plus => a + b,
        Token::Minus => a - b,
        Token::Star => a * b,
        Token::Caret => a.powf(b),
        Token::Slash | Token::Percent => return None,
        _ => return None,
    };
    Some(ExpDesc::number(n))
}

/// Fold `a OP b` for two number literals into a boolean (spec §4.5).
/// Matches the VM's own `Eq`/`Lt`/`Leq` semantics (`raw_eq`, `values_less`).
fn fold_number_compare(op: Token, a: f64, b: f64) -> bool {
    match op {
        Token::Eq => a == b,
        Token::Ne => a != b,
        Token::Lt => a < b,
        Token::Gt => a > b,
        Token::Le => a <= b,
        Token::Ge => a >= b,
        _ => unreachable!("not a comparison operator"),
    }
}
