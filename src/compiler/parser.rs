//! The `Parser`: token stream plumbing, the `FuncState` nesting stack for
//! function literals, and the statement-block driver (spec §4.4-§4.7).
//!
//! Grounded on the teacher crate's `compiler::parser` cursor style — a
//! `current` token plus, only where the grammar is genuinely ambiguous on
//! one token (table-constructor `Name = expr` vs. a bare name expression),
//! a single saved lookahead slot mirroring real Lua's `luaX_lookahead`.

use crate::compiler::error::CompileError;
use crate::compiler::func_state::FuncState;
use crate::compiler::lexer::Lexer;
use crate::compiler::reader::StringReader;
use crate::compiler::token::Token;
use crate::gc::ObjectStore;
use crate::lua_value::Chunk;

pub struct Parser<'s> {
    pub(crate) lexer: Lexer,
    pub(crate) store: &'s mut ObjectStore,
    pub(crate) current: Token,
    pub(crate) current_line: u32,
    ahead: Option<(Token, u32)>,
    fs_stack: Vec<FuncState>,
}

impl<'s> Parser<'s> {
    pub fn new(source: &str, source_name: &str, store: &'s mut ObjectStore) -> Result<Self, CompileError> {
        let mut reader = StringReader::new(source);
        let mut lexer = Lexer::new(&mut reader, source_name);
        let (current, current_line) = lexer.next_token(store)?;
        Ok(Self {
            lexer,
            store,
            current,
            current_line,
            ahead: None,
            fs_stack: vec![FuncState::new(source_name.to_string())],
        })
    }

    pub fn fs(&mut self) -> &mut FuncState {
        self.fs_stack.last_mut().expect("function-state stack underflow")
    }

    pub(crate) fn push_func_state(&mut self) {
        let name = self.lexer.source_name.clone();
        self.fs_stack.push(FuncState::new(name));
    }

    pub(crate) fn pop_func_state(&mut self) -> Chunk {
        self.fs_stack.pop().expect("function-state stack underflow").chunk
    }

    pub fn advance(&mut self) -> Result<(), CompileError> {
        if let Some((tok, line)) = self.ahead.take() {
            self.current = tok;
            self.current_line = line;
        } else {
            let (tok, line) = self.lexer.next_token(self.store)?;
            self.current = tok;
            self.current_line = line;
        }
        Ok(())
    }

    /// Peek one token past `current` without consuming it, caching the
    /// result in `ahead` for the next `advance`.
    fn lookahead(&mut self) -> Result<Token, CompileError> {
        if self.ahead.is_none() {
            let pair = self.lexer.next_token(self.store)?;
            self.ahead = Some(pair);
        }
        Ok(self.ahead.as_ref().unwrap().0)
    }

    pub(crate) fn peek_next_is_assign(&mut self) -> bool {
        matches!(self.lookahead(), Ok(Token::Assign))
    }

    pub fn expect(&mut self, tok: Token, what: &str) -> Result<(), CompileError> {
        if std::mem::discriminant(&self.current) == std::mem::discriminant(&tok) {
            self.advance()
        } else {
            Err(self.make_error(format!("'{what}' expected")))
        }
    }

    pub(crate) fn make_error(&self, what: String) -> CompileError {
        CompileError::new(self.lexer.source_name.clone(), self.current_line, what, self.current.describe())
    }

    pub fn line(&self) -> u32 {
        self.current_line
    }
}
